// UDP command intake and telemetry output

mod cmd_server;
mod telemetry;

pub use cmd_server::{CmdServer, CmdSnapshot};
pub use telemetry::TelemetryClient;
