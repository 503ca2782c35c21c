use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use car_agent::config::AgentConfig;
use car_agent::{runtime, worker};

#[derive(Parser, Debug)]
#[command(name = "car-agent", version, about = "On-robot car agent")]
struct Cli {
    /// YAML (.yaml/.yml) or JSON config file; built-in defaults when omitted
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop (default)
    Run,

    /// Drive the chassis forward then rotate, logging state
    DriveTest {
        #[arg(long, default_value_t = 0.10)]
        vx: f64,
        #[arg(long, default_value_t = 0.30)]
        wz: f64,
        /// Seconds per motion segment
        #[arg(long = "t", default_value_t = 1.5)]
        secs: f64,
    },

    /// Device worker process, launched by the agent itself
    #[command(hide = true, subcommand)]
    Io(IoCommand),
}

#[derive(Subcommand, Debug)]
enum IoCommand {
    Chassis {
        #[arg(long)]
        shm: String,
        #[arg(long)]
        port: String,
        #[arg(long)]
        baud: u32,
        #[arg(long)]
        hz: f64,
    },
    Uwb {
        #[arg(long)]
        shm: String,
        #[arg(long)]
        port: String,
        #[arg(long)]
        baud: u32,
    },
}

fn init_logging() {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<PathBuf>) -> Result<AgentConfig, Box<dyn std::error::Error + Send + Sync>> {
    Ok(AgentConfig::load(path.as_deref())?)
}

fn run_agent(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = load_config(path)?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(runtime::run(cfg))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_agent(cli.config),
        Command::DriveTest { vx, wz, secs } => {
            load_config(cli.config).and_then(|cfg| runtime::drive_test(&cfg, vx, wz, secs))
        }
        Command::Io(IoCommand::Chassis { shm, port, baud, hz }) => {
            worker::run_chassis(&shm, &port, baud, hz).map_err(Into::into)
        }
        Command::Io(IoCommand::Uwb { shm, port, baud }) => {
            worker::run_uwb(&shm, &port, baud).map_err(Into::into)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["car-agent", "--config", "agent.json"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, Some(PathBuf::from("agent.json")));
    }

    #[test]
    fn test_drive_test_defaults() {
        let cli = Cli::try_parse_from(["car-agent", "drive-test", "--t", "2"]).unwrap();
        let Some(Command::DriveTest { vx, wz, secs }) = cli.command else {
            panic!("expected drive-test");
        };
        assert_eq!((vx, wz, secs), (0.10, 0.30, 2.0));
    }

    #[test]
    fn test_worker_command_line_parses() {
        let cli = Cli::try_parse_from([
            "car-agent", "io", "chassis", "--shm", "/car-chassis-1-0", "--port", "/dev/ttyUSB0",
            "--baud", "115200", "--hz", "50",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Io(IoCommand::Chassis { baud: 115_200, .. }))
        ));
    }
}
