// Define message types for the UDP link

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Every datagram is a JSON object tagged by "type"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Cmd(Cmd),
    Telemetry(Telemetry),
    // Anything else on the port is ignored, not counted as a parse error
    #[serde(other)]
    Unknown,
}

// Command from operator -> agent
// Fields missing from the datagram take their defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Cmd {
    pub car_id: String,
    #[serde(deserialize_with = "lenient_seq")]
    pub seq: u64,
    pub t: f64,
    pub vx: f64,
    pub wz: f64,
    pub mode: String,
}

/// Senders are loose about seq: accept any non-negative number (truncated)
/// or an integer string
fn lenient_seq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum RawSeq {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match RawSeq::deserialize(deserializer)? {
        RawSeq::Int(n) => Ok(n),
        RawSeq::Float(x) if x.is_finite() && x > -1.0 => Ok(x.trunc() as u64),
        RawSeq::Text(s) => s.trim().parse().map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("invalid seq {other:?}"))),
    }
}

impl Default for Cmd {
    fn default() -> Self {
        Self {
            car_id: String::new(),
            seq: 0,
            t: 0.0,
            vx: 0.0,
            wz: 0.0,
            mode: "auto".to_string(),
        }
    }
}

impl Cmd {
    /// Whether a command addressed to `car_id` is meant for `ours`
    pub fn is_for(&self, ours: &str) -> bool {
        matches!(self.car_id.as_str(), "" | "broadcast") || self.car_id == ours
    }
}

// Telemetry from agent -> operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub car_id: String,
    pub t: f64,
    /// Sequence number of the last command received
    pub seq: u64,
    pub state: TelemetryState,
    pub health: Health,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryState {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
    pub err: u8,
    pub uwb: Option<UwbTelemetry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UwbTelemetry {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub age_s: f64,
    pub err: u8,
    pub alive: bool,
}

/// Health block published with every telemetry packet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub alive: bool,
    pub cmd_rx_count: u64,
    pub cmd_parse_err: u64,
    pub cmd_stale: bool,
    pub mode: String,
}

/// Compact JSON encoding used on the wire
pub fn to_datagram(envelope: &Envelope) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(envelope)
}

/// Decode one datagram. Objects without a string "type" are not for us and
/// come back as `Unknown`; anything that is not a JSON object is an error.
pub fn from_datagram(data: &[u8]) -> serde_json::Result<Envelope> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    let Some(object) = value.as_object() else {
        return Err(serde_json::Error::custom("datagram is not a JSON object"));
    };
    if !object.get("type").is_some_and(serde_json::Value::is_string) {
        return Ok(Envelope::Unknown);
    }
    serde_json::from_value(value)
}
