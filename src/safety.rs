// Command watchdog and velocity limits
//
// Note: the watchdog stops the base if the operator stops sending commands,
// e.g. if teleop crashes or the network drops.

use std::time::{Duration, Instant};

use crate::config::SafetyConfig;
use crate::net::CmdSnapshot;

pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

/// What the control loop writes to the chassis this tick
#[derive(Debug, Clone, PartialEq)]
pub struct Actuation {
    pub vx: f64,
    pub wz: f64,
    pub mode: String,
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    cmd_timeout: Duration,
    v_max: f64,
    w_max: f64,
}

impl CommandPolicy {
    pub fn new(cfg: &SafetyConfig) -> Self {
        Self {
            cmd_timeout: Duration::from_secs_f64(cfg.cmd_timeout_s.max(0.0)),
            v_max: cfg.v_max.abs(),
            w_max: cfg.w_max.abs(),
        }
    }

    /// Zero when stale (or never received), otherwise the clamped command
    pub fn apply(&self, cmd: &CmdSnapshot, now: Instant) -> Actuation {
        let stale = cmd
            .rx_time
            .is_none_or(|rx| now.saturating_duration_since(rx) > self.cmd_timeout);

        if stale {
            return Actuation {
                vx: 0.0,
                wz: 0.0,
                mode: "idle".to_string(),
                stale,
            };
        }

        Actuation {
            vx: clamp(cmd.vx, -self.v_max, self.v_max),
            wz: clamp(cmd.wz, -self.w_max, self.w_max),
            mode: cmd.mode.clone(),
            stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CommandPolicy {
        CommandPolicy::new(&SafetyConfig {
            cmd_timeout_s: 0.2,
            v_max: 0.3,
            w_max: 0.6,
        })
    }

    fn snapshot(vx: f64, wz: f64, rx_time: Option<Instant>) -> CmdSnapshot {
        CmdSnapshot {
            seq: 1,
            t: 0.0,
            vx,
            wz,
            mode: "auto".to_string(),
            rx_time,
        }
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(1.0, -0.5, 0.5), 0.5);
        assert_eq!(clamp(-1.0, -0.5, 0.5), -0.5);
        assert_eq!(clamp(0.1, -0.5, 0.5), 0.1);
    }

    #[test]
    fn test_never_received_is_stale() {
        let act = policy().apply(&snapshot(0.2, 0.2, None), Instant::now());
        assert!(act.stale);
        assert_eq!((act.vx, act.wz), (0.0, 0.0));
        assert_eq!(act.mode, "idle");
    }

    #[test]
    fn test_fresh_command_is_clamped() {
        let now = Instant::now();
        let act = policy().apply(&snapshot(1.0, -2.0, Some(now)), now);
        assert!(!act.stale);
        assert_eq!(act.vx, 0.3);
        assert_eq!(act.wz, -0.6);
        assert_eq!(act.mode, "auto");
    }

    #[test]
    fn test_old_command_goes_stale() {
        let rx = Instant::now();
        let act = policy().apply(&snapshot(0.1, 0.0, Some(rx)), rx + Duration::from_millis(250));
        assert!(act.stale);
        assert_eq!(act.vx, 0.0);

        let act = policy().apply(&snapshot(0.1, 0.0, Some(rx)), rx + Duration::from_millis(150));
        assert!(!act.stale);
        assert_eq!(act.vx, 0.1);
    }
}
