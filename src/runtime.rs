// Control loop with command watchdog
// Note: commands arrive over UDP, device I/O runs in worker processes; this loop
// only moves numbers between them at fixed rates.

use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::chassis::{ChassisDriver, ChassisState};
use crate::config::{AgentConfig, STATUS_INTERVAL};
use crate::messages::{Health, Telemetry, TelemetryState, UwbTelemetry};
use crate::net::{CmdServer, CmdSnapshot, TelemetryClient};
use crate::safety::{clamp, Actuation, CommandPolicy};
use crate::schedule::TransmitSchedule;
use crate::unix_time;
use crate::uwb::UwbAdapter;

// Time the last zero command gets to reach the base before workers are stopped
const SHUTDOWN_SETTLE: Duration = Duration::from_millis(100);

// Period of the state log in drive-test
const DRIVE_TEST_LOG_INTERVAL: Duration = Duration::from_millis(200);

pub struct Runtime {
    car_id: String,
    policy: CommandPolicy,
    chassis: ChassisDriver,
    uwb: Option<UwbAdapter>,
    last_cmd: CmdSnapshot,
    actuation: Actuation,
}

impl Runtime {
    pub fn new(cfg: &AgentConfig) -> Self {
        let chassis = ChassisDriver::new(
            &cfg.chassis.serial_port,
            cfg.chassis.baudrate,
            cfg.chassis.control_hz,
        );
        let uwb = cfg
            .sensors
            .uwb
            .enabled
            .then(|| UwbAdapter::new(&cfg.sensors.uwb.serial_port, cfg.sensors.uwb.baudrate));

        Self {
            car_id: cfg.car_id.clone(),
            policy: CommandPolicy::new(&cfg.safety),
            chassis,
            uwb,
            last_cmd: CmdSnapshot::default(),
            actuation: Actuation {
                vx: 0.0,
                wz: 0.0,
                mode: "idle".to_string(),
                stale: true,
            },
        }
    }

    /// Spawn the device workers
    pub fn start_devices(&mut self) -> Result<(), crate::session::SessionError> {
        self.chassis.start()?;
        info!("Chassis started, alive={}", self.chassis.is_alive());

        if let Some(uwb) = self.uwb.as_mut() {
            uwb.start()?;
            info!("UWB started, alive={}", uwb.is_alive());
        }
        Ok(())
    }

    /// Apply the watchdog and limits to the latest command and write it out
    pub fn control_tick(&mut self, cmd: CmdSnapshot, now: Instant) -> &Actuation {
        let actuation = self.policy.apply(&cmd, now);

        if actuation.stale && !self.actuation.stale {
            warn!("Command stale (last seq {}), stopping base", cmd.seq);
        } else if !actuation.stale && self.actuation.stale {
            info!("Commands resumed, mode={}", actuation.mode);
        }

        self.chassis.set_cmd(actuation.vx, 0.0, actuation.wz);
        self.last_cmd = cmd;
        self.actuation = actuation;
        &self.actuation
    }

    pub fn actuation(&self) -> &Actuation {
        &self.actuation
    }

    /// Build one telemetry packet from current device state
    pub fn telemetry(&mut self, rx_count: u64, parse_err: u64) -> Telemetry {
        let st = self.chassis.get_state();

        let uwb = self.uwb.as_mut().map(|adapter| {
            let u = adapter.get_latest();
            UwbTelemetry {
                x: u.x,
                y: u.y,
                vx: u.vx,
                vy: u.vy,
                age_s: u.rx_age_s,
                err: u.err,
                alive: adapter.is_alive(),
            }
        });

        Telemetry {
            car_id: self.car_id.clone(),
            t: unix_time(),
            seq: self.last_cmd.seq,
            state: telemetry_state(&st, uwb),
            health: Health {
                alive: self.chassis.is_alive(),
                cmd_rx_count: rx_count,
                cmd_parse_err: parse_err,
                cmd_stale: self.actuation.stale,
                mode: self.actuation.mode.clone(),
            },
        }
    }

    fn log_status(&mut self, rx_count: u64, parse_err: u64) {
        let st = self.chassis.get_state();
        let act = &self.actuation;
        info!(
            "mode={} stale={} cmd(vx={:.3},wz={:.3}) state(vx={:.3},wz={:.3}) rx={} err={}",
            act.mode, act.stale, act.vx, act.wz, st.vx, st.wz, rx_count, parse_err
        );
    }

    /// Zero the command, give it time to go out, then stop intake and every worker
    pub async fn shutdown(mut self, server: CmdServer) {
        self.chassis.set_cmd(0.0, 0.0, 0.0);
        tokio::time::sleep(SHUTDOWN_SETTLE).await;
        server.stop();

        // Stopping a worker waits on the child process; keep that off the executor
        let Runtime {
            mut chassis,
            mut uwb,
            ..
        } = self;
        let stopped = tokio::task::spawn_blocking(move || {
            chassis.stop();
            if let Some(uwb) = uwb.as_mut() {
                uwb.stop();
            }
        })
        .await;
        if let Err(e) = stopped {
            warn!("Worker shutdown task failed: {}", e);
        }
    }
}

fn telemetry_state(st: &ChassisState, uwb: Option<UwbTelemetry>) -> TelemetryState {
    TelemetryState {
        vx: st.vx,
        vy: st.vy,
        vz: st.vz,
        ax: st.ax,
        ay: st.ay,
        az: st.az,
        wx: st.wx,
        wy: st.wy,
        wz: st.wz,
        err: st.err,
        uwb,
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

pub async fn run(cfg: AgentConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Agent boot, car_id={}", cfg.car_id);

    let mut runtime = Runtime::new(&cfg);
    runtime.start_devices()?;

    let server = CmdServer::bind(&cfg.car_id, &cfg.net.cmd_listen).await?;
    let telemetry = TelemetryClient::connect(&cfg.net.telemetry_peer).await?;
    info!("Telemetry peer: {}", telemetry.peer());

    let mut control = ticker(TransmitSchedule::period_for_hz(cfg.rates.control_hz));
    let mut publish = ticker(TransmitSchedule::period_for_hz(cfg.rates.telemetry_hz));
    let mut status = ticker(STATUS_INTERVAL);

    info!(
        "Runtime started: {}Hz control, {}Hz telemetry, {}s watchdog timeout",
        cfg.rates.control_hz, cfg.rates.telemetry_hz, cfg.safety.cmd_timeout_s
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = control.tick() => {
                runtime.control_tick(server.latest(), Instant::now());
            }
            _ = publish.tick() => {
                let pkt = runtime.telemetry(server.rx_count(), server.parse_err());
                telemetry.send(pkt).await;
            }
            _ = status.tick() => {
                runtime.log_status(server.rx_count(), server.parse_err());
            }
            res = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break res;
            }
        }
    };

    runtime.shutdown(server).await;
    info!("Shutdown complete");

    result.map_err(Into::into)
}

/// Bench check of the chassis link: warm up, forward, stop, rotate, stop
pub fn drive_test(
    cfg: &AgentConfig,
    vx: f64,
    wz: f64,
    secs: f64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let vx = clamp(vx, -cfg.safety.v_max, cfg.safety.v_max);
    let wz = clamp(wz, -cfg.safety.w_max, cfg.safety.w_max);
    let hz = cfg.chassis.control_hz;
    let dt = TransmitSchedule::period_for_hz(hz);
    let segment = Duration::from_secs_f64(secs.max(0.0));

    let mut chassis = ChassisDriver::new(&cfg.chassis.serial_port, cfg.chassis.baudrate, hz);
    chassis.start()?;
    info!(
        "Chassis started: alive={} serial={} hz={}",
        chassis.is_alive(),
        cfg.chassis.serial_port,
        hz
    );

    let mut hold = |vx: f64, wz: f64, duration: Duration| {
        let t0 = Instant::now();
        let mut last_log: Option<Instant> = None;
        while t0.elapsed() < duration {
            chassis.set_cmd(vx, 0.0, wz);
            if last_log.is_none_or(|at| at.elapsed() >= DRIVE_TEST_LOG_INTERVAL) {
                let st = chassis.get_state();
                info!(
                    "v=({:.3},{:.3},{:.3}) a=({:.3},{:.3},{:.3}) w=({:.3},{:.3},{:.3}) err={} alive={}",
                    st.vx, st.vy, st.vz, st.ax, st.ay, st.az, st.wx, st.wy, st.wz, st.err,
                    chassis.is_alive()
                );
                last_log = Some(Instant::now());
            }
            std::thread::sleep(dt);
        }
    };

    let second = Duration::from_secs(1);
    info!("Warmup 1.0s, cmd=0");
    hold(0.0, 0.0, second);
    info!("Forward {:.2}s, vx={:.3}", secs, vx);
    hold(vx, 0.0, segment);
    info!("Stop 1.0s");
    hold(0.0, 0.0, second);
    info!("Rotate {:.2}s, wz={:.3}", secs, wz);
    hold(0.0, wz, segment);
    info!("Stop 1.0s");
    hold(0.0, 0.0, second);

    chassis.set_cmd(0.0, 0.0, 0.0);
    std::thread::sleep(SHUTDOWN_SETTLE);
    chassis.stop();
    info!("Drive test done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        let mut cfg = AgentConfig::default();
        cfg.car_id = "car_1".to_string();
        cfg
    }

    fn command(vx: f64, wz: f64, rx_time: Option<Instant>) -> CmdSnapshot {
        CmdSnapshot {
            seq: 9,
            t: 0.0,
            vx,
            wz,
            mode: "manual".to_string(),
            rx_time,
        }
    }

    #[test]
    fn test_control_tick_clamps_fresh_command() {
        let mut rt = Runtime::new(&config());
        let now = Instant::now();
        let act = rt.control_tick(command(2.0, -0.1, Some(now)), now).clone();
        assert!(!act.stale);
        assert_eq!(act.vx, 0.3);
        assert_eq!(act.wz, -0.1);
        assert_eq!(act.mode, "manual");
    }

    #[test]
    fn test_control_tick_idles_without_commands() {
        let mut rt = Runtime::new(&config());
        let act = rt.control_tick(CmdSnapshot::default(), Instant::now());
        assert!(act.stale);
        assert_eq!((act.vx, act.wz), (0.0, 0.0));
        assert_eq!(act.mode, "idle");
    }

    #[test]
    fn test_telemetry_before_devices_start() {
        let mut rt = Runtime::new(&config());
        let now = Instant::now();
        rt.control_tick(command(0.1, 0.0, Some(now)), now);

        let pkt = rt.telemetry(4, 1);
        assert_eq!(pkt.car_id, "car_1");
        assert_eq!(pkt.seq, 9);
        assert_eq!(pkt.state.err, 1);
        assert!(pkt.state.uwb.is_none());
        assert!(!pkt.health.alive);
        assert!(!pkt.health.cmd_stale);
        assert_eq!(pkt.health.cmd_rx_count, 4);
        assert_eq!(pkt.health.cmd_parse_err, 1);
        assert_eq!(pkt.health.mode, "manual");
    }

    #[tokio::test]
    async fn test_shutdown_on_single_thread_runtime() {
        let mut cfg = config();
        cfg.sensors.uwb.enabled = true;
        let rt = Runtime::new(&cfg);
        let server = CmdServer::bind("car_1", "127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        rt.shutdown(server).await;

        // The intake socket is released once the server task is gone
        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(sock) = std::net::UdpSocket::bind(addr) {
                rebound = Some(sock);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rebound.is_some());
    }

    #[test]
    fn test_telemetry_carries_uwb_block_when_enabled() {
        let mut cfg = config();
        cfg.sensors.uwb.enabled = true;
        let mut rt = Runtime::new(&cfg);

        let uwb = rt.telemetry(0, 0).state.uwb.unwrap();
        assert_eq!(uwb.err, 1);
        assert!(!uwb.alive);
        assert_eq!(uwb.age_s, crate::uwb::NEVER_AGE_S);
    }
}
