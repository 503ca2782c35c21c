// Receives operator commands and keeps only the latest one

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::messages::{from_datagram, Cmd, Envelope};

const MAX_DATAGRAM: usize = 4096;

/// Latest accepted command plus when it arrived
#[derive(Debug, Clone, PartialEq)]
pub struct CmdSnapshot {
    pub seq: u64,
    pub t: f64,
    pub vx: f64,
    pub wz: f64,
    pub mode: String,
    /// None until the first command arrives
    pub rx_time: Option<Instant>,
}

impl Default for CmdSnapshot {
    fn default() -> Self {
        Self {
            seq: 0,
            t: 0.0,
            vx: 0.0,
            wz: 0.0,
            mode: "idle".to_string(),
            rx_time: None,
        }
    }
}

impl CmdSnapshot {
    fn received(cmd: Cmd, at: Instant) -> Self {
        Self {
            seq: cmd.seq,
            t: cmd.t,
            vx: cmd.vx,
            wz: cmd.wz,
            mode: cmd.mode,
            rx_time: Some(at),
        }
    }
}

#[derive(Default)]
struct Counters {
    rx: AtomicU64,
    parse_err: AtomicU64,
}

pub struct CmdServer {
    latest: watch::Receiver<CmdSnapshot>,
    counters: Arc<Counters>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl CmdServer {
    /// Bind `listen` and start receiving in a background task
    pub async fn bind(car_id: &str, listen: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        let local_addr = socket.local_addr()?;
        let (tx, latest) = watch::channel(CmdSnapshot::default());
        let counters = Arc::new(Counters::default());

        info!("Command server listening on {}", local_addr);
        let task = tokio::spawn(serve(socket, car_id.to_string(), tx, Arc::clone(&counters)));

        Ok(Self {
            latest,
            counters,
            local_addr,
            task,
        })
    }

    pub fn latest(&self) -> CmdSnapshot {
        self.latest.borrow().clone()
    }

    pub fn rx_count(&self) -> u64 {
        self.counters.rx.load(Ordering::Relaxed)
    }

    pub fn parse_err(&self) -> u64 {
        self.counters.parse_err.load(Ordering::Relaxed)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

async fn serve(
    socket: UdpSocket,
    car_id: String,
    tx: watch::Sender<CmdSnapshot>,
    counters: Arc<Counters>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("Command socket error: {}", e);
                continue;
            }
        };

        match from_datagram(&buf[..n]) {
            Ok(Envelope::Cmd(cmd)) if cmd.is_for(&car_id) => {
                tx.send_replace(CmdSnapshot::received(cmd, Instant::now()));
                counters.rx.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Bad command datagram from {}: {}", from, e);
                counters.parse_err.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn send(to: SocketAddr, payload: &[u8]) {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.send_to(payload, to).await.unwrap();
    }

    async fn wait_for<F: Fn(&CmdServer) -> bool>(server: &CmdServer, check: F) {
        for _ in 0..100 {
            if check(server) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_accepts_command_for_this_car() {
        let server = CmdServer::bind("car_1", "127.0.0.1:0").await.unwrap();
        assert_eq!(server.latest().rx_time, None);

        send(
            server.local_addr(),
            br#"{"type":"cmd","car_id":"car_1","seq":4,"vx":0.2,"wz":-0.1,"mode":"manual"}"#,
        )
        .await;
        wait_for(&server, |s| s.rx_count() == 1).await;

        let latest = server.latest();
        assert_eq!(latest.seq, 4);
        assert_eq!(latest.vx, 0.2);
        assert_eq!(latest.mode, "manual");
        assert!(latest.rx_time.is_some());
        server.stop();
    }

    #[tokio::test]
    async fn test_counts_parse_errors_and_ignores_others() {
        let server = CmdServer::bind("car_1", "127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        send(addr, b"{{{").await;
        send(addr, br#"{"type":"cmd","car_id":"car_9","vx":1.0}"#).await;
        send(addr, br#"{"type":"hello"}"#).await;
        send(addr, br#"{"type":"cmd","seq":2}"#).await;
        wait_for(&server, |s| s.rx_count() == 1).await;

        assert_eq!(server.parse_err(), 1);
        assert_eq!(server.latest().seq, 2);
        server.stop();
    }

    #[tokio::test]
    async fn test_float_seq_accepted_and_untyped_ignored() {
        let server = CmdServer::bind("car_1", "127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        send(addr, br#"{"vx":0.2}"#).await;
        send(addr, br#"{"type":"cmd","seq":3.0,"vx":0.2}"#).await;
        wait_for(&server, |s| s.rx_count() == 1).await;

        assert_eq!(server.parse_err(), 0);
        let latest = server.latest();
        assert_eq!(latest.seq, 3);
        assert_eq!(latest.vx, 0.2);
        server.stop();
    }
}
