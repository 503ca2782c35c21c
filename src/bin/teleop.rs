// Keyboard teleop over UDP: W/S drive, A/D rotate, R/F speed, Q quit
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::info;

use car_agent::messages::{to_datagram, Cmd, Envelope};
use car_agent::unix_time;

const SPEEDS: [f64; 3] = [0.05, 0.15, 0.3]; // m/s
const TURN_SPEEDS: [f64; 3] = [0.15, 0.3, 0.6]; // rad/s
const INPUT_TIMEOUT: Duration = Duration::from_millis(100); // Zero velocities after this long with no input
const SEND_PERIOD: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "teleop", about = "Keyboard teleoperation for car-agent")]
struct Args {
    /// Agent command endpoint
    #[arg(long, default_value = "127.0.0.1:31001")]
    target: String,

    /// Car to address; empty reaches any agent
    #[arg(long, default_value = "")]
    car_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&args.target).await?;
    info!("Sending commands to {}", args.target);

    info!("Controls: W/S=drive, A/D=rotate, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&socket, &args.car_id).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    socket: &UdpSocket,
    car_id: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut seq: u64 = 0;

    // Persistent velocity state
    let mut vx = 0.0;
    let mut wz = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key at the send period (50Hz effective rate)
        if event::poll(SEND_PERIOD)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        vx = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        vx = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        wz = TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        wz = -TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > INPUT_TIMEOUT {
            vx = 0.0;
            wz = 0.0;
        }

        seq += 1;
        let cmd = Envelope::Cmd(Cmd {
            car_id: car_id.to_string(),
            seq,
            t: unix_time(),
            vx,
            wz,
            mode: "manual".to_string(),
        });
        socket.send(&to_datagram(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
