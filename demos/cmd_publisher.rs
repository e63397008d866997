// Keyboard teleop for a two-channel (differential) base:
// W/S forward/back, A/D turn, R/F speed, Space stop, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use roboteq_zenoh_runtime::config::TOPIC_CMD;
use roboteq_zenoh_runtime::messages::{ChannelCommand, CommandMode};

const SPEEDS: [f64; 3] = [10.0, 30.0, 60.0]; // output-shaft RPM
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input
const LEFT_CHANNEL: u8 = 1;
const RIGHT_CHANNEL: u8 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: W/S=drive, A/D=turn, R/F=speed, Space=stop, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent wheel state, RPM
    let mut left = 0.0;
    let mut right = 0.0;
    let mut stopped = false;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let speed = SPEEDS[speed_idx];

                match code {
                    KeyCode::Char('w') if pressed => {
                        (left, right) = (speed, speed);
                        stopped = false;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        (left, right) = (-speed, -speed);
                        stopped = false;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        (left, right) = (-speed, speed);
                        stopped = false;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        (left, right) = (speed, -speed);
                        stopped = false;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char(' ') if pressed => {
                        stopped = true;
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

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            left = 0.0;
            right = 0.0;
        }

        let mode = if stopped {
            CommandMode::Stopped
        } else {
            CommandMode::Velocity
        };

        // Always publish at ~50Hz
        for (channel, setpoint) in [(LEFT_CHANNEL, left), (RIGHT_CHANNEL, right)] {
            let cmd = ChannelCommand {
                channel,
                mode,
                setpoint,
            };
            publisher.put(serde_json::to_string(&cmd)?).await?;
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({} RPM)", label, SPEEDS[idx]);
}
