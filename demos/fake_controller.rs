// Stand-in for the controller process: follows encoder commands with a first-order
// response and answers with feedback frames, so the runtime can run without hardware.
//
// Usage: cargo run --example fake_controller -- --drop-every 50
use std::collections::BTreeMap;
use std::time::Duration;

use clap::Parser;
use tokio::time::interval;
use tracing::{info, warn};

use roboteq_zenoh_runtime::config::{
    loop_period, RuntimeConfig, MAX_LOOP_HZ, TOPIC_CONTROLLER_CMD, TOPIC_CONTROLLER_FEEDBACK,
};
use roboteq_zenoh_runtime::messages::{CommandMode, EncoderCommand, RawFeedback};

#[derive(Debug, Parser)]
struct Args {
    /// Feedback rate
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..=MAX_LOOP_HZ))]
    hz: u64,

    /// Corrupt one frame out of every N (0 = never)
    #[arg(long, default_value_t = 0)]
    drop_every: u64,

    /// Stop answering after this many frames, to exercise the watchdog (0 = never)
    #[arg(long, default_value_t = 0)]
    go_silent_after: u64,
}

#[derive(Debug, Default)]
struct SimAxis {
    target_rpm: f64,
    encoder_rpm: f64,
    ticks: f64,
    mode: u8,
}

impl SimAxis {
    fn apply(&mut self, cmd: &EncoderCommand) {
        match cmd.mode {
            CommandMode::Stopped => self.target_rpm = 0.0,
            CommandMode::Velocity => {
                self.target_rpm = cmd.value;
                self.mode = 1;
            }
            CommandMode::Position => {
                // Jump straight to the target, speed reads zero
                self.ticks = cmd.value;
                self.target_rpm = 0.0;
                self.mode = 3;
            }
        }
    }

    fn step(&mut self, dt: Duration, ticks_per_encoder_rev: f64) {
        self.encoder_rpm += (self.target_rpm - self.encoder_rpm) * 0.2;
        self.ticks += self.encoder_rpm / 60.0 * dt.as_secs_f64() * ticks_per_encoder_rev;
    }

    fn tokens(&self) -> Vec<String> {
        vec![
            format!("{:.0}", self.encoder_rpm),
            format!("{:.0}", self.ticks),
            self.mode.to_string(),
            "12".to_string(),  // motor current
            "240".to_string(), // supply voltage
            "8".to_string(),   // supply current
            "31".to_string(),  // motor temperature
            "29".to_string(),  // channel temperature
            "0".to_string(),   // fault flags
        ]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = RuntimeConfig::default();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let sub_cmd = session.declare_subscriber(TOPIC_CONTROLLER_CMD).await?;
    let pub_feedback = session.declare_publisher(TOPIC_CONTROLLER_FEEDBACK).await?;

    let mut axes: BTreeMap<u8, (SimAxis, f64)> = config
        .channels
        .iter()
        .map(|c| (c.channel_num, (SimAxis::default(), c.encoder_ppr as f64 * 4.0)))
        .collect();

    let period = loop_period(args.hz);
    let mut tick = interval(period);
    let mut frames: u64 = 0;

    info!("Fake controller running {} channel(s) at {}Hz", axes.len(), args.hz);

    loop {
        tick.tick().await;

        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<EncoderCommand>(&payload) {
                Ok(cmd) => match axes.get_mut(&cmd.channel) {
                    Some((axis, _)) => axis.apply(&cmd),
                    None => warn!("Command for unknown channel {}", cmd.channel),
                },
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        if args.go_silent_after > 0 && frames >= args.go_silent_after {
            continue;
        }

        for (&channel, (axis, ticks_per_rev)) in axes.iter_mut() {
            axis.step(period, *ticks_per_rev);
            frames += 1;

            let mut tokens = axis.tokens();
            if args.drop_every > 0 && frames % args.drop_every == 0 {
                tokens[0] = "garbage".to_string();
            }
            let frame = RawFeedback { channel, tokens };
            pub_feedback.put(serde_json::to_string(&frame)?).await?;
        }

        if args.go_silent_after > 0 && frames >= args.go_silent_after {
            info!("Going silent after {} frames", frames);
        }
    }
}
