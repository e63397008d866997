// Fixed-rate loop with per-channel feedback watchdog
// Each tick: take user commands, decode controller feedback, check watchdogs,
// then flush encoder commands to the controller process and publish state.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    loop_period, RuntimeConfig, LOOP_HZ, TOPIC_CMD, TOPIC_CMD_REJECTED, TOPIC_CONTROLLER_CMD,
    TOPIC_CONTROLLER_FEEDBACK, TOPIC_FAULT, TOPIC_FEEDBACK, TOPIC_HEALTH,
};
use crate::messages::{ChannelCommand, CommandRejection, EncoderCommand, RawFeedback, Stamp};
use crate::router::{ChannelRouter, RouteError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn put_json<T: Serialize>(
    publisher: &zenoh::pubsub::Publisher<'_>,
    value: &T,
) -> Result<(), BoxError> {
    let json = serde_json::to_string(value)?;
    publisher.put(json).await?;
    Ok(())
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    run_with_rate(config, LOOP_HZ).await
}

pub async fn run_with_rate(config: RuntimeConfig, loop_hz: u64) -> Result<(), BoxError> {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<EncoderCommand>();
    let router = ChannelRouter::new(&config, cmd_tx)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD).await?;
    let sub_feedback = session.declare_subscriber(TOPIC_CONTROLLER_FEEDBACK).await?;
    let pub_controller = session.declare_publisher(TOPIC_CONTROLLER_CMD).await?;
    let pub_rejected = session.declare_publisher(TOPIC_CMD_REJECTED).await?;
    let pub_feedback = session.declare_publisher(TOPIC_FEEDBACK).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
    let pub_fault = session.declare_publisher(TOPIC_FAULT).await?;

    let epoch = Instant::now();
    let mut tick = interval(loop_period(loop_hz));
    let mut pending_feedback: VecDeque<RawFeedback> = VecDeque::new();

    info!(
        "Runtime started: {}Hz loop, {} channel(s), stale policy {:?}",
        loop_hz,
        router.channels().len(),
        config.stale_policy
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD, TOPIC_CONTROLLER_FEEDBACK);
    info!(
        "Publishing to: {}, {}, {}, {}",
        TOPIC_CONTROLLER_CMD, TOPIC_FEEDBACK, TOPIC_HEALTH, TOPIC_FAULT
    );

    loop {
        tick.tick().await;

        // 1. Drain all pending user commands (non-blocking)
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            let cmd = match serde_json::from_slice::<ChannelCommand>(&payload) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    continue;
                }
            };
            if let Err(e) = router.dispatch_command(&cmd) {
                if let RouteError::UnknownChannel(channel) = &e {
                    warn!("Command for unknown channel {}", channel);
                }
                let rejection = CommandRejection {
                    channel: cmd.channel,
                    reason: e.to_string(),
                };
                put_json(&pub_rejected, &rejection).await?;
            }
        }

        // 2. Drain controller feedback frames and decode them
        while let Ok(Some(sample)) = sub_feedback.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<RawFeedback>(&payload) {
                Ok(raw) => pending_feedback.push_back(raw),
                Err(e) => warn!("Failed to parse feedback frame: {}", e),
            }
        }
        let now = Stamp::since(epoch);
        for report in router.drain_feedback(&mut pending_feedback, now) {
            put_json(&pub_feedback, &report).await?;
        }

        // 3. Watchdog
        for fault in router.check_timeouts(now) {
            put_json(&pub_fault, &fault).await?;
        }

        // 4. Flush encoder commands (including safe stops) to the controller
        while let Ok(cmd) = cmd_rx.try_recv() {
            debug!("Forwarding {:?}", cmd);
            put_json(&pub_controller, &cmd).await?;
        }

        // 5. Publish health
        for status in router.statuses() {
            put_json(&pub_health, &status).await?;
        }
    }
}
