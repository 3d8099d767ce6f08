//! Process-wide adaptive rate limiter
//!
//! A single actor task owns the delay state. Workers talk to it through a
//! cloneable [`RateLimiterHandle`]:
//! - `acquire` waits until the next request slot is granted
//! - `report_block` lengthens the spacing (capped at the maximum) and pushes
//!   the next grant at least one lengthened interval out
//! - `report_success` lets the spacing decay back toward the minimum
//!
//! Grants are serialized by the actor, so the spacing holds across every
//! worker in the process.

use citemap_common::config::HarvestSettings;
use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Rate limiter tuning
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Spacing between grants when upstream is healthy
    pub min_interval: Duration,
    /// Ceiling for the adaptive spacing
    pub max_interval: Duration,
    /// Uniform random extra spacing (0..=jitter) per grant
    pub jitter: Duration,
    /// Spacing multiplier applied on every reported block
    pub block_multiplier: f64,
    /// Spacing multiplier applied on every reported success (< 1.0)
    pub success_decay: f64,
}

impl RateLimiterConfig {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            min_interval: interval,
            max_interval: interval,
            jitter: Duration::ZERO,
            block_multiplier: 1.0,
            success_decay: 1.0,
        }
    }
}

impl From<&HarvestSettings> for RateLimiterConfig {
    fn from(settings: &HarvestSettings) -> Self {
        Self {
            min_interval: Duration::from_millis(settings.min_request_interval_ms),
            max_interval: Duration::from_millis(settings.max_request_interval_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            block_multiplier: 2.0,
            success_decay: 0.8,
        }
    }
}

#[derive(Debug)]
enum Command {
    Acquire(oneshot::Sender<()>),
    ReportBlock,
    ReportSuccess,
    CurrentInterval(oneshot::Sender<Duration>),
}

/// Cloneable handle to the rate limiter actor
#[derive(Debug, Clone)]
pub struct RateLimiterHandle {
    tx: mpsc::Sender<Command>,
}

impl RateLimiterHandle {
    /// Spawn the actor on the current tokio runtime
    pub fn spawn(config: RateLimiterConfig) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let actor = RateLimiterActor {
            current: config.min_interval,
            config,
            next_slot: None,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Wait for permission to send one upstream request
    pub async fn acquire(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Acquire(reply_tx)).await.is_err() {
            tracing::warn!("Rate limiter stopped, proceeding without delay");
            return;
        }
        let _ = reply_rx.await;
    }

    /// Upstream signalled a block; lengthen the spacing
    pub async fn report_block(&self) {
        let _ = self.tx.send(Command::ReportBlock).await;
    }

    /// A request succeeded; let the spacing decay
    pub async fn report_success(&self) {
        let _ = self.tx.send(Command::ReportSuccess).await;
    }

    /// Current base spacing (before jitter)
    pub async fn current_interval(&self) -> Option<Duration> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::CurrentInterval(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

struct RateLimiterActor {
    config: RateLimiterConfig,
    current: Duration,
    next_slot: Option<Instant>,
}

impl RateLimiterActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Acquire(reply) => {
                    if let Some(next_slot) = self.next_slot {
                        if next_slot > Instant::now() {
                            tracing::trace!(
                                wait_ms = (next_slot - Instant::now()).as_millis() as u64,
                                "Rate limiting: waiting for next slot"
                            );
                            tokio::time::sleep_until(next_slot).await;
                        }
                    }
                    self.next_slot = Some(Instant::now() + self.current + self.jitter());
                    let _ = reply.send(());
                }
                Command::ReportBlock => {
                    let lengthened = self
                        .current
                        .max(Duration::from_millis(1))
                        .mul_f64(self.config.block_multiplier.max(1.0));
                    self.current = lengthened
                        .min(self.config.max_interval)
                        .max(self.config.min_interval);
                    let earliest = Instant::now() + self.current;
                    self.next_slot = Some(
                        self.next_slot
                            .map_or(earliest, |slot| slot.max(earliest)),
                    );
                    tracing::warn!(
                        interval_ms = self.current.as_millis() as u64,
                        "Upstream block reported, request spacing lengthened"
                    );
                }
                Command::ReportSuccess => {
                    let decayed = self
                        .current
                        .mul_f64(self.config.success_decay.clamp(0.0, 1.0));
                    self.current = decayed.max(self.config.min_interval);
                }
                Command::CurrentInterval(reply) => {
                    let _ = reply.send(self.current);
                }
            }
        }
        tracing::debug!("Rate limiter actor stopped");
    }

    fn jitter(&self) -> Duration {
        if self.config.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.config.jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
