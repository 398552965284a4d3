//! Pacing between sequential model calls.
//!
//! Key rotation spreads load over credentials, but providers also enforce an
//! aggregate per-project rate. The extraction driver therefore pauses between
//! pages. The pause policy is a [`Throttle`] so it can be swapped (or
//! disabled in tests) without touching the driver.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

/// Called by the driver between two consecutive page calls.
#[async_trait]
pub trait Throttle: Send + Sync {
    async fn pause(&self);
}

/// Sleep a fixed amount every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait]
impl Throttle for FixedDelay {
    async fn pause(&self) {
        if !self.0.is_zero() {
            debug!("Throttle: sleeping {:?}", self.0);
            sleep(self.0).await;
        }
    }
}

/// Guarantee a minimum spacing between successive `pause()` returns.
///
/// Unlike [`FixedDelay`] the time already spent in the model call counts
/// towards the interval, so a slow call is followed by a shorter pause.
#[derive(Debug)]
pub struct IntervalGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    fn next_release(&self) -> Option<Instant> {
        let last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        last.map(|t| t + self.interval)
    }
}

#[async_trait]
impl Throttle for IntervalGate {
    async fn pause(&self) {
        if let Some(release) = self.next_release() {
            if release > Instant::now() {
                debug!("Throttle: waiting for interval gate");
                sleep_until(release).await;
            }
        }
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
    }
}

/// No pacing at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Throttle for NoDelay {
    async fn pause(&self) {}
}
