//! Refresh tick sources pacing the dispatcher.

use std::future::Future;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;

/// One scheduling opportunity, nominally one display refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub sequence: u64,
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: f64,
}

/// Monotonic millisecond clock anchored at creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of refresh ticks. `None` ends the session.
pub trait TickSource: Send {
    fn next_tick(&mut self) -> impl Future<Output = Option<Tick>> + Send;
}

/// Fixed-rate ticks from a tokio interval; late ticks are skipped, not
/// bunched up.
pub struct IntervalTicker {
    interval: Interval,
    clock: MonotonicClock,
    sequence: u64,
    last_ms: f64,
}

/// Shortest and longest tick period an [`IntervalTicker`] will use.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);
pub const MAX_TICK_PERIOD: Duration = Duration::from_secs(3600);

const FALLBACK_HZ: f64 = 60.0;

/// Tick period for `refresh_hz`, clamped to
/// [`MIN_TICK_PERIOD`]..=[`MAX_TICK_PERIOD`].
pub fn tick_period(refresh_hz: f64) -> Duration {
    if !(refresh_hz.is_finite() && refresh_hz > 0.0) {
        warn!("Invalid refresh rate {}, falling back to {} Hz", refresh_hz, FALLBACK_HZ);
        return Duration::from_secs_f64(1.0 / FALLBACK_HZ);
    }
    // Too slow to represent as a Duration
    let period = Duration::try_from_secs_f64(1.0 / refresh_hz).unwrap_or(Duration::MAX);

    let clamped = period.clamp(MIN_TICK_PERIOD, MAX_TICK_PERIOD);
    if clamped != period {
        warn!("Refresh rate {} Hz out of range, ticking every {:?}", refresh_hz, clamped);
    }
    clamped
}

impl IntervalTicker {
    pub fn new(refresh_hz: f64) -> Self {
        let mut interval = interval(tick_period(refresh_hz));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            clock: MonotonicClock::new(),
            sequence: 0,
            last_ms: f64::NEG_INFINITY,
        }
    }
}

impl TickSource for IntervalTicker {
    fn next_tick(&mut self) -> impl Future<Output = Option<Tick>> + Send {
        async move {
            self.interval.tick().await;
            self.sequence += 1;
            let now = self.clock.now_ms();
            // Keep timestamps strictly increasing even on a coarse clock
            self.last_ms = if now > self.last_ms { now } else { self.last_ms + 0.001 };
            Some(Tick {
                sequence: self.sequence,
                timestamp_ms: self.last_ms,
            })
        }
    }
}

/// Ticks pushed by an external refresh callback.
pub struct ExternalTicker {
    rx: Receiver<f64>,
    sequence: u64,
    last_ms: Option<f64>,
}

/// Producer half of an [`ExternalTicker`]. Dropping every sender ends the
/// tick stream.
#[derive(Clone)]
pub struct TickSender {
    tx: Sender<f64>,
    clock: MonotonicClock,
}

impl ExternalTicker {
    pub fn channel() -> (TickSender, ExternalTicker) {
        let (tx, rx) = flume::unbounded();
        (
            TickSender {
                tx,
                clock: MonotonicClock::new(),
            },
            ExternalTicker {
                rx,
                sequence: 0,
                last_ms: None,
            },
        )
    }
}

impl TickSender {
    /// Deliver a tick carrying the callback-provided timestamp. Returns
    /// `false` once the ticker is gone.
    pub fn tick(&self, timestamp_ms: f64) -> bool {
        self.tx.send(timestamp_ms).is_ok()
    }

    /// Deliver a tick stamped with this sender's monotonic clock.
    pub fn tick_now(&self) -> bool {
        self.tick(self.clock.now_ms())
    }
}

impl TickSource for ExternalTicker {
    fn next_tick(&mut self) -> impl Future<Output = Option<Tick>> + Send {
        async move {
            loop {
                let timestamp_ms = self.rx.recv_async().await.ok()?;
                if let Some(last) = self.last_ms {
                    if timestamp_ms <= last {
                        warn!("Ignoring tick at {} ms, not after {} ms", timestamp_ms, last);
                        continue;
                    }
                }
                self.last_ms = Some(timestamp_ms);
                self.sequence += 1;
                return Some(Tick {
                    sequence: self.sequence,
                    timestamp_ms,
                });
            }
        }
    }
}
