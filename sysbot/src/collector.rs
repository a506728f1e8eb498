use crate::config::{CollectorConfig, DeadlineMode};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Time source for the collector, injectable so tests run without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real time, backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// A live command channel as seen by the collector.
#[trait_variant::make(OutputChannel: Send)]
pub trait LocalOutputChannel {
    /// True when a read would return data without waiting.
    fn recv_ready(&mut self) -> bool;

    /// Takes at most `max` bytes of already-received stdout.
    fn recv(&mut self, max: usize) -> crate::Result<Vec<u8>>;

    /// The remote side closed the channel and every buffered byte was read.
    fn is_exhausted(&mut self) -> bool;

    fn exit_status(&self) -> Option<u32>;

    fn take_stderr(&mut self) -> Vec<u8>;

    async fn close(self) -> crate::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Collected {
    pub text: String,
    /// Collection stopped on the deadline rather than on channel close.
    pub timed_out: bool,
}

/// Drains a command channel into text under a wall-clock budget.
///
/// The channel is polled rather than awaited, so a channel that never
/// produces anything, or never stops producing, is still bounded by the
/// configured timeout.
#[derive(Debug, Clone)]
pub struct Collector<K = TokioClock> {
    config: CollectorConfig,
    clock: K,
}

impl Collector<TokioClock> {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            clock: TokioClock,
        }
    }
}

impl Default for Collector<TokioClock> {
    fn default() -> Self {
        Self::new(CollectorConfig::default())
    }
}

impl<K: Clock> Collector<K> {
    pub fn with_clock(config: CollectorConfig, clock: K) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub async fn collect<C: OutputChannel>(&self, channel: &mut C) -> crate::Result<Collected> {
        let started = self.clock.now();
        let mut window_start = started;
        let mut buffer = Vec::new();
        let mut timed_out = false;

        'poll: loop {
            // drain everything already buffered before sleeping again
            while channel.recv_ready() {
                let chunk = channel.recv(self.config.chunk_size)?;
                if chunk.is_empty() {
                    break;
                }
                buffer.extend_from_slice(&chunk);
                let now = self.clock.now();
                if matches!(self.config.deadline, DeadlineMode::ResetOnRead { .. }) {
                    window_start = now;
                }
                if self.expired(started, window_start, now) {
                    timed_out = !channel.is_exhausted();
                    break 'poll;
                }
            }
            if channel.is_exhausted() {
                break;
            }
            if self.expired(started, window_start, self.clock.now()) {
                timed_out = true;
                break;
            }
            self.clock.sleep(self.config.poll_interval).await;
        }

        debug!(
            bytes = buffer.len(),
            timed_out,
            elapsed_ms = self.clock.now().duration_since(started).as_millis() as u64,
            "channel output collected"
        );

        Ok(Collected {
            text: String::from_utf8_lossy(&buffer).into_owned(),
            timed_out,
        })
    }

    fn expired(&self, started: Instant, window_start: Instant, now: Instant) -> bool {
        let over_window = now.duration_since(window_start) >= self.config.timeout;
        let over_ceiling = match self.config.deadline {
            DeadlineMode::Fixed => false,
            DeadlineMode::ResetOnRead { ceiling } => now.duration_since(started) >= ceiling,
        };
        over_window || over_ceiling
    }
}
