//! Client-side step buffering and pacing
//!
//! Steps arrive over UDP out of order, duplicated, late or in bursts. The
//! scheduler holds them in a tick-ordered buffer and releases them strictly
//! in sequence, one per local tick interval. When a backlog builds up it
//! replays several steps in one frame to catch up; it never skips a tick,
//! since a skipped tick is a guaranteed desync. A missing tick stalls
//! application until it arrives.
//!
//! Until the first snapshot is loaded the scheduler has no starting point:
//! it keeps the most recent packets and applies nothing.

use shared::{Error, FormatError, StepLayout, StepPacket, Tick};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Most packets held at once; also how far ahead of the last applied tick a packet may be.
    pub capacity: usize,
    /// Ready backlog above which several packets are applied per frame.
    pub catch_up_threshold: usize,
    /// Most packets applied in a single frame.
    pub max_catch_up: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            catch_up_threshold: 3,
            max_catch_up: 8,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.capacity == 0 {
            return Err(Error::Config("scheduler capacity must be at least 1".to_string()));
        }
        if self.max_catch_up == 0 {
            return Err(Error::Config("max catch-up must be at least 1".to_string()));
        }
        if self.catch_up_threshold >= self.capacity {
            return Err(Error::Config(format!(
                "catch-up threshold {} must be below the capacity {}",
                self.catch_up_threshold, self.capacity
            )));
        }
        Ok(())
    }
}

/// What happened to a pushed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Buffered,
    /// At or before the last applied tick.
    Stale,
    /// Already buffered.
    Duplicate,
    /// Too far ahead or buffer full; a resync is required.
    Overflow,
}

#[derive(Debug)]
pub struct StepScheduler {
    config: SchedulerConfig,
    tick_interval: Duration,
    elapsed: Duration,
    buffer: BTreeMap<Tick, StepPacket>,
    last_applied: Option<Tick>,
    resync_needed: bool,
}

impl StepScheduler {
    pub fn new(config: SchedulerConfig, tick_interval: Duration) -> Self {
        Self {
            config,
            tick_interval,
            elapsed: Duration::ZERO,
            buffer: BTreeMap::new(),
            last_applied: None,
            resync_needed: false,
        }
    }

    pub fn set_tick_interval(&mut self, tick_interval: Duration) {
        self.tick_interval = tick_interval;
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn last_applied(&self) -> Option<Tick> {
        self.last_applied
    }

    /// True once a snapshot has given the scheduler a starting tick.
    pub fn is_initialized(&self) -> bool {
        self.last_applied.is_some()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn needs_resync(&self) -> bool {
        self.resync_needed
    }

    /// Offers a packet to the buffer.
    pub fn push(&mut self, packet: StepPacket) -> Admission {
        let tick = packet.tick();
        if self.buffer.contains_key(&tick) {
            return Admission::Duplicate;
        }

        let Some(last) = self.last_applied else {
            self.buffer.insert(tick, packet);
            while self.buffer.len() > self.config.capacity {
                if let Some((evicted, _)) = self.buffer.pop_first() {
                    if evicted == tick {
                        return Admission::Overflow;
                    }
                }
            }
            return Admission::Buffered;
        };

        if tick <= last {
            return Admission::Stale;
        }
        if tick > last + self.config.capacity as Tick || self.buffer.len() >= self.config.capacity
        {
            self.resync_needed = true;
            return Admission::Overflow;
        }

        self.buffer.insert(tick, packet);
        Admission::Buffered
    }

    /// Decodes and pushes a raw step payload.
    pub fn push_bytes(
        &mut self,
        bytes: &[u8],
        layout: &StepLayout,
    ) -> Result<Admission, FormatError> {
        Ok(self.push(StepPacket::from_bytes(bytes, layout)?))
    }

    /// Number of packets that can be applied right now without a gap.
    pub fn ready(&self) -> usize {
        let Some(last) = self.last_applied else {
            return 0;
        };
        self.buffer
            .keys()
            .zip(last + 1..)
            .take_while(|(tick, expected)| **tick == *expected)
            .count()
    }

    /// Advances local time by `dt` and returns the packets due, in tick order.
    pub fn advance(&mut self, dt: Duration) -> Vec<StepPacket> {
        let Some(mut last) = self.last_applied else {
            return Vec::new();
        };

        self.elapsed += dt;
        if self.elapsed < self.tick_interval {
            return Vec::new();
        }

        let ready = self.ready();
        if ready == 0 {
            // Stalled on a gap: hold at the end of the interval.
            self.elapsed = self.tick_interval;
            return Vec::new();
        }

        let threshold = self.config.catch_up_threshold;
        let budget = if ready > threshold {
            (ready - threshold + 1).min(self.config.max_catch_up)
        } else {
            1
        };

        let mut due = Vec::with_capacity(budget);
        for _ in 0..budget {
            match self.buffer.remove(&(last + 1)) {
                Some(packet) => {
                    last += 1;
                    due.push(packet);
                }
                None => break,
            }
        }
        self.last_applied = Some(last);
        self.elapsed = (self.elapsed - self.tick_interval).min(self.tick_interval);
        due
    }

    /// Progress through the current tick interval, in `[0, 1]`.
    pub fn interpolation(&self) -> f32 {
        if self.tick_interval.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f32() / self.tick_interval.as_secs_f32()).clamp(0.0, 1.0)
    }

    /// Restarts from a freshly loaded snapshot of `tick`.
    pub fn reset_to(&mut self, tick: Tick) {
        let limit = tick + self.config.capacity as Tick;
        self.buffer.retain(|t, _| *t > tick && *t <= limit);
        self.last_applied = Some(tick);
        self.elapsed = Duration::ZERO;
        self.resync_needed = false;
    }

    /// Discards everything, returning to the uninitialized state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_applied = None;
        self.elapsed = Duration::ZERO;
        self.resync_needed = false;
    }
}
