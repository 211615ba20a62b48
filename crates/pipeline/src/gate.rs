//! Single-slot admission control.
//!
//! The gate doubles as the pipeline's state cell: one `AtomicU8` holds the
//! [`PipelineState`], and admission is a compare-and-swap from `Ready` to
//! `Busy`. At most one frame holds the slot at a time.

use std::{
    sync::atomic::{AtomicU8, AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Lowest accepted interval between two inference starts.
pub const MIN_INVOCATION_INTERVAL_FLOOR: Duration = Duration::from_millis(100);

pub const DEFAULT_MIN_INVOCATION_INTERVAL: Duration = Duration::from_millis(150);

const NEVER: u64 = u64::MAX;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Busy = 3,
    Disposed = 4,
    Failed = 5,
}

impl PipelineState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PipelineState::Uninitialized),
            1 => Some(PipelineState::Loading),
            2 => Some(PipelineState::Ready),
            3 => Some(PipelineState::Busy),
            4 => Some(PipelineState::Disposed),
            5 => Some(PipelineState::Failed),
            _ => None,
        }
    }
}

/// Result of asking the gate for the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Another frame holds the slot.
    Busy,
    /// Inside the minimum interval since the last start.
    TooSoon,
    /// The pipeline is not in a state that runs inference.
    NotReady,
}

#[derive(Debug)]
pub struct InferenceGate {
    state: AtomicU8,
    epoch: Instant,
    last_start: AtomicU64,
    previous_start: AtomicU64,
    min_interval_nanos: AtomicU64,
}

impl InferenceGate {
    pub fn new(min_interval: Duration) -> Self {
        let gate = Self {
            state: AtomicU8::new(PipelineState::Uninitialized as u8),
            epoch: Instant::now(),
            last_start: AtomicU64::new(NEVER),
            previous_start: AtomicU64::new(NEVER),
            min_interval_nanos: AtomicU64::new(0),
        };
        gate.set_min_interval(min_interval);
        gate
    }

    #[inline]
    pub fn state(&self) -> PipelineState {
        let value = self.state.load(Ordering::Acquire);
        PipelineState::from_u8(value).unwrap_or(PipelineState::Disposed)
    }

    /// Move `from -> to` if the gate is currently in `from`.
    #[inline]
    pub fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Disposed` unconditionally, returning the previous state.
    pub fn dispose(&self) -> PipelineState {
        let previous = self.state.swap(PipelineState::Disposed as u8, Ordering::AcqRel);
        PipelineState::from_u8(previous).unwrap_or(PipelineState::Disposed)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_nanos(self.min_interval_nanos.load(Ordering::Relaxed))
    }

    /// Set the interval, clamped to [`MIN_INVOCATION_INTERVAL_FLOOR`].
    /// Returns the value in effect.
    pub fn set_min_interval(&self, interval: Duration) -> Duration {
        let effective = interval.max(MIN_INVOCATION_INTERVAL_FLOOR);
        let nanos = u64::try_from(effective.as_nanos()).unwrap_or(u64::MAX - 1);
        self.min_interval_nanos.store(nanos, Ordering::Relaxed);
        effective
    }

    pub fn try_admit(&self, now: Instant) -> bool {
        self.admit(now) == Admission::Admitted
    }

    /// Claim the slot for a frame arriving at `now`.
    pub fn admit(&self, now: Instant) -> Admission {
        if let Err(current) = self.state.compare_exchange(
            PipelineState::Ready as u8,
            PipelineState::Busy as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match PipelineState::from_u8(current) {
                Some(PipelineState::Busy) => Admission::Busy,
                _ => Admission::NotReady,
            };
        }

        // Busy from here on: this thread is the only writer of the timestamps.
        let now_nanos = self.nanos_since_epoch(now);
        let last = self.last_start.load(Ordering::Acquire);
        let min_interval = self.min_interval_nanos.load(Ordering::Relaxed);

        if last != NEVER && now_nanos.saturating_sub(last) < min_interval {
            self.transition(PipelineState::Busy, PipelineState::Ready);
            return Admission::TooSoon;
        }

        self.previous_start.store(last, Ordering::Relaxed);
        self.last_start.store(now_nanos, Ordering::Release);
        Admission::Admitted
    }

    /// Give the slot back after a finished cycle, successful or not.
    #[inline]
    pub fn release(&self) {
        self.transition(PipelineState::Busy, PipelineState::Ready);
    }

    /// Give the slot back without charging the interval, for a frame that
    /// never reached the model.
    pub fn abort(&self) {
        let previous = self.previous_start.load(Ordering::Relaxed);
        self.last_start.store(previous, Ordering::Release);
        self.release();
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(NEVER - 1)
    }
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INVOCATION_INTERVAL)
    }
}
