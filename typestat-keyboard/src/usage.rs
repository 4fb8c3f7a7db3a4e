//! Hand and finger streak accounting
//!
//! A streak is a run of consecutive keystrokes on the same hand (or
//! finger). Its length is committed once the run provably ended: when a
//! different bucket is used, or for hands, when no keystroke arrived
//! within [`HAND_IDLE_FLUSH`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Idle window after which a running hand streak is committed
pub const HAND_IDLE_FLUSH: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn code(self) -> u8 {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Hand::Left),
            1 => Some(Hand::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hand::Left => f.pad("left"),
            Hand::Right => f.pad("right"),
        }
    }
}

/// Finger id 0..=9; 0..=4 are the left hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Finger(u8);

impl Finger {
    pub const COUNT: u8 = 10;

    pub fn new(id: u8) -> Option<Self> {
        (id < Self::COUNT).then_some(Self(id))
    }

    pub fn id(self) -> u8 {
        self.0
    }

    pub fn hand(self) -> Hand {
        if self.0 < 5 {
            Hand::Left
        } else {
            Hand::Right
        }
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A finished run of `length` keystrokes on `bucket`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Streak<B> {
    pub bucket: B,
    pub length: u32,
}

/// Running counts per bucket plus the bucket used last
#[derive(Debug, Clone)]
pub struct StreakCounter<B> {
    counts: HashMap<B, u32>,
    last_used: Option<B>,
}

impl<B> Default for StreakCounter<B> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            last_used: None,
        }
    }
}

impl<B: Copy + Eq + Hash> StreakCounter<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a keystroke; returns the previous bucket's streak if this one
    /// ended it
    pub fn record(&mut self, bucket: B) -> Option<Streak<B>> {
        *self.counts.entry(bucket).or_default() += 1;
        if self.last_used == Some(bucket) {
            return None;
        }
        let flushed = self.last_used.and_then(|previous| self.take(previous));
        self.last_used = Some(bucket);
        flushed
    }

    /// Commit the running streak regardless of what comes next
    pub fn flush(&mut self) -> Option<Streak<B>> {
        let last = self.last_used.take()?;
        self.take(last)
    }

    /// Running count for a bucket
    pub fn current(&self, bucket: B) -> u32 {
        self.counts.get(&bucket).copied().unwrap_or(0)
    }

    pub fn last_used(&self) -> Option<B> {
        self.last_used
    }

    /// Discard all state without committing
    pub fn reset(&mut self) {
        self.counts.clear();
        self.last_used = None;
    }

    fn take(&mut self, bucket: B) -> Option<Streak<B>> {
        match self.counts.remove(&bucket) {
            Some(length) if length > 0 => Some(Streak { bucket, length }),
            _ => None,
        }
    }
}

/// Rearm-or-fire deadline
#[derive(Debug, Clone)]
pub struct IdleTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl IdleTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn rearm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Hand streaks, committed on hand change or after an idle window
#[derive(Debug, Clone)]
pub struct HandUsage {
    counter: StreakCounter<Hand>,
    timer: IdleTimer,
}

impl Default for HandUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl HandUsage {
    pub fn new() -> Self {
        Self {
            counter: StreakCounter::new(),
            timer: IdleTimer::new(HAND_IDLE_FLUSH),
        }
    }

    pub fn record(&mut self, hand: Hand, now: Instant) -> Option<Streak<Hand>> {
        let flushed = self.counter.record(hand);
        self.timer.rearm(now);
        flushed
    }

    /// When [`poll_idle`](Self::poll_idle) should next be called
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Commit the running streak if the idle window elapsed
    pub fn poll_idle(&mut self, now: Instant) -> Option<Streak<Hand>> {
        if !self.timer.is_expired(now) {
            return None;
        }
        self.timer.cancel();
        self.counter.flush()
    }

    pub fn current(&self, hand: Hand) -> u32 {
        self.counter.current(hand)
    }

    /// Discard streak state and cancel the timer
    pub fn reset(&mut self) {
        self.counter.reset();
        self.timer.cancel();
    }
}

/// Finger streaks, committed only on finger change
#[derive(Debug, Clone, Default)]
pub struct FingerUsage {
    counter: StreakCounter<Finger>,
}

impl FingerUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, finger: Finger) -> Option<Streak<Finger>> {
        self.counter.record(finger)
    }

    pub fn current(&self, finger: Finger) -> u32 {
        self.counter.current(finger)
    }

    pub fn reset(&mut self) {
        self.counter.reset();
    }
}
