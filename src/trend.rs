//! Short-term score trend
//!
//! Keeps a bounded window of recent scores and classifies their direction by
//! comparing the oldest and newest entries once the window is full.

use crate::config::DEFAULT_TREND_WINDOW;
use crate::types::{Score, Trend};
use std::collections::VecDeque;

/// Default oldest-to-newest change treated as noise
pub const DEFAULT_NOISE_MARGIN: u32 = 5;

#[derive(Debug, Clone)]
pub struct TrendTracker {
    window: VecDeque<Score>,
    window_size: usize,
    noise_margin: u32,
}

impl Default for TrendTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TREND_WINDOW, DEFAULT_NOISE_MARGIN)
    }
}

impl TrendTracker {
    /// Create a tracker keeping `window_size` scores (at least 1)
    pub fn new(window_size: usize, noise_margin: u32) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            noise_margin,
        }
    }

    /// Record a score and classify the current direction
    pub fn observe(&mut self, score: Score) -> Trend {
        self.window.push_back(score);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        self.current()
    }

    /// Direction of the current window; flat until the window is full
    pub fn current(&self) -> Trend {
        if !self.is_full() {
            return Trend::Flat;
        }
        let (Some(&oldest), Some(&newest)) = (self.window.front(), self.window.back()) else {
            return Trend::Flat;
        };

        let delta = i64::from(newest) - i64::from(oldest);
        let margin = i64::from(self.noise_margin);
        if delta > margin {
            Trend::Rising
        } else if delta < -margin {
            Trend::Falling
        } else {
            Trend::Flat
        }
    }

    pub fn is_full(&self) -> bool {
        self.window.len() >= self.window_size
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn scores(&self) -> impl Iterator<Item = &Score> {
        self.window.iter()
    }
}
