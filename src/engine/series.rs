//! Time-ordered chart series

use std::collections::VecDeque;

use crate::backend::types::Bar;

/// How a merged bar changed the series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Newer than every stored bar
    Appended,
    /// Older than the newest bar, placed in sorted position
    Inserted,
    /// Same time as a stored bar, which it replaced
    Replaced,
    /// Older than everything a full buffer retains
    Discarded,
}

/// Ordered, deduplicated bar series with a retention limit.
///
/// Bars are kept strictly increasing by `time`. A bar with a known `time` replaces the
/// stored one, a bar with a new `time` is inserted where it belongs. Once `capacity` is
/// exceeded the oldest bars are evicted.
#[derive(Debug, Clone)]
pub struct ChartSeriesBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl ChartSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn merge(&mut self, bar: Bar) -> MergeOutcome {
        if self.bars.back().is_none_or(|last| bar.time > last.time) {
            self.bars.push_back(bar);
            self.evict();
            return MergeOutcome::Appended;
        }

        match self.bars.binary_search_by(|stored| stored.time.cmp(&bar.time)) {
            Ok(idx) => {
                self.bars[idx] = bar;
                MergeOutcome::Replaced
            }
            Err(0) if self.bars.len() >= self.capacity => MergeOutcome::Discarded,
            Err(idx) => {
                self.bars.insert(idx, bar);
                self.evict();
                MergeOutcome::Inserted
            }
        }
    }

    fn evict(&mut self) {
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }

    pub fn reset(&mut self) {
        self.bars.clear();
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
