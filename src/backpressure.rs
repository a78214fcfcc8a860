/// Default high-water mark in bytes
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Per-stream construction options
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Advisory buffered-size threshold controlling backpressure
    pub high_water_mark: usize,
}

impl StreamConfig {
    /// Config with a custom high-water mark
    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// High-water-mark flow control for one buffer.
///
/// Pause is inclusive: a write that finds the buffer already at the mark is
/// refused more input, so the buffer tops out at the mark plus one in-flight
/// chunk. Release requires crossing strictly below the mark, so a buffer
/// sitting exactly at the threshold cannot oscillate between states.
#[derive(Debug)]
pub struct FlowController {
    high_water_mark: usize,
    above_mark: bool,
}

impl FlowController {
    /// Create a controller for the given threshold
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            above_mark: false,
        }
    }

    /// Whether the caller should stop writing. `pre_size` is the accounted
    /// size before the incoming unit lands. Latches the above-mark state
    /// consumed by `on_drain`.
    pub fn should_pause(&mut self, pre_size: usize) -> bool {
        let pause = pre_size >= self.high_water_mark;
        if pause {
            self.above_mark = true;
        }
        pause
    }

    /// One-shot drain edge: true exactly when the accounted size has
    /// transitioned from at/above the mark to strictly below it.
    pub fn on_drain(&mut self, size: usize) -> bool {
        if self.above_mark && size < self.high_water_mark {
            self.above_mark = false;
            true
        } else {
            false
        }
    }

    /// Non-latching capacity probe
    pub fn has_capacity(&self, size: usize) -> bool {
        size < self.high_water_mark
    }

    /// Whether the latched above-mark state is set
    pub fn is_above(&self) -> bool {
        self.above_mark
    }

    /// The configured threshold
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}
