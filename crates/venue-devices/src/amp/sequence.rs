//! Per-controller request sequence numbers.

/// Sequence counter. Issues 1..=65535 and wraps back to 1; 0 is never issued.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    current: u16,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next sequence number.
    pub fn next(&mut self) -> u16 {
        self.current = match self.current.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.current
    }

    /// Last issued number, 0 before the first request.
    pub fn current(&self) -> u16 {
        self.current
    }
}
