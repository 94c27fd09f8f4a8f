/// Highest sequence number handed out before wrapping back to 1.
pub const MAX_SEQUENCE: u32 = 0xFFFF_FFFE;

/// Monotonic status-request sequence numbers in `1..=MAX_SEQUENCE`.
///
/// Zero is never emitted; after [`MAX_SEQUENCE`] the counter restarts at 1.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SequenceCounter {
    last: u32,
}

impl SequenceCounter {
    /// Creates a counter whose first value is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter that continues after `last`.
    ///
    /// ```
    /// use jebao::SequenceCounter;
    ///
    /// let mut counter = SequenceCounter::starting_after(0xFFFF_FFFD);
    /// assert_eq!(0xFFFF_FFFE, counter.next_sequence());
    /// assert_eq!(1, counter.next_sequence());
    /// ```
    #[must_use]
    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    /// Allocates the next sequence number.
    pub fn next_sequence(&mut self) -> u32 {
        self.last = if self.last == 0 || self.last >= MAX_SEQUENCE {
            1
        } else {
            self.last + 1
        };
        self.last
    }

    /// Returns the most recently allocated number, if any.
    #[must_use]
    pub fn last(&self) -> Option<u32> {
        (self.last != 0).then_some(self.last)
    }
}
