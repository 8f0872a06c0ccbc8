//! Sequenced terminal input.
//!
//! Clients number each keystroke batch so that input arriving out of order
//! (parallel HTTP requests, websocket reconnects) is still written to the
//! child in the order it was typed. Two sentinel sequence numbers bypass the
//! ordering: [`IGNORE_SEQUENCE`] is applied immediately and [`FLUSH_SEQUENCE`]
//! releases everything pending.

use std::collections::VecDeque;

use protocol::WriteStdinInput;

/// Sequence number of input that is applied in arrival order.
pub const IGNORE_SEQUENCE: i32 = -1;

/// Sequence number that releases every pending input and resets ordering.
pub const FLUSH_SEQUENCE: i32 = -2;

/// Pending inputs tolerated behind a gap before the queue force-flushes.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64;

/// One unit of input for a console process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Position in the client's input stream, or a sentinel.
    pub sequence: i32,
    /// Text to write to stdin.
    pub text: String,
    /// Send an interrupt (^C) instead of text.
    pub interrupt: bool,
    /// Echo the text into the output buffer for non-smart terminals.
    pub echo_input: bool,
}

impl Input {
    /// Unsequenced text input.
    pub fn text(text: impl Into<String>, echo_input: bool) -> Self {
        Self {
            sequence: IGNORE_SEQUENCE,
            text: text.into(),
            interrupt: false,
            echo_input,
        }
    }

    /// Unsequenced interrupt.
    pub fn interrupt() -> Self {
        Self {
            sequence: IGNORE_SEQUENCE,
            text: String::new(),
            interrupt: true,
            echo_input: false,
        }
    }

    /// An input that carries neither text nor an interrupt.
    pub fn is_empty(&self) -> bool {
        !self.interrupt && self.text.is_empty()
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::text("", false)
    }
}

impl From<WriteStdinInput> for Input {
    fn from(input: WriteStdinInput) -> Self {
        Self {
            sequence: input.sequence,
            text: input.text,
            interrupt: input.interrupt,
            echo_input: input.echo_input,
        }
    }
}

/// Reorders sequenced input.
///
/// Not synchronized; the owning process guards it with its input/output lock.
#[derive(Debug)]
pub struct InputQueue {
    /// Inputs ready to be applied, in order.
    ready: VecDeque<Input>,
    /// Sequenced inputs waiting for a gap to fill, in arrival order.
    pending: Vec<Input>,
    next_sequence: i32,
    flush_threshold: usize,
}

impl InputQueue {
    /// Creates a queue expecting sequence 0 first.
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            ready: VecDeque::new(),
            pending: Vec::new(),
            next_sequence: 0,
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Adds an input.
    pub fn enque(&mut self, input: Input) {
        match input.sequence {
            IGNORE_SEQUENCE => self.ready.push_back(input),
            FLUSH_SEQUENCE => {
                self.release_pending();
                self.ready.push_back(input);
                self.next_sequence = 0;
            }
            seq if seq < self.next_sequence => {
                tracing::debug!(
                    sequence = seq,
                    expected = self.next_sequence,
                    "Input sequence already passed, applying immediately"
                );
                self.ready.push_back(input);
            }
            _ => self.pending.push(input),
        }
    }

    /// Removes the next input that may be applied.
    ///
    /// Returns `None` when the queue is empty or the next expected sequence
    /// has not arrived yet and fewer than the flush threshold inputs are
    /// waiting behind it.
    pub fn deque(&mut self) -> Option<Input> {
        if let Some(input) = self.ready.pop_front() {
            return Some(input);
        }

        if let Some(pos) = self
            .pending
            .iter()
            .position(|i| i.sequence == self.next_sequence)
        {
            self.next_sequence += 1;
            return Some(self.pending.remove(pos));
        }

        if self.pending.len() >= self.flush_threshold {
            tracing::warn!(
                pending = self.pending.len(),
                expected = self.next_sequence,
                "Input sequence gap not filled, flushing pending input"
            );
            if let Some(max) = self.pending.iter().map(|i| i.sequence).max() {
                self.next_sequence = max + 1;
            }
            self.release_pending();
            return self.ready.pop_front();
        }

        None
    }

    /// Removes every input that may currently be applied.
    pub fn drain_ready(&mut self) -> Vec<Input> {
        std::iter::from_fn(|| self.deque()).collect()
    }

    /// Number of queued inputs, ready or pending.
    pub fn len(&self) -> usize {
        self.ready.len() + self.pending.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_pending(&mut self) {
        self.ready.extend(self.pending.drain(..));
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_THRESHOLD)
    }
}
