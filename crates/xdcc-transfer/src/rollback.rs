//! Overlap check for resumed transfers.

/// Result of feeding received bytes to a [`RollbackGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackProgress {
    /// Not enough bytes yet to cover the reference window.
    Pending,
    /// The window matched; the payload holds every byte buffered so far.
    Verified(Vec<u8>),
    /// The first received bytes differ from what is stored.
    Mismatch,
}

/// Buffers the head of a resumed stream until it covers the stored reference
/// window, then compares the two.
#[derive(Debug)]
pub struct RollbackGuard {
    reference: Vec<u8>,
    buffer: Vec<u8>,
}

impl RollbackGuard {
    /// Guard against `reference`, the bytes stored at the resume offset.
    #[must_use]
    pub fn new(reference: Vec<u8>) -> Self {
        let capacity = reference.len();
        Self {
            reference,
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Bytes buffered so far.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed the next received chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> RollbackProgress {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < self.reference.len() {
            return RollbackProgress::Pending;
        }
        if self.buffer[..self.reference.len()] == self.reference[..] {
            RollbackProgress::Verified(std::mem::take(&mut self.buffer))
        } else {
            RollbackProgress::Mismatch
        }
    }
}
