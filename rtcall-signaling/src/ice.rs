//! Local ICE candidate buffering
//!
//! Candidates discovered while a call is still being set up are held here and
//! released in discovery order once the call is confirmed. The buffer is owned
//! by [`crate::call::CallStateMachine`], which is the only caller of
//! [`IceCandidateBuffer::flush`] and does so solely on the transition into
//! `IN_CALL`.

use crate::protocol::IceCandidate;
use tracing::warn;

/// Default cap on buffered candidates
pub const DEFAULT_MAX_BUFFERED_CANDIDATES: usize = 64;

/// Ordered queue of local candidates awaiting call confirmation
#[derive(Debug, Clone)]
pub struct IceCandidateBuffer {
    candidates: Vec<IceCandidate>,
    max_candidates: usize,
    dropped: u64,
}

impl IceCandidateBuffer {
    /// Create a buffer holding at most `max_candidates`
    pub fn new(max_candidates: usize) -> Self {
        Self {
            candidates: Vec::new(),
            max_candidates,
            dropped: 0,
        }
    }

    /// Append a candidate; returns false if the cap was hit and it was dropped
    pub fn add(&mut self, candidate: IceCandidate) -> bool {
        if self.candidates.len() >= self.max_candidates {
            self.dropped += 1;
            warn!(
                "ICE candidate buffer full ({} candidates), dropping {}",
                self.max_candidates, candidate.candidate
            );
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    /// Drain every buffered candidate in discovery order
    pub(crate) fn flush(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.candidates)
    }

    /// Drop every buffered candidate without sending; returns how many
    pub fn discard(&mut self) -> usize {
        let discarded = self.candidates.len();
        self.candidates.clear();
        discarded
    }

    /// Number of buffered candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates rejected because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Buffered candidates, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &IceCandidate> {
        self.candidates.iter()
    }
}

impl Default for IceCandidateBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_CANDIDATES)
    }
}
