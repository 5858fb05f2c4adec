//! Overflow queue for service discovery requests
//!
//! Requests that arrive while a discovery session is active wait here and are
//! started strictly in arrival order. Duplicates for the same peer are kept.
//! The queue accepts at most `limit` requests, never more than
//! [`MAX_PENDING_DISCOVERIES`].

use crate::{
    PeerAddress,
    constants::{DEFAULT_PENDING_DISCOVERIES, MAX_PENDING_DISCOVERIES},
    discovery::DiscoveryRequest,
};
use heapless::Deque;

/// FIFO of deferred service discovery requests
#[derive(Debug)]
pub struct RequestQueue {
    requests: Deque<DiscoveryRequest, MAX_PENDING_DISCOVERIES>,
    limit: usize,
}

impl RequestQueue {
    /// Create an empty queue holding up to `limit` requests
    ///
    /// Limits above [`MAX_PENDING_DISCOVERIES`] are clamped to it.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            requests: Deque::new(),
            limit: if limit < MAX_PENDING_DISCOVERIES {
                limit
            } else {
                MAX_PENDING_DISCOVERIES
            },
        }
    }

    /// Append a request at the back
    ///
    /// # Errors
    /// Hands the request back when the queue is full.
    pub fn push(&mut self, request: DiscoveryRequest) -> Result<(), DiscoveryRequest> {
        if self.requests.len() >= self.limit {
            return Err(request);
        }
        self.requests.push_back(request)
    }

    /// Most requests the queue accepts
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Take the oldest request
    pub fn pop(&mut self) -> Option<DiscoveryRequest> {
        self.requests.pop_front()
    }

    /// Number of waiting requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no request is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Whether a request for `peer` is waiting
    #[must_use]
    pub fn contains_peer(&self, peer: PeerAddress) -> bool {
        self.requests.iter().any(|request| request.peer == peer)
    }

    /// Peers of the waiting requests, oldest first
    pub fn peers(&self) -> impl Iterator<Item = PeerAddress> + '_ {
        self.requests.iter().map(|request| request.peer)
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_DISCOVERIES)
    }
}
