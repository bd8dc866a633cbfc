//! Remote node identity and liveness tracking.
//!
//! A remote is addressed by an [`Identifier`]; the routing table wraps it
//! in a [`RemoteNode`] that tracks when it last answered, when it last
//! asked us anything, and how many answers it owes. Classification into
//! good/questionable/bad happens at read time against a caller-supplied
//! "now" so that bucket decisions and tests stay deterministic.

use std::time::{Duration, Instant};

use crate::address::NetworkAddress;
use crate::id::NodeId;

/// A remote endpoint plus its node id, when known.
///
/// The id may be absent only for a bootstrap contact whose id has not
/// been learned yet; such contacts are never admitted to a routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub address: NetworkAddress,
    pub node_id: Option<NodeId>,
}

impl Identifier {
    pub fn new(address: NetworkAddress, node_id: Option<NodeId>) -> Self {
        Self { address, node_id }
    }

    pub fn with_id(address: NetworkAddress, node_id: NodeId) -> Self {
        Self::new(address, Some(node_id))
    }

    pub fn unresolved(address: NetworkAddress) -> Self {
        Self::new(address, None)
    }
}

/// Liveness classification of a tracked remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Good,
    Questionable,
    Bad,
}

/// A remote may miss this many responses before it turns bad.
pub const MAX_MISSING_RESPONSES: u32 = 2;

/// Activity inside this window keeps a node good.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(15 * 60);

/// A remote tracked by a routing-table bucket.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    pub identifier: Identifier,
    last_response: Option<Instant>,
    last_query: Option<Instant>,
    missing_responses: u32,
}

impl RemoteNode {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            last_response: None,
            last_query: None,
            missing_responses: 0,
        }
    }

    /// Classifies the node as of `now`.
    ///
    /// Too many owed responses always means bad, even when the remote
    /// still sends traffic (error replies bump both the response
    /// timestamp and the miss counter).
    pub fn state(&self, now: Instant) -> NodeState {
        if self.missing_responses > MAX_MISSING_RESPONSES {
            return NodeState::Bad;
        }
        let fresh = |at: Option<Instant>| {
            at.is_some_and(|t| now.saturating_duration_since(t) < FRESHNESS_WINDOW)
        };
        if fresh(self.last_response) || (fresh(self.last_query) && self.last_response.is_some()) {
            return NodeState::Good;
        }
        NodeState::Questionable
    }

    /// The later of the last query and the last response.
    pub fn last_interaction(&self) -> Option<Instant> {
        match (self.last_query, self.last_response) {
            (Some(q), Some(r)) => Some(q.max(r)),
            (q, r) => q.or(r),
        }
    }

    pub fn missing_responses(&self) -> u32 {
        self.missing_responses
    }

    pub fn last_response(&self) -> Option<Instant> {
        self.last_response
    }

    pub fn last_query(&self) -> Option<Instant> {
        self.last_query
    }

    pub fn received_response(&mut self, now: Instant) {
        self.last_response = Some(now);
        self.missing_responses = self.missing_responses.saturating_sub(1);
    }

    pub fn received_query(&mut self, now: Instant) {
        self.last_query = Some(now);
    }

    /// An error reply counts as contact but not as a good answer.
    pub fn received_error(&mut self, now: Instant) {
        self.last_response = Some(now);
        self.missing_responses += 1;
    }

    pub fn response_timed_out(&mut self) {
        self.missing_responses += 1;
    }
}
