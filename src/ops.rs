//! Iterative lookup operations.
//!
//! Each operation drives a sequence of queries toward a target id,
//! advancing on every transaction completion (response, error, timeout,
//! or cancellation). State changes are published on a watch channel;
//! once a terminal state is reached no further updates are emitted.
//!
//! Operations hold only a weak reference to their node. When the node is
//! dropped mid-flight the operation fails with `ChannelNotAvailable`.

mod find_node;
mod get_peers;
mod ping;

pub use find_node::FindNode;
pub use get_peers::GetPeers;
pub use ping::Ping;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::Error;
use crate::id::NodeId;
use crate::message::Message;
use crate::node::Node;
use crate::remote::Identifier;
use crate::transactions::QueryResult;

/// Lifecycle of a lookup operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Setup,
    Executing,
    Completed,
    Failed(String),
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed(_) | OperationState::Cancelled
        )
    }
}

/// Shared plumbing: node back-reference, state publication, and the
/// currently outstanding transaction for cancellation.
struct Driver {
    node: Weak<Node>,
    state: watch::Sender<OperationState>,
    current_tid: Mutex<Option<u16>>,
    cancelled: AtomicBool,
}

impl Driver {
    fn new(node: &Arc<Node>) -> Self {
        Self {
            node: Arc::downgrade(node),
            state: watch::Sender::new(OperationState::Setup),
            current_tid: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    fn state(&self) -> OperationState {
        self.state.borrow().clone()
    }

    /// Publishes a state change; terminal states are final.
    fn set_state(&self, next: OperationState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn settle<T>(&self, outcome: &Result<T, Error>) {
        match outcome {
            Ok(_) => self.set_state(OperationState::Completed),
            Err(Error::Cancelled) => self.set_state(OperationState::Cancelled),
            Err(err) => self.set_state(OperationState::Failed(err.to_string())),
        }
    }

    fn node(&self) -> Result<Arc<Node>, Error> {
        self.node.upgrade().ok_or(Error::ChannelNotAvailable)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// Sends one query and waits for its completion, tracking the
    /// transaction id so a concurrent [`Driver::cancel`] can settle it.
    async fn query(
        &self,
        node: &Arc<Node>,
        message: Message,
        remote: Identifier,
        timeout: Duration,
    ) -> QueryResult {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let pending = node.send_query(message, remote, timeout)?;
        *self.current_tid.lock() = Some(pending.tid);
        let result = pending.await_result().await;
        *self.current_tid.lock() = None;
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        result
    }

    /// Cancels the operation: the outstanding transaction (if any)
    /// completes with `Cancelled` and the state machine goes terminal.
    fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
        let tid = self.current_tid.lock().take();
        if let (Some(tid), Some(node)) = (tid, self.node.upgrade()) {
            node.complete_transaction(tid, Err(Error::Cancelled));
        }
        self.set_state(OperationState::Cancelled);
    }
}

/// Candidate identity after a response: keep the known id, otherwise
/// adopt the responder's.
fn merge_response_id(candidate: &Identifier, response: &Message) -> Identifier {
    Identifier::new(
        candidate.address.clone(),
        candidate.node_id.or(response.sender_id()),
    )
}

/// Appends contacts discovered in a response to the frontier, skipping
/// already-queried remotes and our own pivots, then re-sorts.
fn extend_frontier(
    remaining: &mut Vec<Identifier>,
    queried: &[Identifier],
    node: &Arc<Node>,
    response: &Message,
    target: &NodeId,
) {
    let Some(args) = response.response_args() else {
        return;
    };
    let discovered = args
        .nodes
        .iter()
        .flatten()
        .chain(args.nodes6.iter().flatten());

    for contact in discovered {
        if contact.id == node.ipv4_node_id() || contact.id == node.ipv6_node_id() {
            continue;
        }
        let identifier = Identifier::with_id(contact.address.clone(), contact.id);
        if queried.contains(&identifier) {
            continue;
        }
        remaining.push(identifier);
    }
    sort_frontier(remaining, target);
}

/// Sorts the frontier descending by distance (the reverse of
/// [`sort_by_distance`]) so tail-popping yields the nearest candidate
/// next; id-less entries sit at the front and are queried last.
fn sort_frontier(remaining: &mut [Identifier], target: &NodeId) {
    remaining.sort_by(|a, b| match (a.node_id, b.node_id) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(da), Some(db)) => db.distance(target).cmp(&da.distance(target)),
    });
}

/// Final result order: ascending distance to the target, id-less entries
/// last.
fn sort_by_distance(found: &mut [Identifier], target: &NodeId) {
    found.sort_by(|a, b| match (a.node_id, b.node_id) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(da), Some(db)) => da.distance(target).cmp(&db.distance(target)),
    });
}
