use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::{extend_frontier, merge_response_id, sort_by_distance, Driver, OperationState};
use crate::error::Error;
use crate::id::NodeId;
use crate::message::{Message, TransactionId, Want};
use crate::node::Node;
use crate::remote::Identifier;

/// Iterative lookup of the nodes closest to a target id.
///
/// Starting from the bootstrap contacts, each response contributes its
/// compact node lists to the frontier; the frontier is kept ordered by
/// distance so the lookup converges on the target. A candidate that
/// fails is passed over in favor of the next one.
pub struct FindNode {
    driver: Driver,
    target: NodeId,
    bootstrap: Vec<Identifier>,
    max_found: Option<usize>,
    want: Option<Vec<Want>>,
    timeout: Duration,
}

impl FindNode {
    pub fn new(node: &Arc<Node>, target: NodeId, bootstrap: Vec<Identifier>) -> Self {
        Self {
            driver: Driver::new(node),
            target,
            bootstrap,
            max_found: None,
            want: None,
            timeout: node.query_timeout(),
        }
    }

    /// Stop once this many nodes have answered.
    pub fn with_max_found(mut self, max_found: usize) -> Self {
        self.max_found = Some(max_found);
        self
    }

    pub fn with_want(mut self, want: Vec<Want>) -> Self {
        self.want = Some(want);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.driver.subscribe()
    }

    pub fn state(&self) -> OperationState {
        self.driver.state()
    }

    pub fn cancel(&self) {
        self.driver.cancel();
    }

    /// Runs the lookup to exhaustion and returns the nodes that
    /// answered, nearest to the target first.
    pub async fn run(&self) -> Result<Vec<Identifier>, Error> {
        self.driver.set_state(OperationState::Executing);
        let outcome = self.execute().await;
        self.driver.settle(&outcome);
        outcome
    }

    async fn execute(&self) -> Result<Vec<Identifier>, Error> {
        // Reversed so the first bootstrap contact is popped first.
        let mut remaining: Vec<Identifier> = self.bootstrap.iter().rev().cloned().collect();
        let mut queried: Vec<Identifier> = Vec::new();
        let mut found: Vec<Identifier> = Vec::new();

        loop {
            if self.max_found.is_some_and(|max| found.len() >= max) {
                break;
            }
            let Some(candidate) = remaining.pop() else {
                break;
            };
            if queried.contains(&candidate) {
                continue;
            }

            let node = self.driver.node()?;
            let message = Message::find_node(
                TransactionId::new(),
                node.pivot_for(candidate.address.family()),
                self.target,
                self.want.clone(),
            );

            match self
                .driver
                .query(&node, message, candidate.clone(), self.timeout)
                .await
            {
                Ok(response) => {
                    let learned = merge_response_id(&candidate, &response);
                    queried.push(candidate);
                    if !queried.contains(&learned) {
                        queried.push(learned.clone());
                    }
                    found.push(learned);
                    extend_frontier(&mut remaining, &queried, &node, &response, &self.target);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    debug!(address = %candidate.address, error = %err, "candidate failed");
                }
            }
        }

        sort_by_distance(&mut found, &self.target);
        Ok(found)
    }
}
