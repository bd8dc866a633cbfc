use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{Driver, OperationState};
use crate::error::Error;
use crate::message::{Message, TransactionId};
use crate::node::Node;
use crate::remote::Identifier;

/// A single liveness check against one remote.
pub struct Ping {
    driver: Driver,
    remote: Identifier,
    timeout: Duration,
}

impl Ping {
    pub fn new(node: &Arc<Node>, remote: Identifier) -> Self {
        Self {
            driver: Driver::new(node),
            remote,
            timeout: node.query_timeout(),
        }
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

    /// Sends the ping and waits for the remote's response.
    pub async fn run(&self) -> Result<Message, Error> {
        self.driver.set_state(OperationState::Executing);
        let outcome = self.execute().await;
        self.driver.settle(&outcome);
        outcome
    }

    async fn execute(&self) -> Result<Message, Error> {
        let node = self.driver.node()?;
        let message = Message::ping(
            TransactionId::new(),
            node.pivot_for(self.remote.address.family()),
        );
        self.driver
            .query(&node, message, self.remote.clone(), self.timeout)
            .await
    }
}
