use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;

use super::{extend_frontier, merge_response_id, Driver, OperationState};
use crate::error::Error;
use crate::id::InfoHash;
use crate::message::{Message, TransactionId, Want};
use crate::node::Node;
use crate::remote::Identifier;
use crate::security;

/// Number of peer-yielding nodes that satisfies the lookup.
pub const DEFAULT_MAX_PEER_SOURCES: usize = 8;

/// Iterative search for peers of an info-hash, optionally announcing
/// back to every node that supplied peers.
///
/// The iteration works like [`FindNode`](super::FindNode) with the
/// frontier fed from get_peers responses. It stops once enough distinct
/// nodes have yielded peers or the frontier runs dry; the result is the
/// set of all peers collected.
pub struct GetPeers {
    driver: Driver,
    info_hash: InfoHash,
    bootstrap: Vec<Identifier>,
    should_announce: bool,
    torrent_port: Option<u16>,
    max_peer_sources: usize,
    verify_node_ids: bool,
    want: Option<Vec<Want>>,
    timeout: Duration,
}

impl GetPeers {
    pub fn new(node: &Arc<Node>, info_hash: InfoHash, bootstrap: Vec<Identifier>) -> Self {
        Self {
            driver: Driver::new(node),
            info_hash,
            bootstrap,
            should_announce: false,
            torrent_port: None,
            max_peer_sources: DEFAULT_MAX_PEER_SOURCES,
            verify_node_ids: true,
            want: None,
            timeout: node.query_timeout(),
        }
    }

    /// Announce to each peer-yielding node. Without a port the announce
    /// carries `implied_port = 1` and the responder uses the datagram
    /// source port.
    pub fn announcing(mut self, torrent_port: Option<u16>) -> Self {
        self.should_announce = true;
        self.torrent_port = torrent_port;
        self
    }

    pub fn with_max_peer_sources(mut self, max: usize) -> Self {
        self.max_peer_sources = max;
        self
    }

    /// Count peers from nodes whose ids fail the address binding check
    /// as sources too.
    pub fn without_node_id_verification(mut self) -> Self {
        self.verify_node_ids = false;
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

    /// Runs the lookup and returns every peer endpoint collected.
    pub async fn run(&self) -> Result<HashSet<crate::address::NetworkAddress>, Error> {
        self.driver.set_state(OperationState::Executing);
        let outcome = self.execute().await;
        self.driver.settle(&outcome);
        outcome
    }

    async fn execute(&self) -> Result<HashSet<crate::address::NetworkAddress>, Error> {
        let mut remaining: Vec<Identifier> = self.bootstrap.iter().rev().cloned().collect();
        let mut queried: Vec<Identifier> = Vec::new();
        let mut found_peers = HashSet::new();
        let mut peer_sources = 0usize;

        loop {
            if peer_sources >= self.max_peer_sources {
                break;
            }
            let Some(candidate) = remaining.pop() else {
                break;
            };
            if queried.contains(&candidate) {
                continue;
            }

            let node = self.driver.node()?;
            let message = Message::get_peers(
                TransactionId::new(),
                node.pivot_for(candidate.address.family()),
                self.info_hash,
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

                    let args = response.response_args();
                    let values = args.and_then(|a| a.values.as_deref()).unwrap_or(&[]);
                    if !values.is_empty() {
                        found_peers.extend(values.iter().cloned());
                        if self.trusted_source(&learned) {
                            peer_sources += 1;
                        }
                        if self.should_announce {
                            if let Some(token) = args.and_then(|a| a.token.clone()) {
                                self.announce_to(&node, &learned, token);
                            }
                        }
                    }

                    // New contacts feed the frontier even when the
                    // response also carried peers.
                    extend_frontier(&mut remaining, &queried, &node, &response, &self.info_hash);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    debug!(address = %candidate.address, error = %err, "candidate failed");
                }
            }
        }

        Ok(found_peers)
    }

    fn trusted_source(&self, learned: &Identifier) -> bool {
        if !self.verify_node_ids {
            return true;
        }
        learned
            .node_id
            .is_some_and(|id| security::is_valid_node_id(&learned.address, &id))
    }

    /// Fire-and-forget announce; the transaction wrapper still feeds the
    /// outcome into the routing table.
    fn announce_to(&self, node: &Arc<Node>, remote: &Identifier, token: Bytes) {
        let message = Message::announce_peer(
            TransactionId::new(),
            node.pivot_for(remote.address.family()),
            self.info_hash,
            token,
            self.torrent_port,
        );
        match node.send_query(message, remote.clone(), self.timeout) {
            Ok(pending) => {
                tokio::spawn(async move {
                    let _ = pending.await_result().await;
                });
            }
            Err(err) => debug!(error = %err, "announce not sent"),
        }
    }
}
