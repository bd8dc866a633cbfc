//! The DHT node: outbound send path, inbound dispatch, query handlers,
//! routing-table admission, and announce-token management.
//!
//! The node does no I/O of its own. A host feeds decoded [`Message`]
//! values into [`Node::received`] and provides a [`Channel`] that puts
//! outbound messages on the wire. Timers and replacement probes run on
//! the ambient Tokio runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng as _;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::address::{AddressResolver, Family, NetworkAddress, NullResolver};
use crate::error::Error;
use crate::id::{InfoHash, NodeId};
use crate::message::{
    tid_to_u16, Arguments, CompactNode, Message, MessageKind, Method, TransactionId, Want,
};
use crate::remote::Identifier;
use crate::routing::{AddOutcome, RoutingTable, DEFAULT_BUCKET_SIZE};
use crate::transactions::{QueryResult, TransactionTable};

/// Default deadline for outgoing queries.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Announce-token secrets rotate this often.
pub const TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Neighbors returned per family in find_node/get_peers replies.
const NEIGHBOR_COUNT: usize = 8;

/// Outbound datagram transport. Implementations serialize the message
/// (or hand it to their own codec) and send it to `to`.
pub trait Channel: Send + Sync {
    fn transmit(&self, message: Message, to: &NetworkAddress) -> Result<(), Error>;
}

/// Node configuration.
#[derive(Clone)]
pub struct NodeConfig {
    /// Pivot for the IPv4 routing table; random when absent.
    pub ipv4_node_id: Option<NodeId>,
    /// Pivot for the IPv6 routing table; random when absent.
    pub ipv6_node_id: Option<NodeId>,
    /// Bytes stamped into outbound messages as `v`.
    pub client_version: Option<Bytes>,
    pub query_timeout: Duration,
    /// A read-only node drops inbound queries without reply and stamps
    /// `ro = 1` on its own queries (BEP-43).
    pub is_read_only: bool,
    pub max_nodes_per_bucket: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ipv4_node_id: None,
            ipv6_node_id: None,
            client_version: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            is_read_only: false,
            max_nodes_per_bucket: DEFAULT_BUCKET_SIZE,
        }
    }
}

struct TokenSecrets {
    current: [u8; 20],
    previous: [u8; 20],
}

impl TokenSecrets {
    fn new() -> Self {
        let mut seed = [0u8; 20];
        rand::rng().fill(&mut seed);
        // Both start equal; the first rotation introduces a fresh secret.
        Self {
            current: seed,
            previous: seed,
        }
    }

    fn rotate(&mut self) {
        self.previous = self.current;
        rand::rng().fill(&mut self.current);
    }
}

/// Peers learned through announce_peer, keyed by info-hash. Append-only;
/// duplicates are permitted at this layer.
#[derive(Default)]
struct PeerStore {
    peers: HashMap<InfoHash, Vec<NetworkAddress>>,
}

impl PeerStore {
    fn add(&mut self, info_hash: InfoHash, peer: NetworkAddress) {
        self.peers.entry(info_hash).or_default().push(peer);
    }

    fn get(&self, info_hash: &InfoHash) -> Vec<NetworkAddress> {
        self.peers.get(info_hash).cloned().unwrap_or_default()
    }
}

/// Handle to an in-flight query created by the send path.
pub struct PendingQuery {
    pub tid: u16,
    receiver: oneshot::Receiver<QueryResult>,
}

impl PendingQuery {
    /// Waits for whichever of response, error reply, timeout, or
    /// cancellation settles the transaction first.
    pub async fn await_result(self) -> QueryResult {
        self.receiver.await.unwrap_or(Err(Error::Cancelled))
    }
}

enum Admit {
    /// Admission finished synchronously (added, already present, or
    /// rejected for good).
    Settled,
    /// The bucket is full of questionable nodes; these must be probed
    /// before one can be evicted.
    NeedsProbe(Vec<Identifier>),
}

#[derive(Clone, Copy)]
enum ContactEvent {
    Response,
    Query,
}

/// A Mainline DHT node.
pub struct Node {
    ipv4_pivot: NodeId,
    ipv6_pivot: NodeId,
    client_version: Option<Bytes>,
    query_timeout: Duration,
    read_only: bool,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    resolver: RwLock<Arc<dyn AddressResolver>>,
    routing_v4: Mutex<RoutingTable>,
    routing_v6: Mutex<RoutingTable>,
    transactions: Mutex<TransactionTable>,
    tokens: Mutex<TokenSecrets>,
    peers: Mutex<PeerStore>,
    cancelled: AtomicBool,
}

impl Node {
    /// Builds a node and, when a Tokio runtime is ambient, starts the
    /// periodic token rotation task. The task holds only a weak
    /// reference and dies with the node.
    pub fn new(config: NodeConfig) -> Arc<Node> {
        let now = Instant::now();
        let ipv4_pivot = config.ipv4_node_id.unwrap_or_else(NodeId::random);
        let ipv6_pivot = config.ipv6_node_id.unwrap_or_else(NodeId::random);
        let node = Arc::new(Node {
            ipv4_pivot,
            ipv6_pivot,
            client_version: config.client_version,
            query_timeout: config.query_timeout,
            read_only: config.is_read_only,
            channel: RwLock::new(None),
            resolver: RwLock::new(Arc::new(NullResolver)),
            routing_v4: Mutex::new(RoutingTable::new(
                ipv4_pivot,
                config.max_nodes_per_bucket,
                now,
            )),
            routing_v6: Mutex::new(RoutingTable::new(
                ipv6_pivot,
                config.max_nodes_per_bucket,
                now,
            )),
            transactions: Mutex::new(TransactionTable::new()),
            tokens: Mutex::new(TokenSecrets::new()),
            peers: Mutex::new(PeerStore::default()),
            cancelled: AtomicBool::new(false),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let weak = Arc::downgrade(&node);
            handle.spawn(async move {
                let mut ticker = tokio::time::interval(TOKEN_ROTATION_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(node) = weak.upgrade() else { break };
                    node.rotate_token_secret();
                }
            });
        }

        node
    }

    pub fn ipv4_node_id(&self) -> NodeId {
        self.ipv4_pivot
    }

    pub fn ipv6_node_id(&self) -> NodeId {
        self.ipv6_pivot
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Pivot matching a remote's address family; named hosts count as
    /// IPv4.
    pub fn pivot_for(&self, family: Family) -> NodeId {
        match family {
            Family::V4 => self.ipv4_pivot,
            Family::V6 => self.ipv6_pivot,
        }
    }

    pub fn set_channel(&self, channel: Arc<dyn Channel>) {
        *self.channel.write() = Some(channel);
    }

    pub fn clear_channel(&self) {
        *self.channel.write() = None;
    }

    pub fn set_resolver(&self, resolver: Arc<dyn AddressResolver>) {
        *self.resolver.write() = resolver;
    }

    pub fn outstanding_queries(&self) -> usize {
        self.transactions.lock().len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Neighbor candidates for `target` from one family's routing table.
    pub fn nearest_neighbors(
        &self,
        family: Family,
        target: &NodeId,
        bootstrap: &[Identifier],
        include_all_bootstrap: bool,
        want: usize,
    ) -> Vec<Identifier> {
        self.routing_for(family).lock().find_nearest_neighbors(
            target,
            bootstrap,
            include_all_bootstrap,
            want,
            Instant::now(),
        )
    }

    /// Peers currently stored for an info-hash.
    pub fn peers_for(&self, info_hash: &InfoHash) -> Vec<NetworkAddress> {
        self.peers.lock().get(info_hash)
    }

    pub fn routing_table_v4(&self) -> &Mutex<RoutingTable> {
        &self.routing_v4
    }

    pub fn routing_table_v6(&self) -> &Mutex<RoutingTable> {
        &self.routing_v6
    }

    fn routing_for(&self, family: Family) -> &Mutex<RoutingTable> {
        match family {
            Family::V4 => &self.routing_v4,
            Family::V6 => &self.routing_v6,
        }
    }

    /// Shifts the current secret into the previous slot and draws a new
    /// one; tokens minted under the old secret stay valid one more
    /// interval.
    pub fn rotate_token_secret(&self) {
        self.tokens.lock().rotate();
        debug!("token secret rotated");
    }

    /// Completes every outstanding transaction with `Cancelled` and
    /// refuses further probe work.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let drained = self.transactions.lock().drain();
        debug!(count = drained.len(), "cancelling outstanding transactions");
        for txn in drained {
            txn.finish(Err(Error::Cancelled));
        }
    }

    // --- outbound ---

    /// Sends a query: allocates a canonical transaction id, registers
    /// the transaction, arms its timeout, and hands the message to the
    /// channel. A channel failure completes the transaction immediately
    /// with that failure.
    pub(crate) fn send_query(
        self: &Arc<Self>,
        mut message: Message,
        remote: Identifier,
        timeout: Duration,
    ) -> Result<PendingQuery, Error> {
        let channel = self
            .channel
            .read()
            .clone()
            .ok_or(Error::ChannelNotAvailable)?;

        if self.read_only {
            message.read_only = true;
        }
        if message.version.is_none() {
            message.version = self.client_version.clone();
        }

        let (tid, receiver) = {
            let mut table = self.transactions.lock();
            let tid = table.allocate()?;
            message.transaction_id = crate::message::tid_from_u16(tid);
            let (receiver, seq) =
                table.register(tid, remote.clone(), message.clone(), Instant::now());

            let weak = Arc::downgrade(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(node) = weak.upgrade() {
                    node.complete_transaction_seq(tid, seq, Err(Error::Timeout));
                }
            });
            if let Some(txn) = table.get_mut(tid) {
                txn.set_timer(timer);
            }
            (tid, receiver)
        };

        if let Err(err) = channel.transmit(message, &remote.address) {
            debug!(address = %remote.address, error = %err, "channel refused query");
            self.complete_transaction(tid, Err(err));
        }
        Ok(PendingQuery { tid, receiver })
    }

    /// Sends a response or error reply, stamping the remote's externally
    /// visible endpoint into the `ip` field (best-effort).
    fn send_reply(&self, mut message: Message, to: &NetworkAddress) -> Result<(), Error> {
        let channel = self
            .channel
            .read()
            .clone()
            .ok_or(Error::ChannelNotAvailable)?;
        if message.version.is_none() {
            message.version = self.client_version.clone();
        }
        message.observed_ip = Some(to.clone());
        channel.transmit(message, to)
    }

    fn reply_error(&self, tid: &TransactionId, to: &NetworkAddress, code: i64, text: &str) {
        if let Err(err) = self.send_reply(Message::error(tid.clone(), code, text), to) {
            debug!(error = %err, "error reply not sent");
        }
    }

    /// Settles a transaction. The first caller wins; the slot check makes
    /// re-entry for the same id a no-op.
    pub(crate) fn complete_transaction(self: &Arc<Self>, tid: u16, result: QueryResult) {
        let Some(txn) = self.transactions.lock().remove(tid) else {
            return;
        };
        self.finish_transaction(txn, result);
    }

    fn complete_transaction_seq(self: &Arc<Self>, tid: u16, seq: u64, result: QueryResult) {
        let Some(txn) = self.transactions.lock().remove_if_seq(tid, seq) else {
            return;
        };
        self.finish_transaction(txn, result);
    }

    fn finish_transaction(self: &Arc<Self>, txn: crate::transactions::Transaction, result: QueryResult) {
        match &result {
            Ok(response) => {
                if let Some(responder_id) = response.sender_id() {
                    let identifier =
                        Identifier::with_id(txn.remote.address.clone(), responder_id);
                    self.observe_contact(identifier, ContactEvent::Response);
                }
            }
            Err(Error::ErrorResponse { .. }) => {
                self.routing_for(txn.remote.address.family())
                    .lock()
                    .update_error_received(&txn.remote, Instant::now());
            }
            Err(Error::Timeout) => {
                self.routing_for(txn.remote.address.family())
                    .lock()
                    .update_response_timeout(&txn.remote);
            }
            // Cancellation and channel failures say nothing about the
            // remote's liveness.
            Err(_) => {}
        }
        debug!(outcome = result.is_ok(), "transaction completed");
        txn.finish(result);
    }

    // --- inbound ---

    /// Entry point for decoded inbound messages.
    pub fn received(self: &Arc<Self>, message: Message, from: NetworkAddress) {
        if let MessageKind::Error { code, message: text } = &message.kind {
            let (code, text) = (*code, text.clone());
            self.on_error_reply(&message, code, text, &from);
            return;
        }
        if matches!(message.kind, MessageKind::Response { .. }) {
            self.on_response(message, from);
        } else {
            self.on_query(message, from);
        }
    }

    fn on_error_reply(self: &Arc<Self>, message: &Message, code: i64, text: String, from: &NetworkAddress) {
        let Some(tid) = tid_to_u16(&message.transaction_id) else {
            debug!(address = %from, "error reply without canonical transaction id");
            return;
        };
        {
            let table = self.transactions.lock();
            let Some(txn) = table.get(tid) else {
                debug!(address = %from, tid, "error reply for unknown transaction");
                return;
            };
            if txn.remote.address != *from {
                warn!(address = %from, tid, error = %Error::ResponseFromUnknownAddress, "ignoring error reply");
                return;
            }
        }
        self.complete_transaction(tid, Err(Error::ErrorResponse { code, message: text }));
    }

    fn on_response(self: &Arc<Self>, message: Message, from: NetworkAddress) {
        let Some(responder_id) = message.sender_id() else {
            self.reply_error(
                &message.transaction_id,
                &from,
                203,
                "Protocol Error: missing id",
            );
            return;
        };

        let not_known = "Protocol Error: response is not for known query";
        let Some(tid) = tid_to_u16(&message.transaction_id) else {
            self.reply_error(&message.transaction_id, &from, 203, not_known);
            return;
        };

        enum Check {
            Complete,
            UnknownAddress,
            UnexpectedNodeId,
            Reject(&'static str),
        }
        let check = {
            let table = self.transactions.lock();
            match table.get(tid) {
                None => Check::Reject(not_known),
                Some(txn) if txn.remote.address != from => Check::UnknownAddress,
                Some(txn) if txn.remote.node_id.is_some_and(|id| id != responder_id) => {
                    Check::UnexpectedNodeId
                }
                Some(_) => Check::Complete,
            }
        };

        match check {
            Check::Complete => self.complete_transaction(tid, Ok(message)),
            Check::UnknownAddress => {
                // The transaction stays pending for the real remote.
                warn!(address = %from, tid, error = %Error::ResponseFromUnknownAddress, "rejecting response");
                self.reply_error(&message.transaction_id, &from, 203, not_known);
            }
            Check::UnexpectedNodeId => {
                warn!(address = %from, tid, error = %Error::ResponseWithUnexpectedNodeId, "rejecting response");
                self.reply_error(
                    &message.transaction_id,
                    &from,
                    203,
                    "Protocol Error: response from unexpected node id",
                );
            }
            Check::Reject(text) => {
                warn!(address = %from, tid, text, "rejecting response");
                self.reply_error(&message.transaction_id, &from, 203, text);
            }
        }
    }

    fn on_query(self: &Arc<Self>, message: Message, from: NetworkAddress) {
        let MessageKind::Query { method, args } = &message.kind else {
            return;
        };

        if self.read_only {
            debug!(address = %from, method = method.as_str(), "read-only node dropping query");
            return;
        }

        let Some(sender_id) = args.id else {
            self.reply_error(
                &message.transaction_id,
                &from,
                203,
                "Protocol Error: missing id",
            );
            return;
        };

        let handled = match method {
            Method::Ping => self.handle_ping(&message, &from),
            Method::FindNode => self.handle_find_node(&message, args, &from),
            Method::GetPeers => self.handle_get_peers(&message, args, &from),
            Method::AnnouncePeer => self.handle_announce_peer(&message, args, &from),
            Method::Other(name) => {
                self.reply_error(
                    &message.transaction_id,
                    &from,
                    204,
                    &format!("Method Unknown: {name}"),
                );
                return;
            }
        };

        match handled {
            Ok(()) => {
                // Peers advertising ro=1 want no routing-table presence.
                if !message.read_only {
                    self.observe_contact(
                        Identifier::with_id(from, sender_id),
                        ContactEvent::Query,
                    );
                }
            }
            Err(err) => {
                debug!(address = %from, method = method.as_str(), error = %err, "query not handled");
            }
        }
    }

    // --- handlers ---

    fn handle_ping(&self, message: &Message, from: &NetworkAddress) -> Result<(), Error> {
        let args = Arguments {
            id: Some(self.pivot_for(from.family())),
            ..Arguments::default()
        };
        self.send_reply(Message::response(message.transaction_id.clone(), args), from)
    }

    fn handle_find_node(
        &self,
        message: &Message,
        args: &Arguments,
        from: &NetworkAddress,
    ) -> Result<(), Error> {
        let Some(target) = args.target else {
            self.reply_error(
                &message.transaction_id,
                from,
                203,
                "Protocol Error: missing target",
            );
            return Err(Error::MalformedMessage("find_node without target".into()));
        };

        let (want4, want6) = wanted_families(args, from);
        let mut reply = Arguments {
            id: Some(self.pivot_for(from.family())),
            ..Arguments::default()
        };
        if want4 {
            reply.nodes = Some(self.compact_neighbors(Family::V4, &target));
        }
        if want6 {
            reply.nodes6 = Some(self.compact_neighbors(Family::V6, &target));
        }
        self.send_reply(Message::response(message.transaction_id.clone(), reply), from)
    }

    fn handle_get_peers(
        &self,
        message: &Message,
        args: &Arguments,
        from: &NetworkAddress,
    ) -> Result<(), Error> {
        let Some(info_hash) = args.info_hash else {
            self.reply_error(
                &message.transaction_id,
                from,
                203,
                "Protocol Error: missing info_hash",
            );
            return Err(Error::MalformedMessage("get_peers without info_hash".into()));
        };

        let (want4, want6) = wanted_families(args, from);
        let mut reply = Arguments {
            id: Some(self.pivot_for(from.family())),
            token: self.token_for(from),
            ..Arguments::default()
        };
        let stored = self.peers.lock().get(&info_hash);
        if !stored.is_empty() {
            reply.values = Some(stored);
        }
        if want4 {
            reply.nodes = Some(self.compact_neighbors(Family::V4, &info_hash));
        }
        if want6 {
            reply.nodes6 = Some(self.compact_neighbors(Family::V6, &info_hash));
        }
        self.send_reply(Message::response(message.transaction_id.clone(), reply), from)
    }

    fn handle_announce_peer(
        &self,
        message: &Message,
        args: &Arguments,
        from: &NetworkAddress,
    ) -> Result<(), Error> {
        let Some(info_hash) = args.info_hash else {
            self.reply_error(
                &message.transaction_id,
                from,
                203,
                "Protocol Error: missing info_hash",
            );
            return Err(Error::MalformedMessage(
                "announce_peer without info_hash".into(),
            ));
        };
        let Some(token) = &args.token else {
            self.reply_error(
                &message.transaction_id,
                from,
                203,
                "Protocol Error: missing token",
            );
            return Err(Error::MalformedMessage("announce_peer without token".into()));
        };
        if !self.validate_token(from, token) {
            debug!(address = %from, "announce with invalid token");
            self.reply_error(&message.transaction_id, from, 203, "Invalid token");
            return Err(Error::MalformedMessage(
                "announce_peer with invalid token".into(),
            ));
        }

        let port = if args.implied_port {
            from.port
        } else {
            match args.port {
                Some(port) => port,
                None => {
                    self.reply_error(
                        &message.transaction_id,
                        from,
                        203,
                        "Protocol Error: missing port",
                    );
                    return Err(Error::MalformedMessage("announce_peer without port".into()));
                }
            }
        };

        let peer = NetworkAddress::new(from.host.clone(), port);
        debug!(info_hash = %info_hash, peer = %peer, "stored announced peer");
        self.peers.lock().add(info_hash, peer);

        let args = Arguments {
            id: Some(self.pivot_for(from.family())),
            ..Arguments::default()
        };
        self.send_reply(Message::response(message.transaction_id.clone(), args), from)
    }

    /// Up to eight neighbors of `target` as compact contacts; unresolved
    /// named hosts are skipped silently.
    fn compact_neighbors(&self, family: Family, target: &NodeId) -> Vec<CompactNode> {
        let pivot = self.pivot_for(family);
        let neighbors = self.routing_for(family).lock().find_nearest_neighbors(
            target,
            &[],
            false,
            NEIGHBOR_COUNT,
            Instant::now(),
        );
        let resolver = self.resolver.read().clone();

        let mut contacts = Vec::new();
        for identifier in neighbors.into_iter().take(NEIGHBOR_COUNT) {
            let Some(id) = identifier.node_id else { continue };
            if id == *target && *target == pivot {
                return Vec::new();
            }
            let Some(compact) = identifier.address.compact(resolver.as_ref()) else {
                continue;
            };
            let Some(address) = NetworkAddress::from_compact(&compact) else {
                continue;
            };
            contacts.push(CompactNode { id, address });
        }
        contacts
    }

    // --- admission ---

    /// Records contact with a remote: updates its liveness entry when
    /// tracked, otherwise runs the admission policy (possibly probing
    /// stale bucket members in the background) and stamps the entry on
    /// success.
    fn observe_contact(self: &Arc<Self>, identifier: Identifier, event: ContactEvent) {
        let family = identifier.address.family();
        {
            let mut table = self.routing_for(family).lock();
            if table.contains(&identifier) {
                apply_contact(&mut table, &identifier, event);
                return;
            }
        }

        match self.try_admit(&identifier) {
            Admit::Settled => {
                apply_contact(&mut self.routing_for(family).lock(), &identifier, event);
            }
            Admit::NeedsProbe(candidates) => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    debug!("no runtime; skipping replacement probe");
                    return;
                };
                let node = Arc::clone(self);
                handle.spawn(async move {
                    if node.admit_with_probe(&identifier, candidates).await {
                        apply_contact(
                            &mut node.routing_for(family).lock(),
                            &identifier,
                            event,
                        );
                    }
                });
            }
        }
    }

    /// Synchronous part of the admission policy: plain add (splitting
    /// the pivot bucket as needed), rejection when the bucket is all
    /// good, eviction of the first bad node, or a probe candidate list.
    fn try_admit(&self, identifier: &Identifier) -> Admit {
        let Some(node_id) = identifier.node_id else {
            return Admit::Settled;
        };
        let mut table = self.routing_for(identifier.address.family()).lock();
        let now = Instant::now();

        match table.add(identifier, None, now) {
            AddOutcome::Added => {
                debug!(id = %node_id, "admitted new node");
                Admit::Settled
            }
            AddOutcome::AlreadyPresent | AddOutcome::IsPivot | AddOutcome::MissingNodeId => {
                Admit::Settled
            }
            AddOutcome::Rejected => {
                let (all_good, bad, questionable) = {
                    let bucket = table.bucket_containing(&node_id);
                    (
                        bucket.is_all_good(now),
                        bucket.bad_nodes(now),
                        bucket.questionable_by_staleness(now),
                    )
                };
                if all_good {
                    return Admit::Settled;
                }
                if let Some(victim) = bad.first() {
                    debug!(evicted = ?victim.node_id, "replacing bad node");
                    table.add(identifier, Some(victim), now);
                    return Admit::Settled;
                }
                if questionable.is_empty() {
                    Admit::Settled
                } else {
                    Admit::NeedsProbe(questionable)
                }
            }
        }
    }

    async fn admit_with_probe(
        self: &Arc<Self>,
        identifier: &Identifier,
        candidates: Vec<Identifier>,
    ) -> bool {
        let Some(victim) = self.find_node_to_replace(candidates).await else {
            return false;
        };
        debug!(evicted = ?victim.node_id, "replacing unresponsive node");
        let outcome = self.routing_for(identifier.address.family()).lock().add(
            identifier,
            Some(&victim),
            Instant::now(),
        );
        matches!(outcome, AddOutcome::Added)
    }

    /// Probes candidates stalest-first, two pings each. The first
    /// candidate to miss both pings is the one to evict; candidates that
    /// answer stay.
    async fn find_node_to_replace(
        self: &Arc<Self>,
        candidates: Vec<Identifier>,
    ) -> Option<Identifier> {
        'candidates: for candidate in candidates {
            let mut misses = 0;
            while misses < 2 {
                if self.is_cancelled() {
                    return None;
                }
                match self.probe(&candidate).await {
                    Ok(_) => continue 'candidates,
                    Err(Error::Cancelled) => return None,
                    Err(_) => misses += 1,
                }
            }
            return Some(candidate);
        }
        None
    }

    async fn probe(self: &Arc<Self>, remote: &Identifier) -> QueryResult {
        let message = Message::ping(
            TransactionId::new(),
            self.pivot_for(remote.address.family()),
        );
        self.send_query(message, remote.clone(), self.query_timeout)?
            .await_result()
            .await
    }

    // --- announce tokens ---

    /// Token handed to `address` in get_peers replies: SHA-256 over the
    /// compact contact followed by the current secret.
    fn token_for(&self, address: &NetworkAddress) -> Option<Bytes> {
        let contact = address.compact(self.resolver.read().as_ref())?;
        let secrets = self.tokens.lock();
        Some(token_digest(&contact, &secrets.current))
    }

    /// A token is valid when it matches either the current or the
    /// previous secret for this address.
    pub fn validate_token(&self, address: &NetworkAddress, token: &[u8]) -> bool {
        let Some(contact) = address.compact(self.resolver.read().as_ref()) else {
            return false;
        };
        let secrets = self.tokens.lock();
        token == &token_digest(&contact, &secrets.current)[..]
            || token == &token_digest(&contact, &secrets.previous)[..]
    }
}

fn apply_contact(table: &mut RoutingTable, identifier: &Identifier, event: ContactEvent) {
    match event {
        ContactEvent::Response => table.update_response_received(identifier, Instant::now()),
        ContactEvent::Query => table.update_query_received(identifier, Instant::now()),
    }
}

fn wanted_families(args: &Arguments, from: &NetworkAddress) -> (bool, bool) {
    match &args.want {
        Some(want) => (want.contains(&Want::V4), want.contains(&Want::V6)),
        None => match from.family() {
            Family::V4 => (true, false),
            Family::V6 => (false, true),
        },
    }
}

fn token_digest(contact: &[u8], secret: &[u8; 20]) -> Bytes {
    let mut hasher = Sha256::new();
    hasher.update(contact);
    hasher.update(secret);
    Bytes::copy_from_slice(&hasher.finalize())
}
