//! Kademlia routing table: a bucket tree around the local pivot.
//!
//! Bucket ranges are closed intervals that partition the whole keyspace
//! with no gaps or overlaps. Exactly one bucket contains the pivot, and
//! only that bucket may split; a split replaces it with the two halves
//! of its range, keeping the partition ascending. Everything here is
//! synchronous and lock-free; the node owns the table behind its own
//! lock.

use std::time::Instant;

use tracing::debug;

use crate::id::NodeId;
use crate::remote::{Identifier, NodeState, RemoteNode};

/// Default bucket capacity (Kademlia's K).
pub const DEFAULT_BUCKET_SIZE: usize = 8;

/// Outcome of the low-level admission primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
    /// The identifier carries no node id; bootstrap contacts stay out of
    /// the table until their id is learned.
    MissingNodeId,
    /// The id is our own pivot.
    IsPivot,
    /// The bucket is full and may not split; the caller's replacement
    /// policy decides what happens next.
    Rejected,
}

/// A capacity-bounded set of remotes covering a closed id range.
#[derive(Debug, Clone)]
pub struct Bucket {
    lo: NodeId,
    hi: NodeId,
    max_size: usize,
    nodes: Vec<RemoteNode>,
    last_changed: Instant,
}

impl Bucket {
    fn new(lo: NodeId, hi: NodeId, max_size: usize, now: Instant) -> Self {
        Self {
            lo,
            hi,
            max_size,
            nodes: Vec::with_capacity(max_size),
            last_changed: now,
        }
    }

    pub fn range(&self) -> (NodeId, NodeId) {
        (self.lo, self.hi)
    }

    pub fn nodes(&self) -> &[RemoteNode] {
        &self.nodes
    }

    pub fn last_changed(&self) -> Instant {
        self.last_changed
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.lo <= *id && *id <= self.hi
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.max_size
    }

    pub fn is_all_good(&self, now: Instant) -> bool {
        self.nodes.iter().all(|n| n.state(now) == NodeState::Good)
    }

    /// Identifiers of nodes that owe too many responses.
    pub fn bad_nodes(&self, now: Instant) -> Vec<Identifier> {
        self.nodes
            .iter()
            .filter(|n| n.state(now) == NodeState::Bad)
            .map(|n| n.identifier.clone())
            .collect()
    }

    /// Questionable nodes ordered stalest first; nodes that never
    /// interacted sort before everything else.
    pub fn questionable_by_staleness(&self, now: Instant) -> Vec<Identifier> {
        let mut stale: Vec<&RemoteNode> = self
            .nodes
            .iter()
            .filter(|n| n.state(now) == NodeState::Questionable)
            .collect();
        stale.sort_by_key(|n| n.last_interaction());
        stale.into_iter().map(|n| n.identifier.clone()).collect()
    }

    /// Good nodes first, then questionable; bad nodes are excluded.
    /// Insertion order is preserved within each class.
    pub fn prioritized(&self, now: Instant) -> Vec<Identifier> {
        let mut ranked = Vec::with_capacity(self.nodes.len());
        let mut questionable = Vec::new();
        for node in &self.nodes {
            match node.state(now) {
                NodeState::Good => ranked.push(node.identifier.clone()),
                NodeState::Questionable => questionable.push(node.identifier.clone()),
                NodeState::Bad => {}
            }
        }
        ranked.append(&mut questionable);
        ranked
    }

    fn position(&self, identifier: &Identifier) -> Option<usize> {
        self.nodes.iter().position(|n| n.identifier == *identifier)
    }

    fn insert(&mut self, node: RemoteNode, now: Instant) {
        debug_assert!(!self.is_full());
        self.nodes.push(node);
        self.last_changed = now;
    }

    fn remove(&mut self, identifier: &Identifier) -> Option<RemoteNode> {
        self.position(identifier).map(|i| self.nodes.remove(i))
    }

    /// A range of at least two ids can split.
    fn can_split(&self) -> bool {
        NodeId::midpoint(&self.lo, &self.hi) > self.lo
    }

    fn split(self) -> (Bucket, Bucket) {
        let mid = NodeId::midpoint(&self.lo, &self.hi);
        let mut low = Bucket::new(self.lo, mid.prev(), self.max_size, self.last_changed);
        let mut high = Bucket::new(mid, self.hi, self.max_size, self.last_changed);
        for node in self.nodes {
            let id = node
                .identifier
                .node_id
                .expect("tracked nodes always carry an id");
            if id < mid {
                low.nodes.push(node);
            } else {
                high.nodes.push(node);
            }
        }
        (low, high)
    }
}

/// Routing table for one address family.
#[derive(Debug)]
pub struct RoutingTable {
    pivot: NodeId,
    max_bucket_size: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(pivot: NodeId, max_bucket_size: usize, now: Instant) -> Self {
        Self {
            pivot,
            max_bucket_size,
            buckets: vec![Bucket::new(NodeId::MIN, NodeId::MAX, max_bucket_size, now)],
        }
    }

    pub fn pivot(&self) -> &NodeId {
        &self.pivot
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn max_bucket_size(&self) -> usize {
        self.max_bucket_size
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        // Ranges partition the keyspace, so exactly one bucket matches.
        self.buckets
            .iter()
            .position(|b| b.contains(id))
            .expect("bucket ranges cover the keyspace")
    }

    pub fn bucket_containing(&self, id: &NodeId) -> &Bucket {
        &self.buckets[self.bucket_index(id)]
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        match identifier.node_id {
            Some(id) => self.buckets[self.bucket_index(&id)]
                .position(identifier)
                .is_some(),
            None => false,
        }
    }

    /// Low-level admission. Splits the pivot bucket as often as needed;
    /// a full foreign bucket rejects and leaves replacement to the
    /// caller's policy. `replacing` is evicted first when present.
    pub fn add(
        &mut self,
        identifier: &Identifier,
        replacing: Option<&Identifier>,
        now: Instant,
    ) -> AddOutcome {
        let Some(node_id) = identifier.node_id else {
            return AddOutcome::MissingNodeId;
        };
        if node_id == self.pivot {
            return AddOutcome::IsPivot;
        }

        loop {
            let index = self.bucket_index(&node_id);
            let bucket = &mut self.buckets[index];

            if bucket.position(identifier).is_some() {
                return AddOutcome::AlreadyPresent;
            }
            if let Some(victim) = replacing {
                if let Some(evicted) = bucket.remove(victim) {
                    debug!(evicted = ?evicted.identifier.node_id, "replaced routing entry");
                }
            }
            if !bucket.is_full() {
                bucket.insert(RemoteNode::new(identifier.clone()), now);
                return AddOutcome::Added;
            }
            if bucket.contains(&self.pivot) && bucket.can_split() {
                self.split_bucket(index);
                continue;
            }
            return AddOutcome::Rejected;
        }
    }

    fn split_bucket(&mut self, index: usize) {
        let bucket = self.buckets.remove(index);
        let (low, high) = bucket.split();
        debug!(
            lo = %low.lo,
            mid = %high.lo,
            hi = %high.hi,
            "split pivot bucket"
        );
        self.buckets.insert(index, high);
        self.buckets.insert(index, low);
    }

    /// Collects neighbor candidates for `target`.
    ///
    /// Walks from the target's bucket back toward the low end of the
    /// table, taking each bucket's prioritized nodes until `want` ids are
    /// gathered. Bootstrap contacts then fill the remainder — or are
    /// appended wholesale when `include_all_bootstrap` is set.
    pub fn find_nearest_neighbors(
        &self,
        target: &NodeId,
        bootstrap: &[Identifier],
        include_all_bootstrap: bool,
        want: usize,
        now: Instant,
    ) -> Vec<Identifier> {
        let mut neighbors = Vec::new();
        let start = self.bucket_index(target);
        for bucket in self.buckets[..=start].iter().rev() {
            neighbors.extend(bucket.prioritized(now));
            if neighbors.len() >= want {
                break;
            }
        }

        if include_all_bootstrap {
            neighbors.extend(bootstrap.iter().cloned());
        } else {
            let room = want.saturating_sub(neighbors.len());
            neighbors.extend(bootstrap.iter().take(room).cloned());
        }
        neighbors
    }

    pub fn update_response_received(&mut self, identifier: &Identifier, now: Instant) {
        if let Some(node) = self.find_mut(identifier) {
            node.received_response(now);
        }
    }

    pub fn update_error_received(&mut self, identifier: &Identifier, now: Instant) {
        if let Some(node) = self.find_mut(identifier) {
            node.received_error(now);
        }
    }

    pub fn update_response_timeout(&mut self, identifier: &Identifier) {
        if let Some(node) = self.find_mut(identifier) {
            node.response_timed_out();
        }
    }

    pub fn update_query_received(&mut self, identifier: &Identifier, now: Instant) {
        if let Some(node) = self.find_mut(identifier) {
            node.received_query(now);
        }
    }

    fn find_mut(&mut self, identifier: &Identifier) -> Option<&mut RemoteNode> {
        match identifier.node_id {
            Some(id) => {
                let index = self.bucket_index(&id);
                self.buckets[index]
                    .nodes
                    .iter_mut()
                    .find(|n| n.identifier.node_id == Some(id))
            }
            // Bootstrap contacts without an id are matched by address.
            None => self
                .buckets
                .iter_mut()
                .flat_map(|b| b.nodes.iter_mut())
                .find(|n| n.identifier.address == identifier.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Host, NetworkAddress};
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn now() -> Instant {
        Instant::now()
    }

    fn addr(d: u8) -> NetworkAddress {
        NetworkAddress::new(Host::V4(Ipv4Addr::new(192, 0, 2, d)), 6881)
    }

    fn ident(first: u8, d: u8) -> Identifier {
        let mut id = [0u8; 20];
        id[0] = first;
        id[19] = d;
        Identifier::with_id(addr(d), NodeId(id))
    }

    fn assert_partition(table: &RoutingTable) {
        let buckets = table.buckets();
        assert_eq!(buckets[0].range().0, NodeId::MIN);
        assert_eq!(buckets[buckets.len() - 1].range().1, NodeId::MAX);
        for pair in buckets.windows(2) {
            let (_, hi) = pair[0].range();
            let (lo, _) = pair[1].range();
            assert_eq!(lo, {
                let mut bytes = hi.0;
                // lo must be hi + 1
                for i in (0..20).rev() {
                    let (sum, overflow) = bytes[i].overflowing_add(1);
                    bytes[i] = sum;
                    if !overflow {
                        break;
                    }
                }
                NodeId(bytes)
            });
        }
        let pivot_buckets = buckets.iter().filter(|b| b.contains(table.pivot())).count();
        assert_eq!(pivot_buckets, 1);
    }

    #[test]
    fn new_table_spans_the_keyspace() {
        let table = RoutingTable::new(NodeId::random(), 8, now());
        assert_eq!(table.buckets().len(), 1);
        assert_partition(&table);
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn add_rejects_pivot_and_missing_id() {
        let pivot = NodeId::random();
        let mut table = RoutingTable::new(pivot, 8, now());
        assert_eq!(
            table.add(&Identifier::with_id(addr(1), pivot), None, now()),
            AddOutcome::IsPivot
        );
        assert_eq!(
            table.add(&Identifier::unresolved(addr(2)), None, now()),
            AddOutcome::MissingNodeId
        );
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let mut table = RoutingTable::new(NodeId::MAX, 8, now());
        let id = ident(0x20, 1);
        assert_eq!(table.add(&id, None, now()), AddOutcome::Added);
        assert_eq!(table.add(&id, None, now()), AddOutcome::AlreadyPresent);
        assert_eq!(table.node_count(), 1);
    }

    #[test]
    fn full_pivot_bucket_splits() {
        // Pivot at the top of the keyspace, capacity two.
        let mut table = RoutingTable::new(NodeId::MAX, 2, now());
        table.add(&ident(0x10, 1), None, now());
        table.add(&ident(0x20, 2), None, now());
        assert_eq!(table.buckets().len(), 1);

        assert_eq!(table.add(&ident(0x30, 3), None, now()), AddOutcome::Added);
        assert!(table.buckets().len() >= 2);
        assert_partition(&table);

        // Pivot sits in the final (upper) bucket.
        let last = &table.buckets()[table.buckets().len() - 1];
        assert!(last.contains(table.pivot()));
        // Every node landed in the half covering its id.
        for bucket in table.buckets() {
            for node in bucket.nodes() {
                assert!(bucket.contains(&node.identifier.node_id.unwrap()));
            }
        }
        assert_eq!(table.node_count(), 3);
    }

    #[test]
    fn full_foreign_bucket_rejects() {
        let mut table = RoutingTable::new(NodeId::MAX, 2, now());
        for i in 1..=8 {
            table.add(&ident(0x10 + i, i), None, now());
        }
        // The low half is full and does not hold the pivot.
        let outcome = table.add(&ident(0x05, 99), None, now());
        assert_eq!(outcome, AddOutcome::Rejected);
        assert_partition(&table);
    }

    #[test]
    fn replacing_evicts_the_victim() {
        let mut table = RoutingTable::new(NodeId::MAX, 2, now());
        let victim = ident(0x10, 1);
        table.add(&victim, None, now());
        table.add(&ident(0x11, 2), None, now());

        let fresh = ident(0x12, 3);
        assert_eq!(table.add(&fresh, Some(&victim), now()), AddOutcome::Added);
        assert!(!table.contains(&victim));
        assert!(table.contains(&fresh));
        assert_eq!(table.node_count(), 2);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut table = RoutingTable::new(NodeId::MAX, 4, now());
        for i in 0..60u8 {
            let mut id = [0u8; 20];
            id[0] = i.wrapping_mul(4);
            id[19] = i;
            table.add(&Identifier::with_id(addr(i), NodeId(id)), None, now());
        }
        assert_partition(&table);
        for bucket in table.buckets() {
            assert!(bucket.nodes().len() <= 4);
        }
    }

    #[test]
    fn neighbors_prefer_the_target_bucket() {
        let mut table = RoutingTable::new(NodeId::MAX, 2, now());
        // Force a split so low and high buckets both exist.
        table.add(&ident(0x10, 1), None, now());
        table.add(&ident(0x90, 2), None, now());
        table.add(&ident(0xa0, 3), None, now());
        assert!(table.buckets().len() >= 2);

        let mut target = [0u8; 20];
        target[0] = 0xa0;
        let found = table.find_nearest_neighbors(&NodeId(target), &[], false, 2, now());
        assert!(found.len() >= 2);
        // High-bucket nodes come before the low-bucket node.
        assert_eq!(found[0].node_id.unwrap().0[0], 0x90);
        assert_eq!(found[1].node_id.unwrap().0[0], 0xa0);
    }

    #[test]
    fn neighbors_fill_from_bootstrap() {
        let table = RoutingTable::new(NodeId::MAX, 8, now());
        let bootstrap = vec![
            Identifier::unresolved(addr(1)),
            Identifier::unresolved(addr(2)),
            Identifier::unresolved(addr(3)),
        ];
        let found = table.find_nearest_neighbors(&NodeId::MIN, &bootstrap, false, 2, now());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].address, addr(1));

        let all = table.find_nearest_neighbors(&NodeId::MIN, &bootstrap, true, 2, now());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn prioritized_excludes_bad_nodes() {
        let mut table = RoutingTable::new(NodeId::MAX, 8, now());
        let good = ident(0x10, 1);
        let bad = ident(0x20, 2);
        table.add(&good, None, now());
        table.add(&bad, None, now());
        table.update_response_received(&good, now());
        for _ in 0..3 {
            table.update_response_timeout(&bad);
        }

        let bucket = table.bucket_containing(&good.node_id.unwrap());
        let ranked = bucket.prioritized(now());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0], good);
        assert_eq!(bucket.bad_nodes(now()), vec![bad]);
    }

    #[test]
    fn questionable_order_is_stalest_first() {
        let mut table = RoutingTable::new(NodeId::MAX, 8, now());
        let never = ident(0x10, 1);
        let old = ident(0x20, 2);
        let recent = ident(0x30, 3);
        for id in [&never, &old, &recent] {
            table.add(id, None, now());
        }
        let base = now();
        table.update_query_received(&old, base);
        table.update_query_received(&recent, base + std::time::Duration::from_secs(60));

        let probe_at = base + crate::remote::FRESHNESS_WINDOW + std::time::Duration::from_secs(120);
        let bucket = table.bucket_containing(&never.node_id.unwrap());
        let stale = bucket.questionable_by_staleness(probe_at);
        assert_eq!(stale, vec![never, old, recent]);
    }

    proptest! {
        #[test]
        fn partition_holds_for_any_admission_sequence(
            seeds in proptest::collection::vec(proptest::array::uniform20(any::<u8>()), 1..80),
            pivot in proptest::array::uniform20(any::<u8>()),
        ) {
            let mut table = RoutingTable::new(NodeId(pivot), 8, Instant::now());
            for (i, seed) in seeds.iter().enumerate() {
                let identifier = Identifier::with_id(addr(i as u8), NodeId(*seed));
                table.add(&identifier, None, Instant::now());
            }
            assert_partition(&table);
            for bucket in table.buckets() {
                prop_assert!(bucket.nodes().len() <= 8);
                for node in bucket.nodes() {
                    prop_assert!(bucket.contains(&node.identifier.node_id.unwrap()));
                }
            }
        }
    }
}
