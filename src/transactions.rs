//! Outstanding-query bookkeeping.
//!
//! Every query this node sends is tracked in a table of 65536 slots, one
//! per 16-bit transaction id. Completion is single-shot: whichever of
//! response, error reply, timeout, or cancellation arrives first consumes
//! the slot, and later arrivals find it empty and do nothing. A
//! per-transaction sequence number lets an already-fired timer recognize
//! that its slot was reused and stand down.

use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::message::Message;
use crate::remote::Identifier;

/// How an outgoing query ended: the response message, or why there is
/// none.
pub type QueryResult = Result<Message, Error>;

/// Number of transaction-id slots.
pub const SLOT_COUNT: usize = 1 << 16;

/// One outstanding query.
#[derive(Debug)]
pub struct Transaction {
    seq: u64,
    pub remote: Identifier,
    pub query: Message,
    pub sent_at: Instant,
    completion: oneshot::Sender<QueryResult>,
    timer: Option<JoinHandle<()>>,
}

impl Transaction {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn set_timer(&mut self, handle: JoinHandle<()>) {
        self.timer = Some(handle);
    }

    /// Delivers the result and cancels the timeout timer. Cancellation of
    /// the timer is best-effort; a racing timer run is absorbed by the
    /// empty-slot check in the table.
    pub fn finish(self, result: QueryResult) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        let _ = self.completion.send(result);
    }
}

/// The slot array plus the wrapping id allocator.
#[derive(Debug)]
pub struct TransactionTable {
    slots: Vec<Option<Box<Transaction>>>,
    next_tid: u16,
    next_seq: u64,
    live: usize,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| None).collect(),
            // Random seed so restarts do not collide with stale replies.
            next_tid: rand::random(),
            next_seq: 0,
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocates the next free transaction id, skipping occupied slots.
    pub fn allocate(&mut self) -> Result<u16, Error> {
        for _ in 0..SLOT_COUNT {
            let tid = self.next_tid;
            self.next_tid = self.next_tid.wrapping_add(1);
            if self.slots[tid as usize].is_none() {
                return Ok(tid);
            }
        }
        Err(Error::TransactionsExhausted)
    }

    /// Registers a query under `tid` and returns the receiving end of its
    /// completion along with the transaction's sequence number.
    pub fn register(
        &mut self,
        tid: u16,
        remote: Identifier,
        query: Message,
        sent_at: Instant,
    ) -> (oneshot::Receiver<QueryResult>, u64) {
        debug_assert!(self.slots[tid as usize].is_none());
        let (sender, receiver) = oneshot::channel();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots[tid as usize] = Some(Box::new(Transaction {
            seq,
            remote,
            query,
            sent_at,
            completion: sender,
            timer: None,
        }));
        self.live += 1;
        (receiver, seq)
    }

    pub fn get(&self, tid: u16) -> Option<&Transaction> {
        self.slots[tid as usize].as_deref()
    }

    pub fn get_mut(&mut self, tid: u16) -> Option<&mut Transaction> {
        self.slots[tid as usize].as_deref_mut()
    }

    pub fn remove(&mut self, tid: u16) -> Option<Transaction> {
        let txn = self.slots[tid as usize].take();
        if txn.is_some() {
            self.live -= 1;
        }
        txn.map(|boxed| *boxed)
    }

    /// Removes the slot only when it still holds the transaction the
    /// caller armed a timer for.
    pub fn remove_if_seq(&mut self, tid: u16, seq: u64) -> Option<Transaction> {
        if self.slots[tid as usize].as_ref().map(|t| t.seq) == Some(seq) {
            self.remove(tid)
        } else {
            None
        }
    }

    /// Empties the table, yielding every live transaction.
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.live = 0;
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.take())
            .map(|boxed| *boxed)
            .collect()
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Host, NetworkAddress};
    use crate::id::NodeId;
    use crate::message::tid_from_u16;
    use std::net::Ipv4Addr;

    fn remote() -> Identifier {
        let address = NetworkAddress::new(Host::V4(Ipv4Addr::new(192, 0, 2, 1)), 6881);
        Identifier::with_id(address, NodeId::random())
    }

    fn register(table: &mut TransactionTable, tid: u16) -> oneshot::Receiver<QueryResult> {
        let query = Message::ping(tid_from_u16(tid), NodeId::random());
        table.register(tid, remote(), query, Instant::now()).0
    }

    #[test]
    fn allocation_never_reuses_a_live_slot() {
        let mut table = TransactionTable::new();
        let first = table.allocate().unwrap();
        let _rx = register(&mut table, first);

        for _ in 0..200 {
            let tid = table.allocate().unwrap();
            assert_ne!(tid, first);
            let _rx = register(&mut table, tid);
        }
        assert_eq!(table.len(), 201);
    }

    #[test]
    fn allocation_skips_an_occupied_slot_after_wrap() {
        let mut table = TransactionTable::new();
        let tid = table.allocate().unwrap();
        let _rx = register(&mut table, tid);

        // Force the counter to point at the occupied slot again.
        table.next_tid = tid;
        let next = table.allocate().unwrap();
        assert_ne!(next, tid);
        assert_eq!(next, tid.wrapping_add(1));
    }

    #[test]
    fn completion_is_single_shot() {
        let mut table = TransactionTable::new();
        let tid = table.allocate().unwrap();
        let mut rx = register(&mut table, tid);

        let txn = table.remove(tid).unwrap();
        txn.finish(Err(Error::Timeout));
        assert!(matches!(rx.try_recv(), Ok(Err(Error::Timeout))));

        // The slot is gone; later arrivals find nothing.
        assert!(table.remove(tid).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn stale_sequence_does_not_touch_a_reused_slot() {
        let mut table = TransactionTable::new();
        let tid = table.allocate().unwrap();
        let _rx1 = register(&mut table, tid);
        let old_seq = table.get(tid).unwrap().seq();

        table.remove(tid);
        let _rx2 = register(&mut table, tid);
        let new_seq = table.get(tid).unwrap().seq();
        assert_ne!(old_seq, new_seq);

        assert!(table.remove_if_seq(tid, old_seq).is_none());
        assert!(table.get(tid).is_some());
        assert!(table.remove_if_seq(tid, new_seq).is_some());
    }

    #[test]
    fn drain_empties_every_slot() {
        let mut table = TransactionTable::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let tid = table.allocate().unwrap();
            receivers.push(register(&mut table, tid));
        }

        let drained = table.drain();
        assert_eq!(drained.len(), 5);
        assert!(table.is_empty());
        for txn in drained {
            txn.finish(Err(Error::Cancelled));
        }
        for mut rx in receivers {
            assert!(matches!(rx.try_recv(), Ok(Err(Error::Cancelled))));
        }
    }
}
