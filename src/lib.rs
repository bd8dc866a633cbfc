//! Mainline DHT node library ([BEP-5]).
//!
//! This crate implements the core of a BitTorrent DHT node: the KRPC
//! message model and codec, a Kademlia routing table keyed by 160-bit
//! node ids, transaction dispatch with timeouts, and the iterative
//! lookup operations used to find nodes and peers. Node ids are bound to
//! the sender's IP address per [BEP-42].
//!
//! The node owns no socket. A host wires in a [`Channel`] for outbound
//! datagrams and feeds decoded inbound messages to [`Node::received`];
//! resolution of named bootstrap hosts goes through a pluggable
//! [`AddressResolver`].
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 value codec backing the wire format
//! - [`message`] - KRPC message model, compact node and peer encodings
//! - [`id`] - 160-bit ids, XOR distance, range arithmetic
//! - [`address`] - host/port addressing and compact contacts
//! - [`security`] - BEP-42 address-constrained node ids
//! - [`remote`] - per-remote liveness tracking
//! - [`routing`] - bucket tree around the local pivot
//! - [`transactions`] - outstanding-query table
//! - [`node`] - dispatch, admission, handlers, announce tokens
//! - [`ops`] - ping, find-node, and get-peers state machines
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mldht::{Error, FindNode, Identifier, Message, NetworkAddress, Node, NodeConfig};
//!
//! struct UdpChannel;
//!
//! impl mldht::Channel for UdpChannel {
//!     fn transmit(&self, message: Message, to: &NetworkAddress) -> Result<(), Error> {
//!         // hand message.to_bytes() to a datagram socket
//!         # let _ = (message, to);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Error> {
//! let node = Node::new(NodeConfig::default());
//! node.set_channel(Arc::new(UdpChannel));
//!
//! let bootstrap = vec![Identifier::unresolved(NetworkAddress::name(
//!     "router.bittorrent.com",
//!     6881,
//! ))];
//! let closest = FindNode::new(&node, node.ipv4_node_id(), bootstrap)
//!     .run()
//!     .await?;
//! # let _ = closest;
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html
//! [BEP-42]: http://bittorrent.org/beps/bep_0042.html

pub mod address;
pub mod bencode;
pub mod error;
pub mod id;
pub mod message;
pub mod node;
pub mod ops;
pub mod remote;
pub mod routing;
pub mod security;
pub mod transactions;

pub use address::{AddressResolver, Family, Host, NetworkAddress, NullResolver};
pub use error::Error;
pub use id::{Distance, InfoHash, NodeId};
pub use message::{Arguments, CompactNode, Message, MessageKind, Method, TransactionId, Want};
pub use node::{Channel, Node, NodeConfig, PendingQuery, DEFAULT_QUERY_TIMEOUT};
pub use ops::{FindNode, GetPeers, OperationState, Ping};
pub use remote::{Identifier, NodeState, RemoteNode};
pub use routing::{AddOutcome, Bucket, RoutingTable};
pub use transactions::{QueryResult, TransactionTable};
