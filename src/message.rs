//! KRPC message model (BEP-5).
//!
//! A KRPC message is a bencoded dictionary with a transaction id `t`, a
//! kind `y` (query, response, or error), and kind-specific payloads:
//! `q`/`a` for queries, `r` for responses, `e` for errors. Contacts
//! travel inside responses in compact form, 26 bytes per IPv4 node and
//! 38 per IPv6 node; peers as bare 6- or 18-byte endpoint strings.
//!
//! The model is codec-agnostic at the node boundary: hosts may decode
//! datagrams themselves and hand [`Message`] values in, or use
//! [`Message::from_bytes`]/[`Message::to_bytes`] backed by the crate's
//! bencode module.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::{Family, NetworkAddress, NullResolver};
use crate::bencode::{self, Value};
use crate::error::Error;
use crate::id::{InfoHash, NodeId};

/// Raw transaction id bytes as they appear in `t`.
///
/// Arbitrary byte strings are legal on the wire; the canonical form this
/// node emits is two big-endian bytes holding a u16.
pub type TransactionId = Bytes;

/// Canonical two-byte transaction id for a u16.
pub fn tid_from_u16(tid: u16) -> TransactionId {
    Bytes::copy_from_slice(&tid.to_be_bytes())
}

/// Interprets a canonical two-byte transaction id; `None` for any other
/// length.
pub fn tid_to_u16(tid: &[u8]) -> Option<u16> {
    match tid {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// KRPC method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
    /// A method this node does not implement; kept verbatim for the
    /// "Method Unknown" error reply.
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Ping => "ping",
            Method::FindNode => "find_node",
            Method::GetPeers => "get_peers",
            Method::AnnouncePeer => "announce_peer",
            Method::Other(name) => name,
        }
    }

    fn from_name(name: &str) -> Method {
        match name {
            "ping" => Method::Ping,
            "find_node" => Method::FindNode,
            "get_peers" => Method::GetPeers,
            "announce_peer" => Method::AnnouncePeer,
            other => Method::Other(other.to_string()),
        }
    }
}

/// Result-family selector carried in `want`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    V4,
    V6,
}

/// A contact from a compact node list: node id plus endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactNode {
    pub id: NodeId,
    pub address: NetworkAddress,
}

impl CompactNode {
    /// Decodes a concatenated compact node list. A byte length that is
    /// not a multiple of the element size marks the whole list malformed
    /// and decodes as empty.
    pub fn decode_list(bytes: &[u8], family: Family) -> Vec<CompactNode> {
        let size = match family {
            Family::V4 => 26,
            Family::V6 => 38,
        };
        if bytes.len() % size != 0 {
            return Vec::new();
        }
        bytes
            .chunks_exact(size)
            .filter_map(|chunk| {
                let id = NodeId::from_bytes(&chunk[..20]).ok()?;
                let address = NetworkAddress::from_compact(&chunk[20..])?;
                Some(CompactNode { id, address })
            })
            .collect()
    }

    fn encode_list(nodes: &[CompactNode], family: Family) -> Bytes {
        let mut buf = BytesMut::new();
        for node in nodes {
            if node.address.family() != family {
                continue;
            }
            let Some(contact) = node.address.compact(&NullResolver) else {
                continue;
            };
            buf.put_slice(node.id.as_bytes());
            buf.put_slice(&contact);
        }
        buf.freeze()
    }
}

/// Payload dictionary of a query (`a`) or response (`r`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    /// Sender's node id.
    pub id: Option<NodeId>,
    pub target: Option<NodeId>,
    pub info_hash: Option<InfoHash>,
    pub port: Option<u16>,
    pub implied_port: bool,
    pub token: Option<Bytes>,
    /// IPv4 compact node list; `Some(vec![])` encodes an explicit empty
    /// list, `None` omits the field.
    pub nodes: Option<Vec<CompactNode>>,
    pub nodes6: Option<Vec<CompactNode>>,
    /// Compact peer endpoints from a `values` list.
    pub values: Option<Vec<NetworkAddress>>,
    pub want: Option<Vec<Want>>,
}

/// The three KRPC message kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Query { method: Method, args: Arguments },
    Response { args: Arguments },
    Error { code: i64, message: String },
}

/// A decoded KRPC message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub transaction_id: TransactionId,
    pub kind: MessageKind,
    /// Client version bytes (`v`).
    pub version: Option<Bytes>,
    /// The sender's view of the recipient's external endpoint (`ip`).
    pub observed_ip: Option<NetworkAddress>,
    /// BEP-43 read-only flag (`ro`).
    pub read_only: bool,
}

impl Message {
    fn query(transaction_id: TransactionId, method: Method, args: Arguments) -> Self {
        Self {
            transaction_id,
            kind: MessageKind::Query { method, args },
            version: None,
            observed_ip: None,
            read_only: false,
        }
    }

    pub fn ping(transaction_id: TransactionId, id: NodeId) -> Self {
        Self::query(
            transaction_id,
            Method::Ping,
            Arguments {
                id: Some(id),
                ..Arguments::default()
            },
        )
    }

    pub fn find_node(
        transaction_id: TransactionId,
        id: NodeId,
        target: NodeId,
        want: Option<Vec<Want>>,
    ) -> Self {
        Self::query(
            transaction_id,
            Method::FindNode,
            Arguments {
                id: Some(id),
                target: Some(target),
                want,
                ..Arguments::default()
            },
        )
    }

    pub fn get_peers(
        transaction_id: TransactionId,
        id: NodeId,
        info_hash: InfoHash,
        want: Option<Vec<Want>>,
    ) -> Self {
        Self::query(
            transaction_id,
            Method::GetPeers,
            Arguments {
                id: Some(id),
                info_hash: Some(info_hash),
                want,
                ..Arguments::default()
            },
        )
    }

    /// Announce query. Without a torrent port the announce asks the
    /// responder to take the port from the datagram source
    /// (`implied_port = 1`, `port = 0`).
    pub fn announce_peer(
        transaction_id: TransactionId,
        id: NodeId,
        info_hash: InfoHash,
        token: Bytes,
        torrent_port: Option<u16>,
    ) -> Self {
        Self::query(
            transaction_id,
            Method::AnnouncePeer,
            Arguments {
                id: Some(id),
                info_hash: Some(info_hash),
                token: Some(token),
                port: Some(torrent_port.unwrap_or(0)),
                implied_port: torrent_port.is_none(),
                ..Arguments::default()
            },
        )
    }

    pub fn response(transaction_id: TransactionId, args: Arguments) -> Self {
        Self {
            transaction_id,
            kind: MessageKind::Response { args },
            version: None,
            observed_ip: None,
            read_only: false,
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: &str) -> Self {
        Self {
            transaction_id,
            kind: MessageKind::Error {
                code,
                message: message.to_string(),
            },
            version: None,
            observed_ip: None,
            read_only: false,
        }
    }

    pub fn query_args(&self) -> Option<&Arguments> {
        match &self.kind {
            MessageKind::Query { args, .. } => Some(args),
            _ => None,
        }
    }

    pub fn response_args(&self) -> Option<&Arguments> {
        match &self.kind {
            MessageKind::Response { args } => Some(args),
            _ => None,
        }
    }

    /// Sender id from whichever payload the kind carries.
    pub fn sender_id(&self) -> Option<NodeId> {
        match &self.kind {
            MessageKind::Query { args, .. } | MessageKind::Response { args } => args.id,
            MessageKind::Error { .. } => None,
        }
    }

    /// Encodes to the bencoded wire form.
    pub fn to_bytes(&self) -> Bytes {
        bencode::encode(&self.to_value())
    }

    /// Decodes from the bencoded wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_value(&bencode::decode(bytes)?)
    }

    fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(key("t"), Value::Str(self.transaction_id.clone()));

        if let Some(version) = &self.version {
            dict.insert(key("v"), Value::Str(version.clone()));
        }
        if let Some(ip) = &self.observed_ip {
            if let Some(compact) = ip.compact(&NullResolver) {
                dict.insert(key("ip"), Value::Str(compact));
            }
        }
        if self.read_only {
            dict.insert(key("ro"), Value::Int(1));
        }

        match &self.kind {
            MessageKind::Query { method, args } => {
                dict.insert(key("y"), Value::str("q"));
                dict.insert(key("q"), Value::str(method.as_str()));
                dict.insert(key("a"), args_to_value(args));
            }
            MessageKind::Response { args } => {
                dict.insert(key("y"), Value::str("r"));
                dict.insert(key("r"), args_to_value(args));
            }
            MessageKind::Error { code, message } => {
                dict.insert(key("y"), Value::str("e"));
                dict.insert(
                    key("e"),
                    Value::List(vec![Value::Int(*code), Value::str(message)]),
                );
            }
        }

        Value::Dict(dict)
    }

    fn from_value(value: &Value) -> Result<Self, Error> {
        let kind_tag = value
            .get(b"y")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedMessage("missing message kind".into()))?;

        let kind = match kind_tag {
            "q" => {
                let name = value
                    .get(b"q")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::MalformedMessage("query without method name".into()))?;
                let args = value.get(b"a").map(parse_args).unwrap_or_default();
                MessageKind::Query {
                    method: Method::from_name(name),
                    args,
                }
            }
            "r" => MessageKind::Response {
                args: value.get(b"r").map(parse_args).unwrap_or_default(),
            },
            "e" => {
                let detail = value.get(b"e").and_then(Value::as_list);
                let code = detail
                    .and_then(|list| list.first())
                    .and_then(Value::as_int)
                    .unwrap_or(0);
                let message = detail
                    .and_then(|list| list.get(1))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                MessageKind::Error { code, message }
            }
            other => {
                return Err(Error::MalformedMessage(format!(
                    "unknown message kind: {other}"
                )))
            }
        };

        Ok(Self {
            transaction_id: value
                .get(b"t")
                .and_then(Value::as_bytes)
                .cloned()
                .unwrap_or_default(),
            kind,
            version: value.get(b"v").and_then(Value::as_bytes).cloned(),
            observed_ip: value
                .get(b"ip")
                .and_then(Value::as_bytes)
                .and_then(|b| NetworkAddress::from_compact(b)),
            read_only: value.get(b"ro").and_then(Value::as_int) == Some(1),
        })
    }
}

fn key(name: &'static str) -> Bytes {
    Bytes::from_static(name.as_bytes())
}

fn args_to_value(args: &Arguments) -> Value {
    let mut dict = BTreeMap::new();

    if let Some(id) = &args.id {
        dict.insert(key("id"), Value::bytes(id.as_bytes()));
    }
    if let Some(target) = &args.target {
        dict.insert(key("target"), Value::bytes(target.as_bytes()));
    }
    if let Some(info_hash) = &args.info_hash {
        dict.insert(key("info_hash"), Value::bytes(info_hash.as_bytes()));
    }
    if let Some(port) = args.port {
        dict.insert(key("port"), Value::Int(port as i64));
    }
    if args.implied_port {
        dict.insert(key("implied_port"), Value::Int(1));
    }
    if let Some(token) = &args.token {
        dict.insert(key("token"), Value::Str(token.clone()));
    }
    if let Some(nodes) = &args.nodes {
        dict.insert(
            key("nodes"),
            Value::Str(CompactNode::encode_list(nodes, Family::V4)),
        );
    }
    if let Some(nodes6) = &args.nodes6 {
        dict.insert(
            key("nodes6"),
            Value::Str(CompactNode::encode_list(nodes6, Family::V6)),
        );
    }
    if let Some(values) = &args.values {
        let peers = values
            .iter()
            .filter_map(|address| address.compact(&NullResolver))
            .map(Value::Str)
            .collect();
        dict.insert(key("values"), Value::List(peers));
    }
    if let Some(want) = &args.want {
        let tags = want
            .iter()
            .map(|w| match w {
                Want::V4 => Value::str("n4"),
                Want::V6 => Value::str("n6"),
            })
            .collect();
        dict.insert(key("want"), Value::List(tags));
    }

    Value::Dict(dict)
}

fn parse_args(value: &Value) -> Arguments {
    let id20 = |field: &[u8]| {
        value
            .get(field)
            .and_then(Value::as_bytes)
            .and_then(|b| NodeId::from_bytes(b).ok())
    };

    Arguments {
        id: id20(b"id"),
        target: id20(b"target"),
        info_hash: id20(b"info_hash"),
        port: value
            .get(b"port")
            .and_then(Value::as_int)
            .and_then(|p| u16::try_from(p).ok()),
        implied_port: value.get(b"implied_port").and_then(Value::as_int) == Some(1),
        token: value.get(b"token").and_then(Value::as_bytes).cloned(),
        nodes: value
            .get(b"nodes")
            .and_then(Value::as_bytes)
            .map(|b| CompactNode::decode_list(b, Family::V4)),
        nodes6: value
            .get(b"nodes6")
            .and_then(Value::as_bytes)
            .map(|b| CompactNode::decode_list(b, Family::V6)),
        values: value.get(b"values").and_then(Value::as_list).map(|list| {
            // Elements of unexpected size are skipped, not fatal.
            list.iter()
                .filter_map(Value::as_bytes)
                .filter_map(|b| NetworkAddress::from_compact(b))
                .collect()
        }),
        want: value.get(b"want").and_then(Value::as_list).map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .filter_map(|tag| match tag {
                    "n4" => Some(Want::V4),
                    "n6" => Some(Want::V6),
                    _ => None,
                })
                .collect()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Host;
    use std::net::Ipv4Addr;

    fn v4(d: u8, port: u16) -> NetworkAddress {
        NetworkAddress::new(Host::V4(Ipv4Addr::new(192, 0, 2, d)), port)
    }

    #[test]
    fn tid_canonical_form() {
        assert_eq!(tid_to_u16(&tid_from_u16(0xbeef)), Some(0xbeef));
        assert_eq!(tid_to_u16(b"abc"), None);
        assert_eq!(tid_to_u16(b""), None);
    }

    #[test]
    fn ping_round_trip() {
        let id = NodeId::random();
        let msg = Message::ping(tid_from_u16(7), id);
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.transaction_id, tid_from_u16(7));
        match parsed.kind {
            MessageKind::Query { method, args } => {
                assert_eq!(method, Method::Ping);
                assert_eq!(args.id, Some(id));
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn find_node_round_trip_with_want() {
        let id = NodeId::random();
        let target = NodeId::random();
        let msg = Message::find_node(tid_from_u16(1), id, target, Some(vec![Want::V4, Want::V6]));
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        let args = parsed.query_args().unwrap();
        assert_eq!(args.target, Some(target));
        assert_eq!(args.want, Some(vec![Want::V4, Want::V6]));
    }

    #[test]
    fn announce_defaults_to_implied_port() {
        let msg = Message::announce_peer(
            tid_from_u16(2),
            NodeId::random(),
            NodeId::random(),
            Bytes::from_static(b"tok"),
            None,
        );
        let args = msg.query_args().unwrap();
        assert!(args.implied_port);
        assert_eq!(args.port, Some(0));

        let msg = Message::announce_peer(
            tid_from_u16(2),
            NodeId::random(),
            NodeId::random(),
            Bytes::from_static(b"tok"),
            Some(51413),
        );
        let args = msg.query_args().unwrap();
        assert!(!args.implied_port);
        assert_eq!(args.port, Some(51413));
    }

    #[test]
    fn response_with_nodes_round_trips() {
        let nodes = vec![
            CompactNode {
                id: NodeId::random(),
                address: v4(1, 6881),
            },
            CompactNode {
                id: NodeId::random(),
                address: v4(2, 6882),
            },
        ];
        let msg = Message::response(
            tid_from_u16(3),
            Arguments {
                id: Some(NodeId::random()),
                nodes: Some(nodes.clone()),
                ..Arguments::default()
            },
        );
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.response_args().unwrap().nodes, Some(nodes));
    }

    #[test]
    fn malformed_node_list_decodes_empty() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0xaa; 26]);
        bytes.push(0xbb);
        assert!(CompactNode::decode_list(&bytes, Family::V4).is_empty());
        assert_eq!(CompactNode::decode_list(&[0xaa; 52], Family::V4).len(), 2);
        assert_eq!(CompactNode::decode_list(&[], Family::V4).len(), 0);
    }

    #[test]
    fn odd_sized_peer_values_are_skipped() {
        let mut dict = BTreeMap::new();
        let mut args = BTreeMap::new();
        args.insert(
            Bytes::from_static(b"values"),
            Value::List(vec![
                Value::bytes(&[192, 0, 2, 1, 0x1a, 0xe1]),
                Value::bytes(&[1, 2, 3]),
                Value::bytes(&[192, 0, 2, 2, 0x1a, 0xe2]),
            ]),
        );
        dict.insert(Bytes::from_static(b"t"), Value::str("aa"));
        dict.insert(Bytes::from_static(b"y"), Value::str("r"));
        dict.insert(Bytes::from_static(b"r"), Value::Dict(args));

        let msg = Message::from_bytes(&bencode::encode(&Value::Dict(dict))).unwrap();
        let values = msg.response_args().unwrap().values.clone().unwrap();
        assert_eq!(values, vec![v4(1, 6881), v4(2, 6882)]);
    }

    #[test]
    fn explicit_empty_node_list_is_kept() {
        let msg = Message::response(
            tid_from_u16(4),
            Arguments {
                id: Some(NodeId::random()),
                nodes: Some(Vec::new()),
                ..Arguments::default()
            },
        );
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        let args = parsed.response_args().unwrap();
        assert_eq!(args.nodes, Some(Vec::new()));
        assert_eq!(args.nodes6, None);
    }

    #[test]
    fn error_round_trip() {
        let msg = Message::error(tid_from_u16(5), 204, "Method Unknown: punch");
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        match parsed.kind {
            MessageKind::Error { code, message } => {
                assert_eq!(code, 204);
                assert_eq!(message, "Method Unknown: punch");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn read_only_and_ip_fields_round_trip() {
        let mut msg = Message::ping(tid_from_u16(6), NodeId::random());
        msg.read_only = true;
        msg.observed_ip = Some(v4(9, 6881));
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert!(parsed.read_only);
        assert_eq!(parsed.observed_ip, Some(v4(9, 6881)));
    }

    #[test]
    fn missing_kind_is_rejected() {
        assert!(Message::from_bytes(b"d1:t2:aae").is_err());
        assert!(Message::from_bytes(b"1:x").is_err());
    }
}
