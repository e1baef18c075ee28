//! Peer identification message exchanged when a session opens.
//!
//! Layout (little-endian, in order):
//!
//! ```text
//! version      u8
//! services     u64
//! timestamp    u32
//! port         u16
//! nonce        u32
//! user_agent   compact-size length + UTF-8 bytes (any length the prefix holds)
//! start_height u32
//! relay        u8 (0 = false)
//! ```
//!
//! The codec performs no semantic validation; plausibility checks on the
//! decoded values belong to the session layer.

use gatehouse_types::Timestamp;

use crate::codec::{var_int_len, Reader, Writer};
use crate::version::PROTOCOL_VERSION;
use crate::DecodeError;

/// Service bit: the node serves the full block chain.
pub const NODE_NETWORK: u64 = 1;

/// Size of every field except the user agent.
const FIXED_FIELDS_LEN: usize = 1 + 8 + 4 + 2 + 4 + 4 + 1;

/// Capabilities a peer announces when a session opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerIdentification {
    pub version: u8,
    pub services: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    pub port: u16,
    /// Random per-node value used to detect connections to ourselves.
    pub nonce: u32,
    pub user_agent: String,
    /// Chain height claimed by the sender.
    pub start_height: u32,
    /// Whether the sender relays new transactions.
    pub relay: bool,
}

impl PeerIdentification {
    /// Build the message this node sends on an outbound session.
    ///
    /// `start_height` is the local chain height when known; peers expect
    /// `1` when the node has no chain yet.
    pub fn new(
        port: u16,
        nonce: u32,
        user_agent: impl Into<String>,
        start_height: Option<u32>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            services: NODE_NETWORK,
            timestamp: Timestamp::now().as_u32(),
            port,
            nonce,
            user_agent: user_agent.into(),
            start_height: start_height.unwrap_or(1),
            relay: true,
        }
    }

    /// Exact number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        let ua_len = self.user_agent.len();
        FIXED_FIELDS_LEN + var_int_len(ua_len as u64) + ua_len
    }

    /// Serialize to the fixed wire layout. Never fails.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.encoded_len());
        self.encode_into(&mut w);
        w.into_bytes()
    }

    pub fn encode_into(&self, w: &mut Writer) {
        w.write_u8(self.version);
        w.write_u64(self.services);
        w.write_u32(self.timestamp);
        w.write_u16(self.port);
        w.write_u32(self.nonce);
        w.write_var_string(&self.user_agent);
        w.write_u32(self.start_height);
        w.write_bool(self.relay);
    }

    /// Decode one message from the front of `bytes`.
    ///
    /// Trailing bytes are ignored; use [`decode_with_len`](Self::decode_with_len)
    /// to learn how many bytes the message occupied.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_with_len(bytes).map(|(msg, _)| msg)
    }

    pub fn decode_with_len(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut r = Reader::new(bytes);
        let msg = Self::decode_from(&mut r)?;
        Ok((msg, r.position()))
    }

    pub fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: r.read_u8()?,
            services: r.read_u64()?,
            timestamp: r.read_u32()?,
            port: r.read_u16()?,
            nonce: r.read_u32()?,
            user_agent: r.read_var_string(usize::MAX)?,
            start_height: r.read_u32()?,
            relay: r.read_bool()?,
        })
    }

    /// Whether the sender announced [`NODE_NETWORK`].
    pub fn serves_chain(&self) -> bool {
        self.services & NODE_NETWORK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PeerIdentification {
        PeerIdentification {
            version: 0,
            services: NODE_NETWORK,
            timestamp: 1_500_000_000,
            port: 20333,
            nonce: 0xDEAD_BEEF,
            user_agent: "/gh:0.27.4/".to_string(),
            start_height: 1_234_567,
            relay: true,
        }
    }

    #[test]
    fn encodes_fields_in_wire_order() {
        let bytes = sample().encode();
        let mut expected = vec![0x00];
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&1_500_000_000u32.to_le_bytes());
        expected.extend_from_slice(&20333u16.to_le_bytes());
        expected.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        expected.push(11);
        expected.extend_from_slice(b"/gh:0.27.4/");
        expected.extend_from_slice(&1_234_567u32.to_le_bytes());
        expected.push(0x01);
        assert_eq!(bytes, expected);
        assert_eq!(bytes.len(), sample().encoded_len());
    }

    #[test]
    fn decode_reverses_encode() {
        let msg = sample();
        assert_eq!(PeerIdentification::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn trailing_bytes_are_left_alone() {
        let msg = sample();
        let mut bytes = msg.encode();
        let len = bytes.len();
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let (decoded, consumed) = PeerIdentification::decode_with_len(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(consumed, len);
    }

    #[test]
    fn empty_input_is_truncated() {
        assert!(matches!(
            PeerIdentification::decode(&[]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn long_user_agents_survive_the_round_trip() {
        // 1025 bytes needs the 3-byte prefix, 70_000 the 5-byte one.
        for len in [1025, 70_000] {
            let mut msg = sample();
            msg.user_agent = "é".repeat(len / 2) + &"a".repeat(len % 2);
            assert_eq!(msg.user_agent.len(), len);
            let bytes = msg.encode();
            assert_eq!(bytes.len(), msg.encoded_len());
            assert_eq!(PeerIdentification::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn declared_user_agent_longer_than_the_message_is_truncated() {
        let mut w = Writer::new();
        w.write_u8(0);
        w.write_u64(NODE_NETWORK);
        w.write_u32(0);
        w.write_u16(0);
        w.write_u32(0);
        w.write_var_int(1025);
        w.write_var_string("short");
        assert!(matches!(
            PeerIdentification::decode(&w.into_bytes()),
            Err(DecodeError::Truncated { needed: 1025, .. })
        ));
    }

    #[test]
    fn non_utf8_user_agent_is_invalid() {
        let mut w = Writer::new();
        w.write_u8(0);
        w.write_u64(NODE_NETWORK);
        w.write_u32(0);
        w.write_u16(0);
        w.write_u32(0);
        w.write_var_bytes(&[0xC3, 0x28]);
        w.write_u32(0);
        w.write_bool(true);
        assert!(matches!(
            PeerIdentification::decode(&w.into_bytes()),
            Err(DecodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn outbound_constructor_defaults() {
        let msg = PeerIdentification::new(10333, 7, "/gatehouse/", None);
        assert_eq!(msg.version, PROTOCOL_VERSION);
        assert!(msg.serves_chain());
        assert_eq!(msg.start_height, 1);
        assert!(msg.relay);
        assert!(msg.timestamp > 0);

        let msg = PeerIdentification::new(10333, 7, "/gatehouse/", Some(99));
        assert_eq!(msg.start_height, 99);
    }
}
