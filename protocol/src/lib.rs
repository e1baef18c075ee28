//! Wire protocol: binary codec primitives, the peer identification
//! handshake message, and protocol version checks.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod version;

pub use codec::{Reader, Writer};
pub use error::DecodeError;
pub use handshake::{PeerIdentification, NODE_NETWORK};
pub use version::PROTOCOL_VERSION;
