//! Protocol version management.

/// Current protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u8 = 0;

/// Minimum supported protocol version.
pub const MIN_PROTOCOL_VERSION: u8 = 0;

/// Check if a peer's protocol version is compatible.
pub fn is_compatible(peer_version: u8) -> bool {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&peer_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_is_compatible() {
        assert!(is_compatible(PROTOCOL_VERSION));
        assert!(!is_compatible(PROTOCOL_VERSION + 1));
    }
}
