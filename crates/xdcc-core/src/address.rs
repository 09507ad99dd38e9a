//! Peer addresses as they appear in DCC offers.

use std::net::Ipv4Addr;

/// Parse the address field of a `DCC SEND` offer.
///
/// A dotted quad is taken as is. A bare integer is rendered as a dotted quad in
/// host (little-endian) byte order and the four groups are then reversed, which
/// is how offers from the wild have to be read: `3232235521` becomes
/// `192.168.0.1`. Integers outside the IPv4 range are rejected.
#[must_use]
pub fn parse_peer_address(raw: &str) -> Option<Ipv4Addr> {
    let raw = raw.trim();
    if raw.contains('.') {
        return raw.parse().ok();
    }
    let numeric: u32 = raw.parse().ok()?;
    let [first, second, third, fourth] = numeric.to_le_bytes();
    Some(Ipv4Addr::new(fourth, third, second, first))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_addresses_are_byte_reversed() {
        assert_eq!(
            parse_peer_address("3232235521"),
            Some(Ipv4Addr::new(192, 168, 0, 1))
        );
        assert_eq!(
            parse_peer_address("2130706433"),
            Some(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn dotted_addresses_pass_through() {
        assert_eq!(
            parse_peer_address("10.0.0.7"),
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(parse_peer_address("4294967296"), None);
        assert_eq!(parse_peer_address("10.0.0"), None);
        assert_eq!(parse_peer_address("host"), None);
    }
}
