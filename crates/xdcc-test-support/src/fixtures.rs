//! Canned bot chatter and deterministic payloads.

/// Nickname used by the fixture bot.
pub const BOT: &str = "[XDCC]Bot";

/// Channel the fixture bot lives in.
pub const CHANNEL: &str = "#xdcc";

/// Announced size of the fixture packet (50 MiB).
pub const PACKET_SIZE: u64 = 52_428_800;

/// Packet listing advertising packet 4.
pub const LISTING: &str = "#4 1x [50MB] My.File.mkv";

/// Slot report with two free slots.
pub const SLOTS_OPEN: &str = "** 4 packs **  2 of 10 slots open, Queue: 0/20, Record: 512.0KB/s";

/// Banner line that must be treated as noise in [`CHANNEL`].
pub const BANNER: &str = "** Welcome to #xdcc **";

/// CTCP-wrapped `DCC SEND` offer for `file` served from `127.0.0.1:port`.
#[must_use]
pub fn dcc_send(file: &str, port: u16, size: u64) -> String {
    // 2130706433 is 127.0.0.1 in the numeric notation bots use.
    format!("\u{1}DCC SEND {file} 2130706433 {port} {size}\u{1}")
}

/// CTCP-wrapped `DCC ACCEPT` answer to a resume request.
#[must_use]
pub fn dcc_accept(file: &str, port: u16, offset: u64) -> String {
    format!("\u{1}DCC ACCEPT {file} {port} {offset}\u{1}")
}

/// Deterministic payload of `len` bytes. Every offset has a predictable value
/// so resumed transfers can be checked against a fresh copy.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(byte_at).collect()
}

/// Byte [`payload`] carries at `offset`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn byte_at(offset: usize) -> u8 {
    (offset % 251) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_deterministic() {
        let bytes = payload(600);
        assert_eq!(bytes.len(), 600);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[251], 0);
        assert_eq!(bytes[502], byte_at(502));
    }

    #[test]
    fn offers_use_numeric_loopback() {
        assert_eq!(
            dcc_send("a.bin", 5000, 10),
            "\u{1}DCC SEND a.bin 2130706433 5000 10\u{1}"
        );
    }
}
