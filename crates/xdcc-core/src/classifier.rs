//! Stateless classification of bot chatter into protocol events.
//!
//! # Design
//! - One compiled pattern set per classifier; patterns are case-insensitive and
//!   accept English and German phrasing.
//! - Bots prefix info lines with a short marker (`**`, `::`, `->`, `<-` or
//!   nothing); every info pattern tolerates it.
//! - Anything unrecognised yields `None`; malformed chatter is never an error.

use std::net::Ipv4Addr;

use regex::{Regex, RegexBuilder};

use crate::address::parse_peer_address;
use crate::error::{CoreError, CoreResult};
use crate::message::ChatLine;
use crate::units::{parse_size, parse_speed};

/// Marker bots put in front of info lines.
const MAGIC: &str = r"((\*|:){2,3}|->|<-|)";

/// Substrings stripped from advertised packet names.
const NAME_NOISE: [&str; 6] = ["Movies", "Charts", "[]", "\u{f}", "\u{fffd}", "\u{16}"];

/// Offer announced through `DCC SEND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccOffer {
    pub file: String,
    pub peer: Ipv4Addr,
    /// Raw port; bots with broken setups announce zero or negative ports.
    pub port: i64,
    pub size: u64,
}

/// Slot and queue figures from a bot's info line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotReport {
    pub slots_current: Option<u32>,
    pub slots_total: Option<u32>,
    pub queue_current: Option<u32>,
    pub queue_total: Option<u32>,
}

/// Closing or transfer-completed notice, with forced channel changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosingNotice {
    pub reason: String,
    pub join: Option<String>,
    pub part: Vec<String>,
}

/// A typed protocol event recognised in one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// CTCP `VERSION` (`custom == false`) or `XGVERSION` (`custom == true`).
    VersionQuery { custom: bool },
    /// The bot offers a file.
    DccSend(DccOffer),
    /// The bot agreed to resume an offer at `offset`.
    DccAccept { file: String, port: u16, offset: u64 },
    /// Slot and queue occupancy.
    SlotInfo(SlotReport),
    /// Bandwidth usage in bytes per second.
    Bandwidth {
        current: Option<u64>,
        max: Option<u64>,
    },
    /// One line of a bot's packet list.
    PacketListing { number: u32, size: u64, name: String },
    /// The bot closed our transfer or request.
    Closing(ClosingNotice),
    /// The bot put us into its queue.
    Queued {
        position: Option<u32>,
        total: Option<u32>,
    },
}

impl ProtocolEvent {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::VersionQuery { .. } => "version_query",
            Self::DccSend(_) => "dcc_send",
            Self::DccAccept { .. } => "dcc_accept",
            Self::SlotInfo(_) => "slot_info",
            Self::Bandwidth { .. } => "bandwidth",
            Self::PacketListing { .. } => "packet_listing",
            Self::Closing(_) => "closing",
            Self::Queued { .. } => "queued",
        }
    }
}

/// Compiled pattern set.
#[derive(Debug, Clone)]
pub struct Classifier {
    quoted_dcc: Regex,
    slot_info: Regex,
    bandwidth: Regex,
    packet_listing: Regex,
    closing: [Regex; 2],
    forced_join: Regex,
    forced_part: Regex,
    queued: Regex,
    noise: [Regex; 5],
    banner: Regex,
}

fn compile(name: &'static str, pattern: &str) -> CoreResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| CoreError::pattern(name, source))
}

impl Classifier {
    /// Compile the pattern set.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            quoted_dcc: compile(
                "quoted_dcc",
                r#"^DCC (?P<verb>SEND|ACCEPT) "(?P<name>.+)"(?P<data>[^"]+)$"#,
            )?,
            slot_info: compile(
                "slot_info",
                &format!(
                    r"{MAGIC}\s*([0-9]*) (packs?|pa(c|)ket(e|)|fil[e]+s) {MAGIC}\s*(?P<slot_cur>[0-9]*) (of|von) (?P<slot_total>[0-9]*) (slots?|pl(a|ä|.)tz(e|)(n|)) (open|opened|free|frei|in use|offen)(, ((queue|warteschlange): (?P<queue_cur>[0-9]*)(/| of )(?P<queue_total>[0-9]*),|)(?:.*?(record( [a-z]+|): (?P<record>[0-9.,]*)(k|)b/s))?|)"
                ),
            )?,
            bandwidth: compile(
                "bandwidth",
                &format!(
                    r"{MAGIC}\s*((bandwidth usage|bandbreite)\s*{MAGIC}|)\s*(current|derzeit): (?P<speed_cur>[0-9.,]*)(?P<speed_cur_end>(k|)(i|)b)(/s|s)(,|)(?:.*?record: (?P<speed_max>[0-9.,]*)(?P<speed_max_end>(k|)(i|))b(/s|s))?"
                ),
            )?,
            packet_listing: compile(
                "packet_listing",
                r"#(?P<pack_id>\d+)(\x{0240}|\x{a0}|\x{fffd}|)\s+(\d*)x\s+\[\s*(\x{fffd}|)\s*(?P<pack_size>[<>\d.,]+)\s*(?P<pack_add>[bgikms]+)\]\s+(?P<pack_name>.*)",
            )?,
            closing: [
                compile(
                    "closing_connection",
                    &format!(r"{MAGIC}\s*(closing connection|transfer completed)(?P<reason>.*)"),
                )?,
                compile(
                    "closing_connection_de",
                    &format!(r"{MAGIC}\s*(schlie.e verbindung)(?P<reason>.*)"),
                )?,
            ],
            forced_join: compile("forced_join", r".*\s+JOIN (?P<channel>[^\s]+).*")?,
            forced_part: compile(
                "forced_part",
                r".*restricted to only.* /Part (?P<channels>.*) if you want to download from .*",
            )?,
            queued: compile(
                "queued",
                r"(added you to the (main |idle |)queue|queueing you|you have been queued|in die warteschlange)(?:.*?position\s+(?P<position>[0-9]+)(?:\s*(of|von)\s*(?P<total>[0-9]+))?)?",
            )?,
            noise: [
                compile("noise_request", &format!(r"{MAGIC}\s*to request .* type .*"))?,
                compile("noise_msg", r".*/(msg|ctcp) .* xdcc (info|send) .*")?,
                compile("noise_group", &format!(r"{MAGIC}\s*to list a group, type .*"))?,
                compile(
                    "noise_totals",
                    r"total offered(!|): (\[|)[0-9.]*\s*[begikmsty]+(\]|)\s*total transfer(r|)ed: (\[|)[0-9.]*\s*[begikmsty]+(\]|)",
                )?,
                compile(
                    "noise_sponsor",
                    r".* (brought to you|powered|sp(o|0)ns(o|0)red) by .*",
                )?,
            ],
            banner: compile(
                "noise_banner",
                &format!(r"{MAGIC}\s.*(?P<channel>[#&][^\s]+) {MAGIC}"),
            )?,
        })
    }

    /// Classify one chat line.
    #[must_use]
    pub fn classify(&self, line: &ChatLine) -> Option<ProtocolEvent> {
        if let Some(payload) = line.ctcp() {
            return self.classify_ctcp(payload);
        }
        self.classify_text(&strip_formatting(&line.text))
    }

    /// Classify a CTCP payload (delimiters already removed).
    #[must_use]
    pub fn classify_ctcp(&self, payload: &str) -> Option<ProtocolEvent> {
        let payload = payload.trim();
        if payload.eq_ignore_ascii_case("VERSION") {
            return Some(ProtocolEvent::VersionQuery { custom: false });
        }
        if payload.eq_ignore_ascii_case("XGVERSION") {
            return Some(ProtocolEvent::VersionQuery { custom: true });
        }
        if payload
            .get(..4)
            .is_some_and(|head| head.eq_ignore_ascii_case("DCC "))
        {
            return self.classify_dcc(payload);
        }
        None
    }

    fn classify_dcc(&self, payload: &str) -> Option<ProtocolEvent> {
        let normalized = match self.quoted_dcc.captures(payload) {
            Some(caps) => format!(
                "DCC {} {}{}",
                &caps["verb"],
                caps["name"].replace(' ', "_").replace(['\'', '"'], ""),
                &caps["data"]
            ),
            None => payload.to_string(),
        };
        let fields: Vec<&str> = normalized.split_whitespace().collect();
        let verb = fields.get(1)?;

        if verb.eq_ignore_ascii_case("SEND") {
            let file = (*fields.get(2)?).to_string();
            let peer = parse_peer_address(fields.get(3)?)?;
            let port = fields.get(4)?.parse().ok()?;
            let size = fields.get(5)?.parse().ok()?;
            return Some(ProtocolEvent::DccSend(DccOffer {
                file,
                peer,
                port,
                size,
            }));
        }

        if verb.eq_ignore_ascii_case("ACCEPT") {
            let file = (*fields.get(2)?).to_string();
            let port = fields.get(3)?.parse().ok()?;
            let offset = fields.get(4)?.parse().ok()?;
            return Some(ProtocolEvent::DccAccept { file, port, offset });
        }

        None
    }

    /// Classify plain (non-CTCP) chatter.
    #[must_use]
    pub fn classify_text(&self, text: &str) -> Option<ProtocolEvent> {
        if let Some(notice) = self.closing_notice(text) {
            return Some(ProtocolEvent::Closing(notice));
        }

        if let Some(caps) = self.queued.captures(text) {
            return Some(ProtocolEvent::Queued {
                position: parse_group(&caps, "position"),
                total: parse_group(&caps, "total"),
            });
        }

        if let Some(caps) = self.slot_info.captures(text) {
            return Some(ProtocolEvent::SlotInfo(SlotReport {
                slots_current: parse_group(&caps, "slot_cur"),
                slots_total: parse_group(&caps, "slot_total"),
                queue_current: parse_group(&caps, "queue_cur"),
                queue_total: parse_group(&caps, "queue_total"),
            }));
        }

        if let Some(caps) = self.bandwidth.captures(text) {
            let speed = |value: &str, unit: &str| {
                caps.name(value)
                    .and_then(|value| parse_speed(value.as_str(), group(&caps, unit)))
            };
            return Some(ProtocolEvent::Bandwidth {
                current: speed("speed_cur", "speed_cur_end"),
                max: speed("speed_max", "speed_max_end"),
            });
        }

        if let Some(caps) = self.packet_listing.captures(text) {
            let number = parse_group(&caps, "pack_id")?;
            let size = parse_size(group(&caps, "pack_size"), group(&caps, "pack_add"))?;
            return Some(ProtocolEvent::PacketListing {
                number,
                size,
                name: clean_packet_name(group(&caps, "pack_name")),
            });
        }

        None
    }

    fn closing_notice(&self, text: &str) -> Option<ClosingNotice> {
        let caps = self
            .closing
            .iter()
            .find_map(|pattern| pattern.captures(text))?;

        let join = self.forced_join.captures(text).map(|caps| {
            let channel = group(&caps, "channel");
            if channel.starts_with('#') {
                channel.to_string()
            } else {
                format!("#{channel}")
            }
        });

        let part = self
            .forced_part
            .captures(text)
            .map(|caps| {
                group(&caps, "channels")
                    .split('+')
                    .map(str::trim)
                    .filter(|channel| channel.starts_with('#'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(ClosingNotice {
            reason: group(&caps, "reason")
                .trim_start_matches([':', ' '])
                .trim()
                .to_string(),
            join,
            part,
        })
    }

    /// Whether unrecognised chatter is one of the well-known decorative lines
    /// bots print (request help, totals, sponsors, channel banners).
    #[must_use]
    pub fn is_noise(&self, text: &str, channel: Option<&str>) -> bool {
        let text = strip_formatting(text);
        if self.noise.iter().any(|pattern| pattern.is_match(&text)) {
            return true;
        }
        match (channel, self.banner.captures(&text)) {
            (Some(channel), Some(caps)) => group(&caps, "channel").eq_ignore_ascii_case(channel),
            _ => false,
        }
    }
}

fn group<'t>(caps: &regex::Captures<'t>, name: &str) -> &'t str {
    caps.name(name).map_or("", |value| value.as_str())
}

fn parse_group<T: std::str::FromStr>(caps: &regex::Captures<'_>, name: &str) -> Option<T> {
    caps.name(name)
        .and_then(|value| value.as_str().trim().parse().ok())
}

/// Remove mIRC formatting codes (bold, colour, reverse, italic, underline, reset).
#[must_use]
pub fn strip_formatting(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\u{2}' | '\u{f}' | '\u{11}' | '\u{16}' | '\u{1d}' | '\u{1e}' | '\u{1f}' => {}
            '\u{3}' => {
                skip_digits(&mut chars);
                if chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(char::is_ascii_digit) {
                        chars.next();
                        skip_digits(&mut chars);
                    }
                }
            }
            other => output.push(other),
        }
    }
    output
}

fn skip_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for _ in 0..2 {
        if chars.peek().is_some_and(char::is_ascii_digit) {
            chars.next();
        } else {
            break;
        }
    }
}

/// Strip promotional substrings and control characters from a packet name and
/// collapse repeated spaces.
#[must_use]
pub fn clean_packet_name(raw: &str) -> String {
    let mut name = strip_formatting(raw);
    for noise in NAME_NOISE {
        name = name.replace(noise, "");
    }
    name.split(' ')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
