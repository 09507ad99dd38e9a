//! IRC line framing and the outgoing lines the client sends.
//!
//! # Design
//! - Only the subset of RFC 1459 framing the client consumes: prefix, command,
//!   middle parameters and the trailing parameter.
//! - CTCP payloads stay inside the text; the classifier unwraps them.

use std::fmt;

/// CTCP delimiter.
pub const CTCP_DELIMITER: char = '\u{1}';

/// One framed IRC protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Frame a raw line. Returns `None` for blank lines.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, remainder) = stripped.split_once(' ')?;
            rest = remainder;
            Some(prefix.to_string())
        } else {
            None
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|word| !word.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nickname part of the prefix (`nick!user@host`).
    #[must_use]
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|prefix| prefix.split('!').next().unwrap_or(prefix))
    }

    /// Last parameter, which carries the message text.
    #[must_use]
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// Kind of chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Privmsg,
    Notice,
}

/// A chat message with its sender and target resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub kind: ChatKind,
    pub sender: String,
    pub target: String,
    pub text: String,
}

impl ChatLine {
    /// Build a chat line by hand.
    #[must_use]
    pub fn new(
        kind: ChatKind,
        sender: impl Into<String>,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            sender: sender.into(),
            target: target.into(),
            text: text.into(),
        }
    }

    /// Extract a chat line from a framed `PRIVMSG` or `NOTICE`.
    #[must_use]
    pub fn from_message(message: &IrcMessage) -> Option<Self> {
        let kind = match message.command.as_str() {
            "PRIVMSG" => ChatKind::Privmsg,
            "NOTICE" => ChatKind::Notice,
            _ => return None,
        };
        let sender = message.nick()?;
        let [target, text] = message.params.as_slice() else {
            return None;
        };
        Some(Self::new(kind, sender, target.clone(), text.clone()))
    }

    /// Channel the line was sent to, or `None` for a private message.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        crate::model::is_channel_name(&self.target).then_some(self.target.as_str())
    }

    /// CTCP payload without its delimiters, if the text is a CTCP message.
    #[must_use]
    pub fn ctcp(&self) -> Option<&str> {
        let inner = self.text.strip_prefix(CTCP_DELIMITER)?;
        Some(inner.strip_suffix(CTCP_DELIMITER).unwrap_or(inner))
    }
}

/// A protocol line queued for the server, without the trailing CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLine(String);

impl OutboundLine {
    /// Wrap an already formatted line.
    #[must_use]
    pub fn raw(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    /// Reply to a CTCP `VERSION` query.
    #[must_use]
    pub fn version_reply(user: &str, version: &str) -> Self {
        Self(format!("NOTICE {user} :\u{1}VERSION {version}\u{1}"))
    }

    /// Reply to the client-specific `XGVERSION` query.
    #[must_use]
    pub fn custom_version_reply(user: &str, version: &str) -> Self {
        Self(format!("NOTICE {user} :\u{1}XGVERSION {version}\u{1}"))
    }

    /// Ask a bot to continue an offer from `offset`.
    #[must_use]
    pub fn dcc_resume(bot: &str, file: &str, port: u16, offset: u64) -> Self {
        Self(format!(
            "PRIVMSG {bot} :\u{1}DCC RESUME {file} {port} {offset}\u{1}"
        ))
    }

    /// Decline an offer.
    #[must_use]
    pub fn dcc_reject(bot: &str, file: &str) -> Self {
        Self(format!("NOTICE {bot} :\u{1}DCC REJECT SEND {file}\u{1}"))
    }

    /// Request a packet.
    #[must_use]
    pub fn xdcc_send(bot: &str, packet: u32) -> Self {
        Self(format!("PRIVMSG {bot} :XDCC SEND #{packet}"))
    }

    /// Leave a bot's queue.
    #[must_use]
    pub fn xdcc_remove(bot: &str) -> Self {
        Self(format!("PRIVMSG {bot} :XDCC REMOVE"))
    }

    /// Search a bot's packet list.
    #[must_use]
    pub fn xdcc_search(bot: &str, term: &str) -> Self {
        Self(format!("PRIVMSG {bot} :XDCC SEARCH {term}"))
    }

    /// Join a channel.
    #[must_use]
    pub fn join(channel: &str) -> Self {
        Self(format!("JOIN {channel}"))
    }

    /// Leave a channel.
    #[must_use]
    pub fn part(channel: &str) -> Self {
        Self(format!("PART {channel}"))
    }

    /// Answer a server keep-alive.
    #[must_use]
    pub fn pong(token: &str) -> Self {
        Self(format!("PONG :{token}"))
    }

    /// Registration: nickname.
    #[must_use]
    pub fn nick(nick: &str) -> Self {
        Self(format!("NICK {nick}"))
    }

    /// Registration: user name and real name.
    #[must_use]
    pub fn user(user: &str, realname: &str) -> Self {
        Self(format!("USER {user} 0 * :{realname}"))
    }

    /// Leave the server.
    #[must_use]
    pub fn quit(reason: &str) -> Self {
        Self(format!("QUIT :{reason}"))
    }

    /// Line text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the line text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OutboundLine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}
