//! Parses a raw IRC line into its grammar fields and classifies embedded
//! CTCP tokens (`VERSION`, `DCC SEND`) carried in the trailing parameter.
//!
//! Grammar (RFC 1459 subset): `[":" prefix SP] command [SP params] [SP ":" trailing]`.
//! Unparseable lines are dropped by the caller; this module returns `None`
//! rather than panicking on malformed input.

use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub nick: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl Message {
    /// Parse a single line (already stripped of CRLF).
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line;

        let (prefix, nick, user, host) = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix_str, remainder) = stripped.split_once(' ')?;
            rest = remainder;
            let (nick, user, host) = split_prefix(prefix_str);
            (Some(prefix_str.to_string()), nick, user, host)
        } else {
            (None, None, None, None)
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((h, t)) => (h, Some(t.to_string())),
            None => (rest, None),
        };

        let mut parts = head.split_whitespace();
        let command = parts.next()?.to_string();
        let params: Vec<String> = parts.map(|p| p.to_string()).collect();

        Some(Message {
            prefix,
            nick,
            user,
            host,
            command,
            params,
            trailing,
        })
    }

    /// Re-serialize to wire format (used by the round-trip test law).
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);
        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }
        if let Some(trailing) = &self.trailing {
            out.push_str(" :");
            out.push_str(trailing);
        }
        out
    }

    /// True if `trailing` is the bare `\x01VERSION\x01` CTCP.
    pub fn is_ctcp_version(&self) -> bool {
        self.trailing.as_deref() == Some("\x01VERSION\x01")
    }
}

fn split_prefix(prefix: &str) -> (Option<String>, Option<String>, Option<String>) {
    match prefix.split_once('!') {
        Some((nick, rest)) => match rest.split_once('@') {
            Some((user, host)) => (
                Some(nick.to_string()),
                Some(user.to_string()),
                Some(host.to_string()),
            ),
            None => (Some(nick.to_string()), Some(rest.to_string()), None),
        },
        None => (Some(prefix.to_string()), None, None),
    }
}

/// A decoded `DCC SEND` CTCP offer: `(sender, filename, ip, port, filesize)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccSendOffer {
    pub sender: String,
    pub filename: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub filesize: u64,
}

/// Recognise and decode `\x01DCC SEND "name" ip port size\x01` from a
/// PRIVMSG trailing parameter. Quotes around the filename are optional; a
/// stray colon before the IP integer is tolerated.
pub fn decode_dcc_send(sender: &str, trailing: &str) -> Option<DccSendOffer> {
    let body = trailing.trim_matches('\x01').trim();
    let rest = body.strip_prefix("DCC SEND")?.trim();

    let (filename, rest) = if let Some(after_quote) = rest.strip_prefix('"') {
        let end = after_quote.find('"')?;
        (after_quote[..end].to_string(), after_quote[end + 1..].trim())
    } else {
        let (name, rest) = rest.split_once(' ')?;
        (name.to_string(), rest)
    };

    let rest = rest.trim_start_matches(':').trim();
    let mut fields = rest.split_whitespace();
    let ip_raw: u32 = fields.next()?.parse().ok()?;
    let port: u16 = fields.next()?.parse().ok()?;
    let filesize: u64 = fields.next()?.parse().ok()?;

    Some(DccSendOffer {
        sender: sender.to_string(),
        filename,
        ip: Ipv4Addr::from(ip_raw),
        port,
        filesize,
    })
}

/// Recognise a `PRIVMSG <target> :\x01DCC SEND ...\x01` line addressed at us.
pub fn dcc_offer_from_message(msg: &Message, our_nick: &str) -> Option<DccSendOffer> {
    if msg.command != "PRIVMSG" {
        return None;
    }
    let target = msg.params.first()?;
    if target != our_nick {
        return None;
    }
    let trailing = msg.trailing.as_deref()?;
    if !trailing.contains("DCC SEND") {
        return None;
    }
    let sender = msg.nick.as_deref()?;
    decode_dcc_send(sender, trailing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping() {
        let msg = Message::parse("PING :server.example.net").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing.as_deref(), Some("server.example.net"));
    }

    #[test]
    fn parses_prefixed_privmsg() {
        let msg = Message::parse("Ginpachi-Sensei!user@host PRIVMSG me :hello world").unwrap();
        assert_eq!(msg.nick.as_deref(), Some("Ginpachi-Sensei"));
        assert_eq!(msg.user.as_deref(), Some("user"));
        assert_eq!(msg.host.as_deref(), Some("host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["me".to_string()]);
        assert_eq!(msg.trailing.as_deref(), Some("hello world"));
    }

    #[test]
    fn rejects_line_with_missing_command() {
        assert!(Message::parse(":onlyprefix").is_none());
    }

    #[test]
    fn round_trips_through_format() {
        let original = "bot!u@h PRIVMSG nick arg2 :trailing text";
        let parsed = Message::parse(original).unwrap();
        let reparsed = Message::parse(&parsed.format()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn decodes_dcc_send_ipv4() {
        let offer = decode_dcc_send("bot", "\x01DCC SEND \"file.mkv\" 2130706433 5000 123456\x01").unwrap();
        assert_eq!(offer.filename, "file.mkv");
        assert_eq!(offer.ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(offer.port, 5000);
        assert_eq!(offer.filesize, 123456);
    }

    #[test]
    fn decodes_dcc_send_without_quotes() {
        let offer = decode_dcc_send("bot", "DCC SEND file.mkv 2130706433 5000 123456").unwrap();
        assert_eq!(offer.filename, "file.mkv");
    }

    #[test]
    fn decodes_dcc_send_with_stray_colon() {
        let offer = decode_dcc_send("bot", "DCC SEND \"a b.mkv\" :2130706433 5000 42").unwrap();
        assert_eq!(offer.filename, "a b.mkv");
        assert_eq!(offer.filesize, 42);
    }

    #[test]
    fn dcc_offer_requires_target_match() {
        let msg = Message::parse("bot!u@h PRIVMSG other :\x01DCC SEND \"f\" 1 2 3\x01").unwrap();
        assert!(dcc_offer_from_message(&msg, "me").is_none());
        let msg = Message::parse("bot!u@h PRIVMSG me :\x01DCC SEND \"f\" 1 2 3\x01").unwrap();
        assert!(dcc_offer_from_message(&msg, "me").is_some());
    }

    #[test]
    fn malformed_dcc_send_is_dropped() {
        assert!(decode_dcc_send("bot", "\x01DCC SEND garbage\x01").is_none());
    }
}
