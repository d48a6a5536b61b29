//! IRC wire protocol message parsing and generation.
//!
//! Unlike a general-purpose IRC library this crate keeps a single,
//! untyped message shape (`Message`) with a `command` string, an
//! ordered `args` list, and a `trailing` parameter, rather than a big
//! enum of every known command. Callers match on `command` themselves;
//! this is what lets the match engine in the `ircbot` crate compile
//! patterns per-command without this crate knowing about any of them.

use std::fmt;

/// Sender of a message, parsed from the optional leading `:prefix` of a
/// line. A bare server prefix only sets `nick`; `name` and `rdns` are
/// left empty, which is how callers distinguish a server-origin message
/// from a user-origin one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Prefix {
    pub nick: String,
    pub name: String,
    pub rdns: String,
}

impl Prefix {
    /// True if this prefix carries no user/host part, i.e. it came from
    /// a bare `:server.name` or `:nick` prefix rather than a full
    /// `nick!user@host` one.
    pub fn is_bare(&self) -> bool {
        self.name.is_empty() && self.rdns.is_empty()
    }
}

/// A parsed (or to-be-serialized) IRC message.
///
/// `command` is either an upper-case verb (`PRIVMSG`) or a three-digit
/// numeric reply code kept as a string (`"353"`), matching RFC 1459's
/// treatment of numerics as just another command token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub args: Vec<String>,
    pub trailing: String,
    pub user: Option<Prefix>,
}

impl Message {
    pub fn new(command: impl Into<String>) -> Self {
        Message {
            command: command.into(),
            args: Vec::new(),
            trailing: String::new(),
            user: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_trailing(mut self, trailing: impl Into<String>) -> Self {
        self.trailing = trailing.into();
        self
    }

    /// Nick this message originated from, if it has a user prefix.
    /// Empty string for a bare server prefix or no prefix at all.
    pub fn source_nick(&self) -> &str {
        self.user.as_ref().map(|p| p.nick.as_str()).unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    EmptyLine,
    #[error("missing command")]
    MissingCommand,
    #[error("malformed prefix: {raw:?}")]
    MalformedPrefix { raw: String },
}

/// Parse one line (without the trailing CRLF; any CR is stripped if
/// present) into a `Message`.
///
/// Grammar (spec.md §4.1): `[":" prefix SP] command SP params CRLF`.
pub fn parse(line: &str) -> Result<Message, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']).trim_start();
    if line.is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let (prefix, rest) = if let Some(stripped) = line.strip_prefix(':') {
        match stripped.find(' ') {
            Some(idx) => (Some(parse_prefix(&stripped[..idx])?), &stripped[idx + 1..]),
            None => {
                return Err(ParseError::MalformedPrefix {
                    raw: stripped.to_owned(),
                })
            }
        }
    } else {
        (None, line)
    };

    let (head, trailing) = match rest.find(" :") {
        Some(idx) => (&rest[..idx], rest[idx + 2..].to_owned()),
        None => (rest, String::new()),
    };

    let mut tokens = head.split_whitespace();
    let command = tokens.next().ok_or(ParseError::MissingCommand)?.to_owned();
    let args: Vec<String> = tokens.map(str::to_owned).collect();

    Ok(Message {
        command,
        args,
        trailing,
        user: prefix,
    })
}

fn parse_prefix(raw: &str) -> Result<Prefix, ParseError> {
    match raw.find('!') {
        Some(bang_idx) => {
            let nick = &raw[..bang_idx];
            let name_host = &raw[bang_idx + 1..];
            match name_host.find('@') {
                Some(at_idx) => Ok(Prefix {
                    nick: nick.to_owned(),
                    name: name_host[..at_idx].to_owned(),
                    rdns: name_host[at_idx + 1..].to_owned(),
                }),
                None => Err(ParseError::MalformedPrefix {
                    raw: raw.to_owned(),
                }),
            }
        }
        None => Ok(Prefix {
            nick: raw.to_owned(),
            name: String::new(),
            rdns: String::new(),
        }),
    }
}

/// Drain and parse the first complete CRLF-terminated line from `buf`,
/// if any. Leaves `buf` unchanged when no full line is present yet, and
/// drops the consumed bytes (including the CRLF) on return, so this can
/// be called in a loop as more bytes arrive off the socket.
pub fn decode_stream(buf: &mut Vec<u8>) -> Option<Result<Message, ParseError>> {
    let crlf_idx = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8_lossy(&buf[..crlf_idx]).into_owned();
    let result = parse(&line);
    buf.drain(0..crlf_idx + 2);
    Some(result)
}

/// Serialize a message back to wire format, CRLF-terminated.
///
/// Arguments containing a space or CRLF are the caller's responsibility
/// (spec.md §7, "Wire-serialization: trusted input"); this function does
/// not validate or escape them.
pub fn serialize(msg: &Message) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(32);
    out.push_str(&msg.command);
    for arg in &msg.args {
        out.push(' ');
        out.push_str(arg);
    }
    if !msg.trailing.is_empty() {
        out.push_str(" :");
        out.push_str(&msg.trailing);
    } else if !msg.args.is_empty() {
        // Observed contract: empty trailing with non-empty args still
        // ends with a trailing space before CRLF.
        out.push(' ');
    }
    let _ = write!(out, "\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_privmsg_with_full_prefix() {
        let msg = parse(":nick!user@host PRIVMSG #chan :hello world\r\n").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#chan".to_string()]);
        assert_eq!(msg.trailing, "hello world");
        let pfx = msg.user.unwrap();
        assert_eq!(pfx.nick, "nick");
        assert_eq!(pfx.name, "user");
        assert_eq!(pfx.rdns, "host");
    }

    #[test]
    fn parse_ping_no_prefix() {
        let msg = parse("PING :server.example\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.args.is_empty());
        assert_eq!(msg.trailing, "server.example");
        assert!(msg.user.is_none());
    }

    #[test]
    fn parse_names_reply() {
        let msg = parse(":irc.example 353 bot = #chan :@alice +bob carol\r\n").unwrap();
        assert_eq!(msg.command, "353");
        assert_eq!(
            msg.args,
            vec!["bot".to_string(), "=".to_string(), "#chan".to_string()]
        );
        assert_eq!(msg.trailing, "@alice +bob carol");
        let pfx = msg.user.unwrap();
        assert_eq!(pfx.nick, "irc.example");
        assert!(pfx.is_bare());
    }

    #[test]
    fn parse_bare_server_prefix_sets_only_nick() {
        let msg = parse(":irc.example NOTICE * :*** Looking up hostname\r\n").unwrap();
        let pfx = msg.user.unwrap();
        assert_eq!(pfx.nick, "irc.example");
        assert_eq!(pfx.name, "");
        assert_eq!(pfx.rdns, "");
    }

    #[test]
    fn parse_empty_line_is_error() {
        assert!(matches!(parse("\r\n"), Err(ParseError::EmptyLine)));
    }

    #[test]
    fn parse_malformed_prefix_is_error() {
        assert!(matches!(
            parse(":\r\n"),
            Err(ParseError::MalformedPrefix { .. })
        ));
    }

    #[test]
    fn serialize_privmsg() {
        let msg = Message::new("PRIVMSG")
            .with_args(["#chan"])
            .with_trailing("hello world");
        assert_eq!(serialize(&msg), "PRIVMSG #chan :hello world\r\n");
    }

    #[test]
    fn serialize_empty_trailing_with_args_keeps_trailing_space() {
        let msg = Message::new("JOIN").with_args(["#chan"]);
        assert_eq!(serialize(&msg), "JOIN #chan \r\n");
    }

    #[test]
    fn serialize_no_args_no_trailing() {
        let msg = Message::new("QUIT");
        assert_eq!(serialize(&msg), "QUIT\r\n");
    }

    #[test]
    fn decode_stream_drains_one_line_at_a_time() {
        let mut buf = b"PING :a\r\nPING :b\r\n".to_vec();
        let first = decode_stream(&mut buf).unwrap().unwrap();
        assert_eq!(first.trailing, "a");
        let second = decode_stream(&mut buf).unwrap().unwrap();
        assert_eq!(second.trailing, "b");
        assert!(decode_stream(&mut buf).is_none());
    }

    #[test]
    fn decode_stream_waits_for_full_line() {
        let mut buf = b"PING :a".to_vec();
        assert!(decode_stream(&mut buf).is_none());
        assert_eq!(buf, b"PING :a");
    }

    proptest::proptest! {
        #[test]
        fn round_trip_privmsg(chan in "#[a-z]{1,8}", trailing in "[a-zA-Z0-9 ]{0,40}") {
            let msg = Message::new("PRIVMSG").with_args([chan]).with_trailing(trailing);
            let line = serialize(&msg);
            let reparsed = parse(&line).unwrap();
            proptest::prop_assert_eq!(reparsed, msg);
        }
    }
}
