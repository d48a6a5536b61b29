//! Convenience constructors for outbound messages (spec.md §4.8/§6).
//!
//! Each function returns a `Message`, not a pre-serialized line, so
//! every outbound message is serialized through
//! `ircbot_wire::serialize` by the Connection Manager, one code path
//! rather than hand-formatted strings living alongside the codec.

use ircbot_wire::Message;

/// RFC 1459/2812 line length limit. Checked with `debug_assert!` only:
/// per spec.md §7 ("Wire-serialization: trusted input"), producing an
/// over-long line is the caller's mistake, not something this crate
/// should panic over in production.
const MAX_LINE_LEN: usize = 512;

fn check_len(msg: &Message) {
    let len = msg.command.len()
        + msg.args.iter().map(|a| a.len() + 1).sum::<usize>()
        + if msg.trailing.is_empty() {
            0
        } else {
            msg.trailing.len() + 2
        };
    debug_assert!(len <= MAX_LINE_LEN, "outbound message exceeds {MAX_LINE_LEN} bytes");
}

pub fn pass(password: &str) -> Message {
    Message::new("PASS").with_trailing(password)
}

pub fn user(bot_name: &str) -> Message {
    Message::new("USER")
        .with_args([bot_name, "8", "*"])
        .with_trailing(bot_name)
}

pub fn nick(new_nick: &str) -> Message {
    let msg = Message::new("NICK").with_args([new_nick]);
    check_len(&msg);
    msg
}

pub fn join(chan: &str) -> Message {
    Message::new("JOIN").with_args([chan])
}

pub fn part(chan: &str) -> Message {
    Message::new("PART").with_args([chan])
}

pub fn quit(reason: Option<&str>) -> Message {
    match reason {
        Some(reason) => Message::new("QUIT").with_trailing(reason),
        None => Message::new("QUIT"),
    }
}

pub fn privmsg(target: &str, text: &str) -> Message {
    let msg = Message::new("PRIVMSG").with_args([target]).with_trailing(text);
    check_len(&msg);
    msg
}

pub fn notice(target: &str, text: &str) -> Message {
    let msg = Message::new("NOTICE").with_args([target]).with_trailing(text);
    check_len(&msg);
    msg
}

pub fn pong(arg: &str) -> Message {
    Message::new("PONG").with_trailing(arg)
}

pub fn mode(chan: &str, modestr: &str, args: &[&str]) -> Message {
    let mut all_args = vec![chan, modestr];
    all_args.extend_from_slice(args);
    Message::new("MODE").with_args(all_args)
}

pub fn kick(chan: &str, nick: &str, reason: Option<&str>) -> Message {
    let msg = Message::new("KICK").with_args([chan, nick]);
    match reason {
        Some(reason) => msg.with_trailing(reason),
        None => msg,
    }
}

pub fn whois(nick: &str) -> Message {
    Message::new("WHOIS").with_args([nick])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ircbot_wire::serialize;

    #[test]
    fn privmsg_serializes_expected_line() {
        assert_eq!(
            serialize(&privmsg("#chan", "hi")),
            "PRIVMSG #chan :hi\r\n"
        );
    }

    #[test]
    fn mode_with_extra_args() {
        let msg = mode("#chan", "+o", &["alice"]);
        assert_eq!(msg.args, vec!["#chan", "+o", "alice"]);
    }

    #[test]
    fn kick_without_reason_has_no_trailing() {
        let msg = kick("#chan", "alice", None);
        assert!(msg.trailing.is_empty());
    }

    #[test]
    fn quit_with_reason() {
        assert_eq!(serialize(&quit(Some("bye"))), "QUIT :bye\r\n");
    }

    #[test]
    fn user_matches_handshake_shape() {
        let msg = user("mybot");
        assert_eq!(msg.args, vec!["mybot", "8", "*"]);
        assert_eq!(msg.trailing, "mybot");
    }
}
