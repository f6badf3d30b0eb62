//! IRC wire protocol: line parsing and message builders.
//!
//! RFC 1459-style framing: `[:prefix] COMMAND arg arg :trailing\r\n`.
//! Only the messages the bot actually exchanges are covered.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed IRC line: empty")]
    MalformedLine,
}

/// A parsed IRC line: sender prefix (without the leading `:`), command,
/// arguments. The trailing argument, if any, is the last element of `args`
/// and is the only one that may contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub prefix: String,
    pub command: String,
    pub args: Vec<String>,
}

/// Split an IRC line into (prefix, command, args).
///
/// The trailing argument starts at the first ` :` sequence; everything before
/// it is whitespace-separated. An empty line is the only parse failure.
pub fn parse(line: &str) -> Result<Line, WireError> {
    if line.is_empty() {
        return Err(WireError::MalformedLine);
    }

    let mut rest = line;

    let prefix = if let Some(stripped) = rest.strip_prefix(':') {
        match stripped.split_once(' ') {
            Some((prefix, tail)) => {
                rest = tail;
                prefix.to_string()
            }
            None => {
                rest = "";
                stripped.to_string()
            }
        }
    } else {
        String::new()
    };

    let mut args: Vec<String> = match rest.split_once(" :") {
        Some((head, trailing)) => {
            let mut args: Vec<String> = head.split_whitespace().map(str::to_string).collect();
            args.push(trailing.to_string());
            args
        }
        None => rest.split_whitespace().map(str::to_string).collect(),
    };

    let command = if args.is_empty() {
        String::new()
    } else {
        args.remove(0)
    };

    Ok(Line {
        prefix,
        command,
        args,
    })
}

impl Line {
    pub fn new(prefix: &str, command: &str, args: &[&str]) -> Self {
        Self {
            prefix: prefix.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Wire form including the terminating `\r\n`.
    pub fn serialize(&self) -> String {
        format!("{}\r\n", self)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.prefix.is_empty() {
            write!(f, ":{} ", self.prefix)?;
        }
        write!(f, "{}", self.command)?;
        if let Some((trailing, head)) = self.args.split_last() {
            for arg in head {
                write!(f, " {}", arg)?;
            }
            write!(f, " :{}", trailing)?;
        }
        Ok(())
    }
}

// Builders for the lines the bot sends. The session task appends `\r\n`
// when writing, so these return bare lines.

pub fn pass(password: &str) -> String {
    format!("PASS {}", password)
}

pub fn nick(nick: &str) -> String {
    format!("NICK {}", nick)
}

pub fn user(nick: &str) -> String {
    format!("USER {} 0 * :{}", nick, nick)
}

pub fn join(channel: &str) -> String {
    format!("JOIN {}", channel)
}

pub fn pong(token: Option<&str>) -> String {
    match token {
        Some(token) => format!("PONG {}", token),
        None => "PONG".to_string(),
    }
}

pub fn who(nick: &str) -> String {
    format!("WHO {}", nick)
}

pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {} :{}", target, text)
}

pub fn notice(target: &str, text: &str) -> String {
    format!("NOTICE {} :{}", target, text)
}

pub fn topic(channel: &str, text: &str) -> String {
    format!("TOPIC {} :{}", channel, text)
}

/// Extract the bare nick from a `nick!user@host` identity. Returns the whole
/// string when it is already bare.
pub fn nick_of(identity: &str) -> &str {
    match identity.find('!') {
        Some(pos) => &identity[..pos],
        None => identity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_prefix() {
        let line = parse(":alice!u@h PRIVMSG #chan :~help addacl").unwrap();
        assert_eq!(line.prefix, "alice!u@h");
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.args, vec!["#chan", "~help addacl"]);
    }

    #[test]
    fn parses_numeric_without_trailing() {
        let line = parse(":server 352 me #chan user host server nick H :0 real").unwrap();
        assert_eq!(line.command, "352");
        assert_eq!(line.args.len(), 8);
        assert_eq!(line.args[7], "0 real");
    }

    #[test]
    fn parses_ping_without_prefix() {
        let line = parse("PING :irc.example.net").unwrap();
        assert_eq!(line.prefix, "");
        assert_eq!(line.command, "PING");
        assert_eq!(line.args, vec!["irc.example.net"]);
    }

    #[test]
    fn trailing_may_contain_space_colon() {
        // The split happens at the first " :", everything after belongs to
        // the trailing argument.
        let line = parse("PRIVMSG #c :a :b :c").unwrap();
        assert_eq!(line.args, vec!["#c", "a :b :c"]);
    }

    #[test]
    fn empty_line_is_malformed() {
        assert_eq!(parse(""), Err(WireError::MalformedLine));
    }

    #[test]
    fn bare_command_has_no_args() {
        let line = parse("QUIT").unwrap();
        assert_eq!(line.command, "QUIT");
        assert!(line.args.is_empty());
        assert!(line.prefix.is_empty());
    }

    #[test]
    fn serialize_appends_crlf() {
        let line = Line::new("", "PONG", &["token"]);
        assert_eq!(line.serialize(), "PONG :token\r\n");
    }

    #[test]
    fn parse_serialize_roundtrip() {
        let cases = vec![
            Line::new("alice!u@h", "PRIVMSG", &["#chan", "hello there"]),
            Line::new("", "PING", &["token"]),
            Line::new("server", "352", &["me", "#c", "u", "h", "s", "n", "H", "0 real"]),
            Line::new("bob!x@y", "JOIN", &["#chan"]),
            Line::new("", "QUIT", &[]),
            Line::new("", "NOTICE", &["#c", "text with :colon inside"]),
        ];

        for case in cases {
            let wire = case.serialize();
            let parsed = parse(wire.trim_end_matches("\r\n")).unwrap();
            assert_eq!(parsed, case, "roundtrip failed for {:?}", wire);
        }
    }

    #[test]
    fn nick_of_strips_identity_tail() {
        assert_eq!(nick_of("alice!u@h"), "alice");
        assert_eq!(nick_of("alice"), "alice");
    }
}
