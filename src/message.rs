//! Wire-format parsing for client lines.
//!
//! `[@tags] [:prefix] VERB [params...] [:trailing]`, CRLF elided by the
//! framing layer. Tags follow the IRCv3 message-tags escaping rules.

use std::fmt;

/// A parsed protocol line with owned storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message tags in order of appearance; `None` value means a flag tag.
    pub tags: Vec<(String, Option<String>)>,
    pub prefix: Option<String>,
    /// Upper-cased verb.
    pub verb: String,
    pub params: Vec<String>,
}

/// Parse failure reasons. Empty input is distinct so the dispatcher can
/// ignore blank lines without a protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    /// Tag section present but malformed.
    BadTags,
    /// Prefix marker with nothing after it.
    BadPrefix,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty message"),
            ParseError::BadTags => write!(f, "malformed message tags"),
            ParseError::BadPrefix => write!(f, "malformed message prefix"),
        }
    }
}

fn unescape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            // A lone or unknown escape drops the backslash.
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

impl Message {
    /// Parse one line. The input must not contain CR or LF.
    pub fn parse(line: &str) -> Result<Message, ParseError> {
        let mut rest = line.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut msg = Message::default();

        if let Some(after) = rest.strip_prefix('@') {
            let (tagpart, tail) = after.split_once(' ').ok_or(ParseError::BadTags)?;
            if tagpart.is_empty() {
                return Err(ParseError::BadTags);
            }
            for tag in tagpart.split(';') {
                if tag.is_empty() {
                    continue;
                }
                match tag.split_once('=') {
                    Some((k, v)) => msg.tags.push((k.to_string(), Some(unescape_tag_value(v)))),
                    None => msg.tags.push((tag.to_string(), None)),
                }
            }
            rest = tail.trim_start_matches(' ');
        }

        if let Some(after) = rest.strip_prefix(':') {
            let (prefix, tail) = after.split_once(' ').ok_or(ParseError::BadPrefix)?;
            if prefix.is_empty() {
                return Err(ParseError::BadPrefix);
            }
            msg.prefix = Some(prefix.to_string());
            rest = tail.trim_start_matches(' ');
        }

        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        loop {
            if let Some(trailing) = rest.strip_prefix(':') {
                msg.params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((word, tail)) => {
                    if !word.is_empty() {
                        msg.params.push(word.to_string());
                    }
                    rest = tail.trim_start_matches(' ');
                    if rest.is_empty() {
                        break;
                    }
                }
                None => {
                    msg.params.push(rest.to_string());
                    break;
                }
            }
        }

        if msg.params.is_empty() {
            return Err(ParseError::Empty);
        }
        msg.verb = msg.params.remove(0).to_ascii_uppercase();
        Ok(msg)
    }

    /// First parameter, if any.
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.params.get(n).map(String::as_str)
    }

    /// Look up a client tag by name.
    pub fn tag(&self, name: &str) -> Option<&(String, Option<String>)> {
        self.tags.iter().find(|(k, _)| k == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_command() {
        let m = Message::parse("PING token").unwrap();
        assert_eq!(m.verb, "PING");
        assert_eq!(m.params, vec!["token"]);
        assert!(m.prefix.is_none());
    }

    #[test]
    fn parses_trailing_and_case_folds_verb() {
        let m = Message::parse("away :gone for lunch").unwrap();
        assert_eq!(m.verb, "AWAY");
        assert_eq!(m.params, vec!["gone for lunch"]);
    }

    #[test]
    fn parses_prefix_and_tags() {
        let m = Message::parse("@time=2023-01-01T00:00:00Z;+draft/x=a\\sb :nick!u@h PRIVMSG #chan :hello").unwrap();
        assert_eq!(m.prefix.as_deref(), Some("nick!u@h"));
        assert_eq!(m.verb, "PRIVMSG");
        assert_eq!(m.params, vec!["#chan", "hello"]);
        assert_eq!(m.tag("+draft/x").unwrap().1.as_deref(), Some("a b"));
    }

    #[test]
    fn empty_trailing_is_kept() {
        let m = Message::parse("TOPIC #chan :").unwrap();
        assert_eq!(m.params, vec!["#chan", ""]);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("   "), Err(ParseError::Empty));
        assert_eq!(Message::parse("@tags"), Err(ParseError::BadTags));
        assert_eq!(Message::parse(": PING"), Err(ParseError::BadPrefix));
    }

    #[test]
    fn collapses_repeated_spaces() {
        let m = Message::parse("MODE   #chan  +b   mask").unwrap();
        assert_eq!(m.params, vec!["#chan", "+b", "mask"]);
    }
}
