// Line-oriented control commands accepted by the event hub over a subscriber stream.
use crate::{Error, Result};
use std::fmt;

/// Control command sent to the hub as one CRLF-terminated text line.
///
/// ```
/// use eventhub_wire::Command;
///
/// let command = Command::Subscribe("orders".to_string());
/// assert_eq!(command.encode(), "SUBSCRIBE orders\r\n");
/// assert_eq!(Command::parse("SUBSCRIBE orders\r\n").expect("parse"), command);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Publish(String),
    List,
}

impl Command {
    pub const TERMINATOR: &'static str = "\r\n";

    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Subscribe(_) => "SUBSCRIBE",
            Command::Unsubscribe(_) => "UNSUBSCRIBE",
            Command::Publish(_) => "PUBLISH",
            Command::List => "LIST",
        }
    }

    pub fn encode(&self) -> String {
        format!("{self}{}", Self::TERMINATOR)
    }

    /// Parse one command line; a trailing CRLF or LF is optional.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line
            .strip_suffix(Self::TERMINATOR)
            .or_else(|| line.strip_suffix('\n'))
            .unwrap_or(line);
        let (keyword, argument) = match line.split_once(' ') {
            Some((keyword, argument)) => (keyword, Some(argument)),
            None => (line, None),
        };
        match (keyword, argument) {
            ("LIST", None) => Ok(Command::List),
            ("LIST", Some(_)) => Err(Error::InvalidCommand("LIST takes no argument".into())),
            ("SUBSCRIBE", Some(name)) if !name.is_empty() => Ok(Command::Subscribe(name.into())),
            ("UNSUBSCRIBE", Some(name)) if !name.is_empty() => {
                Ok(Command::Unsubscribe(name.into()))
            }
            ("PUBLISH", Some(text)) if !text.is_empty() => Ok(Command::Publish(text.into())),
            ("SUBSCRIBE" | "UNSUBSCRIBE" | "PUBLISH", _) => Err(Error::InvalidCommand(format!(
                "{keyword} requires an argument"
            ))),
            _ => Err(Error::InvalidCommand(format!("unknown command {keyword:?}"))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Subscribe(arg) | Command::Unsubscribe(arg) | Command::Publish(arg) => {
                write!(f, "{} {arg}", self.keyword())
            }
            Command::List => f.write_str(self.keyword()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_observed_command_lines() {
        assert_eq!(
            Command::Subscribe("test2".into()).encode(),
            "SUBSCRIBE test2\r\n"
        );
        assert_eq!(
            Command::Unsubscribe("test2".into()).encode(),
            "UNSUBSCRIBE test2\r\n"
        );
        assert_eq!(
            Command::Publish("Here comes a very very big message yo!".into()).encode(),
            "PUBLISH Here comes a very very big message yo!\r\n"
        );
        assert_eq!(Command::List.encode(), "LIST\r\n");
    }

    #[test]
    fn publish_keeps_spaces_in_text() {
        let command = Command::parse("PUBLISH a b  c\r\n").expect("parse");
        assert_eq!(command, Command::Publish("a b  c".into()));
    }

    #[test]
    fn accepts_bare_lf_and_no_terminator() {
        assert_eq!(Command::parse("LIST\n").expect("lf"), Command::List);
        assert_eq!(Command::parse("LIST").expect("bare"), Command::List);
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            "list\r\n",
            "SUBSCRIBE\r\n",
            "SUBSCRIBE \r\n",
            "PUBLISH\r\n",
            "LIST extra\r\n",
            "PING\r\n",
        ] {
            let err = Command::parse(line).expect_err(line);
            assert!(matches!(err, Error::InvalidCommand(_)), "{line:?}");
        }
    }
}
