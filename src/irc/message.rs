use std::{borrow::Cow, fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use thiserror::Error;
use thisslime::TracingError;

use crate::trivia::Tier;

/// Marks the start and end of a CTCP payload.
pub const CTCP_DELIM: char = '\u{1}';

#[derive(Debug, Error, TracingError, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    #[event(level = DEBUG)]
    Empty,

    #[error("line `{0}` has no command")]
    #[event(level = WARN)]
    NoCommand(String),
}

/// One IRC protocol line, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: None,
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// The nick part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);

        (!nick.is_empty()).then_some(nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The last parameter, which is where the free text lives.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    // ---- outbound ----

    pub fn nick_change(nick: &str) -> Self {
        Self::new("NICK", [nick])
    }

    pub fn user(user: &str, realname: &str) -> Self {
        Self::new("USER", [user, "0", "*", realname])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", [token])
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", [channel])
    }

    pub fn part(channel: &str) -> Self {
        Self::new("PART", [channel])
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    pub fn notice(target: &str, text: &str) -> Self {
        Self::new("NOTICE", [target, text])
    }

    /// `/me` as a CTCP ACTION.
    pub fn action(target: &str, text: &str) -> Self {
        Self::privmsg(target, &format!("{CTCP_DELIM}ACTION {text}{CTCP_DELIM}"))
    }

    pub fn user_mode(nick: &str, modes: &str) -> Self {
        Self::new("MODE", [nick.to_owned(), format!("+{modes}")])
    }

    /// Grants or takes away a channel tier. `Tier::None` has no mode letter,
    /// so there's nothing to send for it.
    pub fn channel_mode(channel: &str, nick: &str, tier: Tier, grant: bool) -> Option<Self> {
        let letter = tier.mode_char()?;
        let sign = if grant { '+' } else { '-' };

        Some(Self::new(
            "MODE",
            [channel.to_owned(), format!("{sign}{letter}"), nick.to_owned()],
        ))
    }

    pub fn kick(channel: &str, nick: &str, reason: &str) -> Self {
        Self::new("KICK", [channel, nick, reason])
    }

    pub fn names(channel: &str) -> Self {
        Self::new("NAMES", [channel])
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", [reason])
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if rest.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        // IRCv3 tags aren't requested, but skip them if a server sends them
        if rest.starts_with('@') {
            rest = rest.split_once(' ').map_or("", |(_, after)| after);
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped.split_once(' ').unwrap_or((stripped, ""));
            rest = after;
            Some(prefix.to_owned())
        } else {
            None
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|word| !word.is_empty());

        let command = words
            .next()
            .ok_or_else(|| ParseError::NoCommand(line.to_owned()))?
            .to_uppercase();

        let mut params: Vec<String> = words.map(str::to_owned).collect();
        params.extend(trailing.map(str::to_owned));

        Ok(Self {
            prefix,
            command,
            params,
        })
    }
}

impl fmt::Display for Message {
    /// Formats the line without the CRLF. Line breaks inside parameters are
    /// dropped so one message can't smuggle in another.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }

        f.write_str(&self.command)?;

        let last = self.params.len().saturating_sub(1);

        for (index, param) in self.params.iter().enumerate() {
            let param = strip_line_breaks(param);

            let needs_colon =
                index == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));

            if needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }

        Ok(())
    }
}

fn strip_line_breaks(text: &str) -> Cow<'_, str> {
    if text.contains(['\r', '\n']) {
        text.replace(['\r', '\n'], "").into()
    } else {
        text.into()
    }
}

fn formatting() -> &'static Regex {
    static FORMATTING: OnceLock<Regex> = OnceLock::new();

    FORMATTING.get_or_init(|| {
        Regex::new(r"\x03(?:\d{1,2}(?:,\d{1,2})?)?|[\x02\x0F\x11\x16\x1D\x1E\x1F]")
            .expect("hard-coded regex should be valid")
    })
}

/// Removes mIRC colour and formatting codes.
pub fn strip_formatting(text: &str) -> Cow<'_, str> {
    formatting().replace_all(text, "")
}

/// Splits a CTCP query like `\x01VERSION\x01` into its command and
/// argument.
pub fn ctcp(text: &str) -> Option<(String, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);

    let (command, argument) = inner.split_once(' ').unwrap_or((inner, ""));

    Some((command.to_uppercase(), argument))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{ctcp, strip_formatting, Message, ParseError};
    use crate::trivia::Tier;

    #[test]
    fn parse_privmsg() {
        let message: Message = ":alice!~a@host.example PRIVMSG #trivia :the beatles\r\n"
            .parse()
            .unwrap();

        assert_eq!(message.nick(), Some("alice"));
        assert_eq!(message.command, "PRIVMSG");
        assert_eq!(message.params, vec!["#trivia", "the beatles"]);
        assert_eq!(message.trailing(), Some("the beatles"));
    }

    #[test]
    fn parse_without_prefix() {
        let message: Message = "PING :irc.example.net".parse().unwrap();

        assert_eq!(message.prefix, None);
        assert_eq!(message.nick(), None);
        assert_eq!(message.command, "PING");
        assert_eq!(message.params, vec!["irc.example.net"]);
    }

    #[test]
    fn parse_names_reply() {
        let message: Message = ":irc.example.net 353 TriviaBot = #trivia :@admin +alice bob"
            .parse()
            .unwrap();

        assert_eq!(message.command, "353");
        assert_eq!(message.param(2), Some("#trivia"));
        assert_eq!(message.trailing(), Some("@admin +alice bob"));
    }

    #[test]
    fn parse_trailing_with_colons() {
        let message: Message = ":bob!b@h PRIVMSG #trivia :time is 12:30 :)".parse().unwrap();
        assert_eq!(message.trailing(), Some("time is 12:30 :)"));
    }

    #[test]
    fn parse_mode_without_trailing() {
        let message: Message = ":op!o@h MODE #trivia +v alice".parse().unwrap();
        assert_eq!(message.params, vec!["#trivia", "+v", "alice"]);
    }

    #[test]
    fn parse_skips_tags() {
        let message: Message = "@time=2024-01-01T00:00:00Z :alice!a@h JOIN #trivia"
            .parse()
            .unwrap();

        assert_eq!(message.nick(), Some("alice"));
        assert_eq!(message.command, "JOIN");
    }

    #[test]
    fn parse_errors() {
        assert_eq!("\r\n".parse::<Message>(), Err(ParseError::Empty));
        assert!(matches!(
            ":lonely.prefix".parse::<Message>(),
            Err(ParseError::NoCommand(_))
        ));
    }

    #[test]
    fn format_outbound() {
        assert_eq!(
            Message::privmsg("#trivia", "Next question:").to_string(),
            "PRIVMSG #trivia :Next question:"
        );
        assert_eq!(Message::join("#trivia").to_string(), "JOIN #trivia");
        assert_eq!(Message::privmsg("#trivia", "").to_string(), "PRIVMSG #trivia :");
        assert_eq!(
            Message::user("TriviaBot", "Trivia Bot").to_string(),
            "USER TriviaBot 0 * :Trivia Bot"
        );
        assert_eq!(
            Message::action("#trivia", "looks at bob oddly.").to_string(),
            "PRIVMSG #trivia :\u{1}ACTION looks at bob oddly.\u{1}"
        );
    }

    #[test]
    fn format_strips_line_breaks() {
        assert_eq!(
            Message::privmsg("#trivia", "one\r\nQUIT :gotcha").to_string(),
            "PRIVMSG #trivia :oneQUIT :gotcha"
        );
    }

    #[test]
    fn channel_modes() {
        assert_eq!(
            Message::channel_mode("#trivia", "alice", Tier::Voice, true)
                .unwrap()
                .to_string(),
            "MODE #trivia +v alice"
        );
        assert_eq!(
            Message::channel_mode("#trivia", "bob", Tier::Halfop, false)
                .unwrap()
                .to_string(),
            "MODE #trivia -h bob"
        );
        assert!(Message::channel_mode("#trivia", "carol", Tier::None, true).is_none());
    }

    #[test]
    fn formatting_codes() {
        assert_eq!(strip_formatting("\x0304,12the\x0f \x02beatles\x02"), "the beatles");
        assert_eq!(strip_formatting("\x03?start"), "?start");
        assert_eq!(strip_formatting("plain"), "plain");
    }

    #[test]
    fn ctcp_queries() {
        assert_eq!(ctcp("\u{1}VERSION\u{1}"), Some(("VERSION".to_owned(), "")));
        assert_eq!(ctcp("\u{1}ping 12345\u{1}"), Some(("PING".to_owned(), "12345")));
        assert_eq!(ctcp("no ctcp here"), None);
    }
}
