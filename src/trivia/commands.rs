//! Everything players can ask the bot to do.
//!
//! Commands live in one static table. Every invocation goes through
//! [`authorize`] before its handler runs, so privileged commands can't be
//! reached any other way.

use tracing::{debug, info, warn};

use super::{roster::Strike, Action, Actions, GameSession, Target};

pub const PREFIX: char = '?';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Any,
    Admin,
}

type Handler = fn(&mut GameSession, &str, &[String]) -> Actions;

pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub privilege: Privilege,
    handler: Handler,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("privilege", &self.privilege)
            .finish()
    }
}

impl Command {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

macro_rules! command {
    ($name:literal, $privilege:ident, $handler:expr) => {
        command!($name, [], $privilege, $handler)
    };
    ($name:literal, [$($alias:literal),*], $privilege:ident, $handler:expr) => {
        Command {
            name: $name,
            aliases: &[$($alias),*],
            privilege: Privilege::$privilege,
            handler: $handler,
        }
    };
}

pub static COMMANDS: &[Command] = &[
    command!("score", Any, |session, nick, _| session.score(nick)),
    command!("help", Any, help),
    command!("start", Any, |session, _, _| session.start()),
    command!("stop", Any, |session, _, _| session.stop()),
    command!("source", Any, source),
    command!("standings", Any, |session, _, _| session.standings(Target::Channel)),
    command!("question", Any, |session, _, _| session.show_question()),
    command!("clue", Any, |session, _, _| session.give_clue()),
    command!("next", ["vote"], Any, |session, nick, _| session.on_skip_vote(nick)),
    command!("skip", Admin, |session, _, _| session.force_skip()),
    command!("restart", Admin, |session, _, _| session.shutdown(true)),
    command!("die", Admin, |session, _, _| session.shutdown(false)),
    command!("set", Admin, set_score),
    command!("save", Admin, save),
];

/// Finds a command by name or alias. `name` must already be lowercase.
pub fn lookup(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|command| command.matches(name))
}

/// A line that was addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Picks a command out of a channel line: `?start`, or the bot's nick
    /// followed by the command (`TriviaBot: start`). Anything else is chat.
    pub fn parse(line: &str, bot_nick: &str) -> Option<Self> {
        let mut words = if let Some(rest) = line.strip_prefix(PREFIX) {
            rest.trim_start_matches(PREFIX).split_whitespace()
        } else {
            let mut words = line.split_whitespace();
            let first = words.next()?;

            // the client appends `_` when our nick is taken
            let addressed = first
                .trim_end_matches([':', ','])
                .trim_end_matches('_');

            if !addressed.eq_ignore_ascii_case(bot_nick) {
                return None;
            }

            words
        };

        let name = words.next()?.to_lowercase();
        let args = words.map(str::to_owned).collect();

        Some(Self { name, args })
    }
}

pub fn authorize(privilege: Privilege, is_admin: bool) -> bool {
    match privilege {
        Privilege::Any => true,
        Privilege::Admin => is_admin,
    }
}

/// Runs a command for `nick`, or punishes them for trying.
pub fn dispatch(session: &mut GameSession, nick: &str, invocation: &Invocation) -> Actions {
    let name = invocation.name.to_lowercase();

    let Some(command) = lookup(&name) else {
        debug!(%name, nick, "unknown command");
        return vec![Action::Describe(format!("looks at {nick} oddly."))].into();
    };

    if !authorize(command.privilege, session.settings().is_admin(nick)) {
        warn!(command = command.name, nick, "refused privileged command");
        return refuse(session, nick);
    }

    debug!(command = command.name, nick, "running command");
    (command.handler)(session, nick, &invocation.args)
}

fn refuse(session: &mut GameSession, nick: &str) -> Actions {
    let mut out = Actions::new();
    out.say(format!("{nick}: You don't tell me what to do."));

    match session.roster_mut().strike(nick) {
        Strike::Kick => {
            info!(nick, "kicking for too many strikes");
            out.push(Action::Kick {
                nick: nick.to_owned(),
                reason: "You've earned five strikes, be gone!".to_owned(),
            });
        }
        Strike::Demote(tier) => out.push(Action::Mode {
            nick: nick.to_owned(),
            tier,
            grant: false,
        }),
        Strike::Warn => (),
    }

    out
}

fn help(session: &mut GameSession, nick: &str, _: &[String]) -> Actions {
    let mut out = Actions::new();
    let target = Target::nick(nick);

    out.notice(
        target.clone(),
        "Commands: start, stop, score, standings, question, clue, help, next, source",
    );

    if session.settings().is_admin(nick) {
        out.notice(
            target,
            "Admin commands: skip, restart, die, set <user> <score>, save",
        );
    }

    out
}

fn source(session: &mut GameSession, nick: &str, _: &[String]) -> Actions {
    let mut out = Actions::new();

    let settings = session.settings();

    match &settings.source {
        Some(url) => out.notice(Target::nick(nick), format!("My source can be found at: {url}")),
        None => {
            warn!("no source url in config");
            out.notice(Target::nick(nick), "I don't know where my source is.");
        }
    }

    if let Some(url) = &settings.original_source {
        out.notice(
            Target::nick(nick),
            format!("Original source can be found at: {url}"),
        );
    }

    out
}

fn set_score(session: &mut GameSession, nick: &str, args: &[String]) -> Actions {
    let mut out = Actions::new();
    let issuer = Target::nick(nick);

    let [player, score, ..] = args else {
        out.notice(issuer, "Usage: set <user> <score>");
        return out;
    };

    match score.parse::<u64>() {
        Ok(value) => {
            session.set_score(player, value);
            out.notice(issuer, format!("{player} score set to {value}"));
        }
        Err(_) => out.notice(issuer, format!("{score} is not a valid score.")),
    }

    out
}

fn save(session: &mut GameSession, nick: &str, _: &[String]) -> Actions {
    let mut out = Actions::new();
    out.push(session.save());
    out.notice(Target::nick(nick), "Scores have been saved.");
    out
}

#[cfg(test)]
mod tests {
    use paste::paste;
    use pretty_assertions::assert_eq;

    use super::{authorize, dispatch, lookup, Invocation, Privilege, COMMANDS};
    use crate::trivia::{
        question::FixedQuestions, Action, GameSession, Scoreboard, Settings, Target, Tier,
    };

    fn session() -> GameSession {
        GameSession::new(
            Settings {
                channel: "#trivia".to_owned(),
                nick: "TriviaBot".to_owned(),
                admins: vec!["admin".to_owned()],
                source: Some("https://example.org/triviabot".to_owned()),
                original_source: None,
            },
            FixedQuestions::new([("What year did X happen?", "1999")]),
            Scoreboard::new(),
        )
    }

    fn run(session: &mut GameSession, nick: &str, line: &str) -> Vec<Action> {
        let invocation = Invocation::parse(line, "TriviaBot").expect("line should be a command");
        dispatch(session, nick, &invocation).into_iter().collect()
    }

    macro_rules! parse {
        ($($name:ident: $line:literal => $command:expr;)+) => {
            paste! {
                $(
                    #[test]
                    fn [<parse_ $name>]() {
                        let parsed = Invocation::parse($line, "TriviaBot").map(|i| (i.name, i.args));
                        let expected: Option<(&str, Vec<&str>)> = $command;
                        assert_eq!(
                            parsed,
                            expected.map(|(name, args)| {
                                (name.to_owned(), args.into_iter().map(str::to_owned).collect())
                            })
                        );
                    }
                )+
            }
        };
    }

    parse! {
        prefix: "?start" => Some(("start", vec![]));
        prefix_uppercase: "?START" => Some(("start", vec![]));
        doubled_prefix: "??score" => Some(("score", vec![]));
        prefix_args: "?set alice 300" => Some(("set", vec!["alice", "300"]));
        nick: "TriviaBot start" => Some(("start", vec![]));
        nick_colon: "triviabot: help" => Some(("help", vec![]));
        nick_args: "TriviaBot, set bob 5" => Some(("set", vec!["bob", "5"]));
        nick_alone: "TriviaBot" => None;
        bare_prefix: "?" => None;
        chat: "the beatles" => None;
        nick_mid_line: "hey TriviaBot start" => None;
        nick_taken: "TriviaBot_: start" => Some(("start", vec![]));
        longer_word: "triviabots are great" => None;
        nick_prefix_only: "Trivia save" => None;
    }

    #[test]
    fn every_name_resolves_once() {
        for command in COMMANDS {
            for name in std::iter::once(&command.name).chain(command.aliases) {
                assert_eq!(
                    COMMANDS.iter().filter(|other| other.matches(name)).count(),
                    1,
                    "{name} is ambiguous"
                );
            }
        }
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(lookup("vote").map(|command| command.name), Some("next"));
        assert!(lookup("bogus").is_none());
    }

    #[test]
    fn authorization() {
        assert!(authorize(Privilege::Any, false));
        assert!(authorize(Privilege::Any, true));
        assert!(authorize(Privilege::Admin, true));
        assert!(!authorize(Privilege::Admin, false));
    }

    #[test]
    fn four_refusals_dont_kick() {
        let mut session = session();

        for _ in 0..4 {
            let out = run(&mut session, "mallory", "?die");
            assert_eq!(
                out[0],
                Action::Say("mallory: You don't tell me what to do.".to_owned())
            );
            assert!(!out.iter().any(|action| matches!(action, Action::Kick { .. })));
        }

        assert_eq!(session.roster().get("mallory").unwrap().strikes(), 4);
    }

    #[test]
    fn fifth_refusal_kicks() {
        let mut session = session();

        for _ in 0..4 {
            run(&mut session, "mallory", "?skip");
        }

        let out = run(&mut session, "mallory", "?skip");
        assert!(out.contains(&Action::Kick {
            nick: "mallory".to_owned(),
            reason: "You've earned five strikes, be gone!".to_owned(),
        }));
    }

    #[test]
    fn refusal_demotes() {
        let mut session = session();
        session.on_names(["%half", "+voiced"]);

        let out = run(&mut session, "half", "?save");
        assert!(out.contains(&Action::Mode {
            nick: "half".to_owned(),
            tier: Tier::Halfop,
            grant: false,
        }));

        let out = run(&mut session, "voiced", "?save");
        assert!(out.contains(&Action::Mode {
            nick: "voiced".to_owned(),
            tier: Tier::Voice,
            grant: false,
        }));

        // nothing left to take
        let out = run(&mut session, "voiced", "?save");
        assert!(!out.iter().any(|action| matches!(action, Action::Mode { .. })));
        assert_eq!(session.roster().get("voiced").unwrap().tier(), Tier::None);
    }

    #[test]
    fn admins_are_never_struck() {
        let mut session = session();
        session.start();

        let out = run(&mut session, "admin", "TriviaBot SKIP");
        assert_eq!(
            out[0],
            Action::Say("Question has been skipped. The answer was: 1999".to_owned())
        );
        assert!(session.roster().get("admin").is_none());
    }

    #[test]
    fn admin_set_score() {
        let mut session = session();

        let out = run(&mut session, "admin", "?set alice 300");
        assert_eq!(
            out,
            vec![Action::Notice {
                target: Target::nick("admin"),
                text: "alice score set to 300".to_owned(),
            }]
        );
        assert_eq!(session.scores().get("alice"), Some(300));
    }

    #[test]
    fn bad_set_leaves_board_alone() {
        let mut session = session();

        for line in ["?set alice", "?set alice -5", "?set alice lots"] {
            let out = run(&mut session, "admin", line);
            assert!(matches!(
                &out[..],
                [Action::Notice { target, .. }] if *target == Target::nick("admin")
            ));
        }

        assert!(session.scores().is_empty());
    }

    #[test]
    fn help_differs_for_admins() {
        let mut session = session();

        assert_eq!(run(&mut session, "alice", "?help").len(), 1);
        assert_eq!(run(&mut session, "admin", "?help").len(), 2);
    }

    #[test]
    fn source_link() {
        let mut session = session();

        assert_eq!(
            run(&mut session, "alice", "?source"),
            vec![Action::Notice {
                target: Target::nick("alice"),
                text: "My source can be found at: https://example.org/triviabot".to_owned(),
            }]
        );
    }

    #[test]
    fn source_credits_the_original() {
        let mut session = GameSession::new(
            Settings {
                original_source: Some("https://example.org/upstream".to_owned()),
                ..session().settings().clone()
            },
            FixedQuestions::new([("What year did X happen?", "1999")]),
            Scoreboard::new(),
        );

        let out = run(&mut session, "alice", "?source");
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[1],
            Action::Notice {
                target: Target::nick("alice"),
                text: "Original source can be found at: https://example.org/upstream".to_owned(),
            }
        );
    }

    #[test]
    fn vote_alias() {
        let mut session = session();
        session.start();

        let out = run(&mut session, "bob", "?vote");
        assert_eq!(
            out,
            vec![Action::Say(
                "bob, you have voted. 2 more votes needed to skip.".to_owned()
            )]
        );
    }

    #[test]
    fn save_queues_snapshot() {
        let mut session = session();
        let out = run(&mut session, "admin", "?save");

        assert!(matches!(out[0], Action::Save(_)));
        assert_eq!(
            out[1],
            Action::Notice {
                target: Target::nick("admin"),
                text: "Scores have been saved.".to_owned(),
            }
        );
    }

    #[test]
    fn restart_and_die_quit() {
        let mut session = session();
        assert!(run(&mut session, "admin", "?restart").contains(&Action::Quit { restart: true }));
        assert!(run(&mut session, "admin", "?die").contains(&Action::Quit { restart: false }));
    }

    #[test]
    fn unknown_command() {
        let mut session = session();

        assert_eq!(
            run(&mut session, "alice", "?dance"),
            vec![Action::Describe("looks at alice oddly.".to_owned())]
        );
        assert!(session.roster().get("alice").is_none());
    }
}
