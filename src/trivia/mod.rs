//! The trivia game itself: everything that decides what the bot says and
//! does, without any knowledge of the connection it says it over.

pub mod clue;
pub use clue::ClueMask;

pub mod commands;

pub mod question;
pub use question::QuestionsDir;

pub mod roster;
pub use roster::Tier;

pub mod scoreboard;
pub use scoreboard::{ScoreWriter, Scoreboard};

pub mod session;
pub use session::{GameSession, Settings};

/// Where a notice goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Channel,
    Nick(String),
}

impl Target {
    pub fn nick(nick: impl Into<String>) -> Self {
        Self::Nick(nick.into())
    }
}

/// What the game wants done with the round timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// Next tick one full interval from now.
    Reschedule,
    Cancel,
}

/// Something the game needs the outside world to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Message to the game channel.
    Say(String),
    Notice {
        target: Target,
        text: String,
    },
    /// `/me` in the game channel.
    Describe(String),
    Mode {
        nick: String,
        tier: Tier,
        grant: bool,
    },
    Kick {
        nick: String,
        reason: String,
    },
    /// Ask the server who's in the channel again.
    RefreshNames,
    Timer(TimerRequest),
    Save(Scoreboard),
    Quit {
        restart: bool,
    },
}

/// The actions produced by handling one event, in the order they should be
/// carried out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Actions(Vec<Action>);

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.0.push(action);
    }

    pub fn say(&mut self, text: impl Into<String>) {
        self.push(Action::Say(text.into()));
    }

    pub fn notice(&mut self, target: Target, text: impl Into<String>) {
        self.push(Action::Notice {
            target,
            text: text.into(),
        });
    }

    pub fn timer(&mut self, request: TimerRequest) {
        self.push(Action::Timer(request));
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.0.iter()
    }

    /// Everything said in the channel, in order.
    #[cfg(test)]
    pub fn said(&self) -> Vec<&str> {
        self.iter()
            .filter_map(|action| match action {
                Action::Say(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every notice sent to `target`, in order.
    #[cfg(test)]
    pub fn noticed(&self, target: &Target) -> Vec<&str> {
        self.iter()
            .filter_map(|action| match action {
                Action::Notice { target: to, text } if to == target => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn contains(&self, action: &Action) -> bool {
        self.0.contains(action)
    }

    #[cfg(test)]
    pub fn last_timer_request(&self) -> Option<TimerRequest> {
        self.iter().rev().find_map(|action| match action {
            Action::Timer(request) => Some(*request),
            _ => None,
        })
    }
}

impl IntoIterator for Actions {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Vec<Action>> for Actions {
    fn from(value: Vec<Action>) -> Self {
        Self(value)
    }
}
