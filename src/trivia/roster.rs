use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use tracing::{debug, trace};

/// Refused privileged commands before a player gets kicked.
pub const MAX_STRIKES: u32 = 5;

/// Channel standing, lowest first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    #[default]
    None,
    Voice,
    Halfop,
    Op,
}

impl Tier {
    /// The tier a NAMES prefix stands for. Owners and channel admins count as
    /// ops.
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '~' | '&' | '@' => Some(Self::Op),
            '%' => Some(Self::Halfop),
            '+' => Some(Self::Voice),
            _ => None,
        }
    }

    /// Splits a NAMES entry like `@alice` into the nick and its tier.
    pub fn split_prefixed(entry: &str) -> (&str, Self) {
        let mut tier = Self::None;
        let mut nick = entry;

        while let Some(ch) = nick.chars().next() {
            let Some(found) = Self::from_prefix(ch) else {
                break;
            };

            tier = tier.max(found);
            nick = &nick[ch.len_utf8()..];
        }

        (nick, tier)
    }

    pub const fn mode_char(self) -> Option<char> {
        match self {
            Self::None => None,
            Self::Voice => Some('v'),
            Self::Halfop => Some('h'),
            Self::Op => Some('o'),
        }
    }

    /// Never lowers a tier.
    #[must_use]
    pub fn promote(self, to: Self) -> Self {
        self.max(to)
    }

    /// One refusal's worth of punishment. Halfops and voices lose their
    /// standing; ops and unprivileged players are left alone.
    #[must_use]
    pub const fn demote(self) -> Self {
        match self {
            Self::Halfop | Self::Voice => Self::None,
            other => other,
        }
    }

    /// Reward earned by reaching a number of wins.
    pub const fn reward_for(wins: u32) -> Option<Self> {
        match wins {
            2 => Some(Self::Voice),
            4 => Some(Self::Halfop),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Voice => "voice",
            Self::Halfop => "halfop",
            Self::Op => "op",
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Player {
    tier: Tier,
    wins: u32,
    strikes: u32,
}

impl Player {
    pub fn with_tier(tier: Tier) -> Self {
        Self {
            tier,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub const fn tier(&self) -> Tier {
        self.tier
    }

    #[cfg(test)]
    pub const fn wins(&self) -> u32 {
        self.wins
    }

    #[cfg(test)]
    pub const fn strikes(&self) -> u32 {
        self.strikes
    }
}

/// What a refused privileged command costs the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strike {
    Kick,
    /// Lost the given tier.
    Demote(Tier),
    Warn,
}

/// Everyone currently in the game channel.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    players: HashMap<String, Player>,
    /// Known nicks a NAMES reply in progress hasn't listed yet.
    unconfirmed: Option<HashSet<String>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, nick: &str) -> Option<&Player> {
        self.players.get(nick)
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.players.contains_key(nick)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Starts checking everyone against a fresh NAMES reply. Records are
    /// kept for whoever shows up in it.
    pub fn begin_snapshot(&mut self) {
        self.unconfirmed = Some(self.players.keys().cloned().collect());
    }

    /// Forgets the players the NAMES reply didn't list.
    pub fn end_snapshot(&mut self) -> Vec<String> {
        let Some(missing) = self.unconfirmed.take() else {
            return Vec::new();
        };

        for nick in &missing {
            debug!(nick, "gone since we last looked");
            self.players.remove(nick);
        }

        missing.into_iter().collect()
    }

    fn entry(&mut self, nick: &str) -> &mut Player {
        self.players.entry(nick.to_owned()).or_default()
    }

    /// A fresh record for someone who just joined.
    pub fn join(&mut self, nick: &str, tier: Tier) {
        trace!(nick, %tier, "joined");
        self.players.insert(nick.to_owned(), Player::with_tier(tier));
    }

    /// Updates standing from a NAMES reply, keeping wins and strikes for
    /// players we already know.
    pub fn observe(&mut self, nick: &str, tier: Tier) {
        if let Some(unconfirmed) = &mut self.unconfirmed {
            unconfirmed.remove(nick);
        }

        self.entry(nick).tier = tier;
    }

    pub fn leave(&mut self, nick: &str) -> Option<Player> {
        trace!(nick, "left");
        self.players.remove(nick)
    }

    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(unconfirmed) = &mut self.unconfirmed {
            if unconfirmed.remove(old) {
                unconfirmed.insert(new.to_owned());
            }
        }

        if let Some(player) = self.players.remove(old) {
            debug!(old, new, "rebinding player");
            self.players.insert(new.to_owned(), player);
        }
    }

    pub fn set_tier(&mut self, nick: &str, tier: Tier) {
        self.entry(nick).tier = tier;
    }

    /// Counts a correct answer. Returns the tier to grant if this win earns
    /// one the player doesn't already hold. Wins only go up, so each
    /// threshold is crossed once per record.
    pub fn record_win(&mut self, nick: &str) -> Option<Tier> {
        let player = self.entry(nick);
        player.wins += 1;

        let reward = Tier::reward_for(player.wins)?;

        if player.tier >= reward {
            debug!(nick, %reward, "reward already held");
            return None;
        }

        player.tier = player.tier.promote(reward);

        Some(reward)
    }

    /// Counts a refused privileged command against the player.
    pub fn strike(&mut self, nick: &str) -> Strike {
        let player = self.entry(nick);
        player.strikes += 1;

        debug!(nick, strikes = player.strikes, "strike");

        if player.strikes >= MAX_STRIKES {
            return Strike::Kick;
        }

        let demoted = player.tier.demote();
        if demoted == player.tier {
            Strike::Warn
        } else {
            let lost = player.tier;
            player.tier = demoted;
            Strike::Demote(lost)
        }
    }
}
