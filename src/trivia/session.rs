use std::collections::HashSet;

use rand::{rngs::StdRng, SeedableRng};
use thisslime::TracingError;
use tracing::{debug, info, instrument, warn};

use super::{
    question::{Question, QuestionSource},
    roster::{Roster, Tier},
    scoreboard::Scoreboard,
    Action, Actions, ClueMask, Target, TimerRequest,
};

/// Points on offer, by how many clues have been given.
pub const POINTS: [u64; 4] = [100, 75, 50, 25];

pub const CLUE_LABELS: [&str; 4] = ["Clue:", "2nd Clue:", "3rd Clue:", "Final Clue:"];

/// Unanswered rounds in a row before the bot stops talking to itself.
pub const MAX_IDLE_ROUNDS: u32 = 10;

/// Distinct votes that skip the current question.
pub const VOTES_TO_SKIP: usize = 3;

/// Longest standings line sent in one notice, in bytes.
const STANDINGS_LINE_LIMIT: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    /// A question is up and this many clues have been given.
    AwaitingClue(usize),
    /// Every clue is out and nobody got it.
    Exhausted,
}

/// The parts of the configuration the game needs.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub channel: String,
    pub nick: String,
    pub admins: Vec<String>,
    pub source: Option<String>,
    /// The project this bot was forked from, if any.
    pub original_source: Option<String>,
}

impl Settings {
    pub fn is_admin(&self, nick: &str) -> bool {
        self.admins.iter().any(|admin| admin == nick)
    }

    fn is_me(&self, nick: &str) -> bool {
        self.nick.eq_ignore_ascii_case(nick)
    }
}

#[derive(Debug)]
struct Round {
    question: Question,
    clue: ClueMask,
}

/// One game of trivia in one channel.
///
/// Every method handles one event and returns what should happen as a
/// result; nothing in here touches the network or the disk.
pub struct GameSession {
    settings: Settings,
    questions: Box<dyn QuestionSource + Send>,
    scores: Scoreboard,
    roster: Roster,
    state: RoundState,
    round: Option<Round>,
    points: u64,
    idle_rounds: u32,
    voters: HashSet<String>,
    rng: StdRng,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("channel", &self.settings.channel)
            .field("state", &self.state)
            .field("points", &self.points)
            .field("idle_rounds", &self.idle_rounds)
            .field("votes", &self.voters.len())
            .finish_non_exhaustive()
    }
}

impl GameSession {
    pub fn new(
        settings: Settings,
        questions: impl QuestionSource + Send + 'static,
        scores: Scoreboard,
    ) -> Self {
        Self {
            settings,
            questions: Box::new(questions),
            scores,
            roster: Roster::new(),
            state: RoundState::Idle,
            round: None,
            points: POINTS[0],
            idle_rounds: 0,
            voters: HashSet::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scores(&self) -> &Scoreboard {
        &self.scores
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub(crate) fn roster_mut(&mut self) -> &mut Roster {
        &mut self.roster
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != RoundState::Idle
    }

    /// Points the current question is worth right now.
    pub fn points(&self) -> u64 {
        self.points
    }

    pub fn idle_rounds(&self) -> u32 {
        self.idle_rounds
    }

    pub fn votes(&self) -> usize {
        self.voters.len()
    }

    pub fn question(&self) -> Option<&Question> {
        self.round.as_ref().map(|round| &round.question)
    }

    pub fn mask(&self) -> Option<String> {
        self.round.as_ref().map(|round| round.clue.current_mask())
    }

    // ---- game flow ----

    #[instrument(skip(self))]
    pub fn start(&mut self) -> Actions {
        let mut out = Actions::new();

        if self.is_running() {
            debug!("already running");
            return out;
        }

        info!("starting game");
        self.idle_rounds = 0;
        self.tick(&mut out);

        if self.is_running() {
            out.timer(TimerRequest::Reschedule);
        }

        out
    }

    /// Idempotent: stopping a stopped game does nothing.
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> Actions {
        let mut out = Actions::new();

        if self.is_running() {
            self.stop_into(&mut out);
        }

        out
    }

    pub fn on_tick(&mut self) -> Actions {
        let mut out = Actions::new();
        self.tick(&mut out);
        out
    }

    fn tick(&mut self, out: &mut Actions) {
        match self.state {
            RoundState::Idle => self.begin_round(out),
            RoundState::AwaitingClue(given) => self.give_next_clue(given, out),
            RoundState::Exhausted => self.reveal(out),
        }
    }

    fn begin_round(&mut self, out: &mut Actions) {
        self.voters.clear();

        let question = match self.questions.next_question() {
            Ok(question) => question,
            Err(err) => {
                err.trace();
                out.say("I couldn't find a question to ask!");
                self.halt(out);
                return;
            }
        };

        let clue = ClueMask::conceal(question.answer());
        self.points = POINTS[0];

        out.say("");
        out.say("Next question:");
        out.say(question.prompt());
        out.say(format!(
            "{} {}  Points: {}",
            CLUE_LABELS[0],
            clue.current_mask(),
            self.points
        ));

        debug!(answer = question.answer(), "new round");

        self.round = Some(Round { question, clue });
        self.state = RoundState::AwaitingClue(1);
    }

    fn give_next_clue(&mut self, given: usize, out: &mut Actions) {
        assert!(
            (1..POINTS.len()).contains(&given),
            "clue index {given} is outside the point schedule"
        );

        let Some(round) = self.round.as_mut() else {
            warn!("clue tick without a question, starting a new round");
            self.begin_round(out);
            return;
        };

        self.points = POINTS[given];
        let mask = round.clue.reveal_batch_with(&mut self.rng);

        out.say(format!(
            "{} {}  Points: {}",
            CLUE_LABELS[given], mask, self.points
        ));

        self.state = if given + 1 == POINTS.len() {
            RoundState::Exhausted
        } else {
            RoundState::AwaitingClue(given + 1)
        };
    }

    fn reveal(&mut self, out: &mut Actions) {
        if let Some(round) = &self.round {
            out.say(format!(
                "No one got it. The answer was: {}",
                round.clue.answer()
            ));
        }

        self.idle_rounds += 1;
        debug!(idle_rounds = self.idle_rounds, "nobody answered");

        if self.idle_rounds >= MAX_IDLE_ROUNDS {
            info!("nobody is playing, stopping");
            out.say("It appears I am talking to myself now!");
            self.stop_into(out);
        } else {
            self.begin_round(out);
        }
    }

    /// Ends the game without any announcements.
    fn halt(&mut self, out: &mut Actions) {
        self.state = RoundState::Idle;
        self.round = None;
        self.voters.clear();
        out.timer(TimerRequest::Cancel);
    }

    fn stop_into(&mut self, out: &mut Actions) {
        self.halt(out);

        out.say("Thanks for playing trivia!");
        out.say("Current rankings are:");
        self.standings_into(Target::Channel, false, out);
        out.say("Scores have been saved, and see you next game!");
        out.push(Action::Save(self.scores.clone()));
    }

    /// Any non-command line from the game channel.
    pub fn on_candidate_answer(&mut self, nick: &str, text: &str) -> Actions {
        let mut out = Actions::new();

        // any chatter at all counts as someone playing
        self.idle_rounds = 0;

        let correct = self.is_running()
            && self
                .round
                .as_ref()
                .is_some_and(|round| round.clue.is_answer(text));

        if correct {
            self.award(nick, &mut out);
        }

        out
    }

    fn award(&mut self, nick: &str, out: &mut Actions) {
        let points = self.points;
        let total = self.scores.increment(nick, points);

        info!(nick, points, total, "correct answer");

        out.say(format!("{nick} GOT IT!"));
        out.say(format!("{points} points have been added to your score!"));
        out.push(Action::Save(self.scores.clone()));

        match self.roster.record_win(nick) {
            Some(Tier::Voice) => {
                out.push(Action::Mode {
                    nick: nick.to_owned(),
                    tier: Tier::Voice,
                    grant: true,
                });
                out.say("Two correct answers! That earns you a voice!");
            }
            Some(Tier::Halfop) => {
                out.push(Action::Mode {
                    nick: nick.to_owned(),
                    tier: Tier::Halfop,
                    grant: true,
                });
                out.say("Another two correct answers, have some halfops!");
            }
            Some(other) => warn!(%other, "no reward message for tier"),
            None => (),
        }

        self.begin_round(out);

        if self.is_running() {
            out.timer(TimerRequest::Reschedule);
        }
    }

    pub fn on_skip_vote(&mut self, nick: &str) -> Actions {
        let mut out = Actions::new();

        if !self.is_running() {
            out.say("We aren't playing right now.");
            return out;
        }

        if !self.voters.insert(nick.to_owned()) {
            out.say(format!(
                "You already voted, {nick}, give someone else a chance to hate this question"
            ));
            return out;
        }

        if self.voters.len() >= VOTES_TO_SKIP {
            debug!("vote passed");
            self.voters.clear();
            out.extend(self.force_skip());
        } else {
            out.say(format!(
                "{nick}, you have voted. {} more votes needed to skip.",
                VOTES_TO_SKIP - self.voters.len()
            ));
        }

        out
    }

    pub fn force_skip(&mut self) -> Actions {
        let mut out = Actions::new();

        if !self.is_running() {
            out.say("We are not playing right now.");
            return out;
        }

        if let Some(round) = &self.round {
            out.say(format!(
                "Question has been skipped. The answer was: {}",
                round.clue.answer()
            ));
        }

        self.begin_round(&mut out);

        if self.is_running() {
            out.timer(TimerRequest::Reschedule);
        }

        out
    }

    /// Gives the next clue now instead of waiting for the timer.
    pub fn give_clue(&mut self) -> Actions {
        let mut out = Actions::new();

        if !self.is_running() {
            out.say("We are not playing right now.");
            return out;
        }

        self.tick(&mut out);

        if self.is_running() {
            out.timer(TimerRequest::Reschedule);
        }

        out
    }

    pub fn show_question(&self) -> Actions {
        let mut out = Actions::new();

        match (&self.round, self.is_running()) {
            (Some(round), true) => {
                out.say(format!("Current question: {}", round.question.prompt()));
            }
            _ => out.say("We are not playing right now."),
        }

        out
    }

    // ---- scores ----

    pub fn score(&self, nick: &str) -> Actions {
        let mut out = Actions::new();

        match self.scores.get(nick) {
            Some(score) => out.notice(
                Target::nick(nick),
                format!("Your current score is: {score}"),
            ),
            None => out.notice(Target::nick(nick), "You aren't in my database."),
        }

        out
    }

    pub fn standings(&self, target: Target) -> Actions {
        let mut out = Actions::new();
        self.standings_into(target, true, &mut out);
        out
    }

    fn standings_into(&self, target: Target, header: bool, out: &mut Actions) {
        if header {
            out.notice(target.clone(), "The current trivia standings are: ");
        }

        let ranked: Vec<String> = self
            .scores
            .ranked()
            .iter()
            .map(ToString::to_string)
            .collect();

        if ranked.is_empty() {
            out.notice(target, "Nobody has scored yet.");
            return;
        }

        for line in join_limited(&ranked, ", ", STANDINGS_LINE_LIMIT) {
            out.notice(target.clone(), line);
        }
    }

    pub fn set_score(&mut self, nick: &str, score: u64) {
        info!(nick, score, "score set");
        self.scores.set(nick, score);
    }

    pub fn save(&self) -> Action {
        Action::Save(self.scores.clone())
    }

    /// Stops everything for good; the caller disconnects and, when
    /// `restart` is set, comes back.
    pub fn shutdown(&mut self, restart: bool) -> Actions {
        let mut out = Actions::new();

        info!(restart, "shutting down");
        self.halt(&mut out);
        out.push(self.save());
        out.push(Action::Quit { restart });

        out
    }

    // ---- membership ----

    /// We joined the game channel, possibly after a reconnect.
    pub fn on_joined(&mut self) -> Actions {
        let mut out = Actions::new();

        // a NAMES reply follows every join
        self.roster.begin_snapshot();

        if !self.is_running() {
            out.say(format!("Welcome to {}!", self.settings.channel));
            out.say(self.usage_hint());
        }

        out
    }

    fn usage_hint(&self) -> String {
        format!(
            "For how to use this bot, just say ?help or '{} help'.",
            self.settings.nick
        )
    }

    pub fn on_names<'a>(&mut self, entries: impl IntoIterator<Item = &'a str>) {
        for entry in entries {
            let (nick, tier) = Tier::split_prefixed(entry);

            if nick.is_empty() || self.settings.is_me(nick) {
                continue;
            }

            self.roster.observe(nick, tier);
        }
    }

    /// The NAMES reply is complete. Anyone who left while we were away is
    /// dropped from the roster.
    pub fn on_names_end(&mut self) {
        let gone = self.roster.end_snapshot();

        if !gone.is_empty() {
            debug!(?gone, "players left while we were away");
        }
    }

    pub fn on_join(&mut self, nick: &str) -> Actions {
        let mut out = Actions::new();

        if self.settings.is_me(nick) {
            return out;
        }

        self.roster.join(nick, Tier::None);

        if self.settings.is_admin(nick) {
            out.push(Action::Mode {
                nick: nick.to_owned(),
                tier: Tier::Op,
                grant: true,
            });
            self.roster.set_tier(nick, Tier::Op);
        } else {
            let target = Target::nick(nick);
            out.notice(
                target.clone(),
                format!("Welcome to {}!", self.settings.channel),
            );
            out.notice(target.clone(), self.usage_hint());

            if !self.is_running() {
                out.notice(
                    target,
                    "Just say ?start to start the game when you are ready.",
                );
            }
        }

        out
    }

    /// Parts, quits and kicks all land here. Scores are kept.
    pub fn on_leave(&mut self, nick: &str) {
        self.roster.leave(nick);
    }

    pub fn on_rename(&mut self, old: &str, new: &str) {
        self.roster.rename(old, new);
    }

    /// Someone's modes changed. If it's one of ours, find out what they hold
    /// now.
    pub fn on_mode_change<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Actions {
        let mut out = Actions::new();

        if args.into_iter().any(|arg| self.roster.contains(arg)) {
            out.push(Action::RefreshNames);
        }

        out
    }
}

/// Joins items with `separator` into lines no longer than `limit` bytes. An
/// item longer than `limit` gets a line to itself.
fn join_limited(items: &[String], separator: &str, limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for item in items {
        if !line.is_empty() && line.len() + separator.len() + item.len() > limit {
            lines.push(std::mem::take(&mut line));
        }

        if !line.is_empty() {
            line.push_str(separator);
        }
        line.push_str(item);
    }

    if !line.is_empty() {
        lines.push(line);
    }

    lines
}
