//! The one task that owns the game. It waits on the connection and the round
//! timer, feeds whatever happens into the session, and carries out the
//! actions that come back.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    errors::Error,
    irc::{self, Event, Message},
    trivia::{
        commands::{self, Invocation},
        Action, Actions, GameSession, ScoreWriter, Target, TimerRequest,
    },
};

const RESTART_MESSAGE: &str = "Restarting, back in a moment.";

/// How the bot wants the process to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Die,
    Restart,
}

/// Fires every `period` while running. Rescheduling restarts the count from
/// now.
#[derive(Debug)]
pub struct RoundTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl RoundTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn reschedule(&mut self) {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.interval = Some(interval);
    }

    pub fn cancel(&mut self) {
        self.interval = None;
    }

    /// Never completes while the timer is cancelled.
    pub async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

enum Wake {
    Event(Option<Event>),
    Tick,
}

pub struct Bot {
    session: GameSession,
    irc: irc::Sender,
    writer: ScoreWriter,
    timer: RoundTimer,
    quit_message: String,
}

impl Bot {
    pub fn new(
        session: GameSession,
        irc: irc::Sender,
        writer: ScoreWriter,
        interval: Duration,
        quit_message: impl Into<String>,
    ) -> Self {
        Self {
            session,
            irc,
            writer,
            timer: RoundTimer::new(interval),
            quit_message: quit_message.into(),
        }
    }

    /// Runs until an admin stops the bot. Scores are on disk by the time this
    /// returns.
    #[instrument(skip_all, fields(channel = %self.session.settings().channel))]
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) -> Result<Exit, Error> {
        info!("bot running");

        loop {
            let wake = tokio::select! {
                event = events.recv() => Wake::Event(event),
                () = self.timer.tick() => Wake::Tick,
            };

            let actions = match wake {
                Wake::Event(Some(event)) => self.handle(event),
                Wake::Event(None) => {
                    self.writer.flush().await;
                    return Err(Error::ConnectionClosed);
                }
                Wake::Tick => self.session.on_tick(),
            };

            if let Some(exit) = self.execute(actions) {
                info!(?exit, "stopping");
                self.writer.flush().await;
                return Ok(exit);
            }
        }
    }

    fn handle(&mut self, event: Event) -> Actions {
        match event {
            Event::Registered => Actions::new(),
            Event::Joined => self.session.on_joined(),
            Event::Message { nick, text } => {
                match Invocation::parse(&text, &self.session.settings().nick) {
                    Some(invocation) => commands::dispatch(&mut self.session, &nick, &invocation),
                    None => self.session.on_candidate_answer(&nick, &text),
                }
            }
            Event::Join { nick } => self.session.on_join(&nick),
            Event::Part { nick } | Event::Quit { nick } | Event::Kick { nick } => {
                self.session.on_leave(&nick);
                Actions::new()
            }
            Event::Nick { old, new } => {
                self.session.on_rename(&old, &new);
                Actions::new()
            }
            Event::Mode { args } => self.session.on_mode_change(args.iter().map(String::as_str)),
            Event::Names(entries) => {
                self.session.on_names(entries.iter().map(String::as_str));
                Actions::new()
            }
            Event::NamesEnd => {
                self.session.on_names_end();
                Actions::new()
            }
            Event::Disconnected => {
                warn!("disconnected, game state is kept until we're back");
                Actions::new()
            }
        }
    }

    /// Carries out actions in order. Returns how to exit if one of them was
    /// a quit.
    fn execute(&mut self, actions: Actions) -> Option<Exit> {
        let channel = self.session.settings().channel.clone();
        let mut exit = None;

        for action in actions {
            match action {
                Action::Say(text) => {
                    // an empty PRIVMSG is rejected by servers
                    let text = if text.is_empty() { " " } else { text.as_str() };
                    self.irc.send(Message::privmsg(&channel, text));
                }
                Action::Notice { target, text } => {
                    let to = match &target {
                        Target::Channel => channel.as_str(),
                        Target::Nick(nick) => nick.as_str(),
                    };
                    self.irc.send(Message::notice(to, &text));
                }
                Action::Describe(text) => self.irc.send(Message::action(&channel, &text)),
                Action::Mode { nick, tier, grant } => {
                    match Message::channel_mode(&channel, &nick, tier, grant) {
                        Some(message) => self.irc.send(message),
                        None => warn!(nick, %tier, "no mode letter for tier"),
                    }
                }
                Action::Kick { nick, reason } => {
                    self.irc.send(Message::kick(&channel, &nick, &reason));
                }
                Action::RefreshNames => self.irc.send(Message::names(&channel)),
                Action::Timer(TimerRequest::Reschedule) => self.timer.reschedule(),
                Action::Timer(TimerRequest::Cancel) => self.timer.cancel(),
                Action::Save(board) => self.writer.save(board),
                Action::Quit { restart } => {
                    let (reason, how) = if restart {
                        (RESTART_MESSAGE, Exit::Restart)
                    } else {
                        (self.quit_message.as_str(), Exit::Die)
                    };

                    debug!(reason, "quitting");
                    self.irc.quit(reason);
                    exit = Some(how);
                }
            }
        }

        exit
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::{sync::mpsc, time::timeout};

    use super::{Bot, Exit, RoundTimer};
    use crate::{
        errors::Error,
        irc::{client::Outbound, Event, Message, Sender},
        trivia::{question::FixedQuestions, GameSession, ScoreWriter, Scoreboard, Settings},
    };

    fn bot(save_path: std::path::PathBuf) -> (Bot, mpsc::UnboundedReceiver<Outbound>) {
        let session = GameSession::new(
            Settings {
                channel: "#trivia".to_owned(),
                nick: "TriviaBot".to_owned(),
                admins: vec!["admin".to_owned()],
                source: None,
                original_source: None,
            },
            FixedQuestions::new([("What year did X happen?", "1999")]),
            Scoreboard::new(),
        );

        let (sender, outbox) = Sender::detached();
        let writer = ScoreWriter::spawn(save_path);

        (
            Bot::new(session, sender, writer, Duration::from_secs(60), "bye"),
            outbox,
        )
    }

    fn message(nick: &str, text: &str) -> Event {
        Event::Message {
            nick: nick.to_owned(),
            text: text.to_owned(),
        }
    }

    fn drain(outbox: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut sent = Vec::new();
        while let Ok(line) = outbox.try_recv() {
            sent.push(line);
        }
        sent
    }

    fn line(message: Message) -> Outbound {
        Outbound::Line(message)
    }

    #[tokio::test]
    async fn start_sends_question_and_arms_timer() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bot, mut outbox) = bot(dir.path().join("scores.json"));

        let actions = bot.handle(message("alice", "?start"));
        assert_eq!(bot.execute(actions), None);

        assert_eq!(
            drain(&mut outbox),
            vec![
                line(Message::privmsg("#trivia", " ")),
                line(Message::privmsg("#trivia", "Next question:")),
                line(Message::privmsg("#trivia", "What year did X happen?")),
                line(Message::privmsg("#trivia", "Clue: ****  Points: 100")),
            ]
        );
        assert!(bot.timer.is_running());
    }

    #[tokio::test]
    async fn answers_and_commands_are_told_apart() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bot, mut outbox) = bot(dir.path().join("scores.json"));

        let actions = bot.handle(message("alice", "TriviaBot start"));
        bot.execute(actions);
        drain(&mut outbox);

        let actions = bot.handle(message("alice", "1999"));
        bot.execute(actions);

        let sent = drain(&mut outbox);
        assert_eq!(sent[0], line(Message::privmsg("#trivia", "alice GOT IT!")));
        assert_eq!(bot.session.scores().get("alice"), Some(100));
    }

    #[tokio::test]
    async fn notices_and_reactions_are_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bot, mut outbox) = bot(dir.path().join("scores.json"));

        let actions = bot.handle(message("alice", "?score"));
        bot.execute(actions);
        let actions = bot.handle(message("alice", "?dance"));
        bot.execute(actions);

        assert_eq!(
            drain(&mut outbox),
            vec![
                line(Message::notice("alice", "You aren't in my database.")),
                line(Message::action("#trivia", "looks at alice oddly.")),
            ]
        );
    }

    #[tokio::test]
    async fn fifth_refusal_sends_kick() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bot, mut outbox) = bot(dir.path().join("scores.json"));

        for _ in 0..5 {
            let actions = bot.handle(message("mallory", "?die"));
            assert_eq!(bot.execute(actions), None);
        }

        let sent = drain(&mut outbox);
        assert_eq!(
            sent.last(),
            Some(&line(Message::kick(
                "#trivia",
                "mallory",
                "You've earned five strikes, be gone!"
            )))
        );

        bot.handle(Event::Kick {
            nick: "mallory".to_owned(),
        });
        assert!(!bot.session.roster().contains("mallory"));
    }

    #[tokio::test]
    async fn die_saves_and_quits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("savedata").join("scores.json");
        let (bot, mut outbox) = bot(path.clone());

        let (events_tx, events) = mpsc::unbounded_channel();
        events_tx.send(message("admin", "?start")).unwrap();
        events_tx.send(message("alice", "1999")).unwrap();
        events_tx.send(message("admin", "?die")).unwrap();

        let exit = timeout(Duration::from_secs(5), bot.run(events))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, Exit::Die);
        assert_eq!(drain(&mut outbox).last(), Some(&Outbound::Quit("bye".to_owned())));
        assert_eq!(Scoreboard::try_load(&path).unwrap().get("alice"), Some(100));
    }

    #[tokio::test]
    async fn restart_exits_with_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, _outbox) = bot(dir.path().join("scores.json"));

        let (events_tx, events) = mpsc::unbounded_channel();
        events_tx.send(message("admin", "?restart")).unwrap();

        let exit = timeout(Duration::from_secs(5), bot.run(events))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, Exit::Restart);
    }

    #[tokio::test]
    async fn lost_connection_task_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, _outbox) = bot(dir.path().join("scores.json"));

        let (events_tx, events) = mpsc::unbounded_channel::<Event>();
        drop(events_tx);

        let result = timeout(Duration::from_secs(5), bot.run(events)).await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn timer_ticks_until_cancelled() {
        let mut timer = RoundTimer::new(Duration::from_millis(10));
        assert!(!timer.is_running());

        // a cancelled timer never fires
        assert!(timeout(Duration::from_millis(50), timer.tick()).await.is_err());

        timer.reschedule();
        assert!(timer.is_running());
        timeout(Duration::from_secs(1), timer.tick()).await.unwrap();

        timer.cancel();
        assert!(!timer.is_running());
    }
}
