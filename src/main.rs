#![warn(clippy::perf)]
#![warn(clippy::unwrap_used)]

mod bot;
use bot::{Bot, Exit};

mod errors;

mod framework;
use framework::{cli::Command, Cli, Config};

mod irc;

mod trivia;
use trivia::{GameSession, QuestionsDir, ScoreWriter, Scoreboard};

use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use thisslime::TracingError;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_unwrap::ResultExt;

/// How long to wait for the server to acknowledge our QUIT.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    framework::logging::init_tracing();

    if let Err(err) = dotenvy::dotenv() {
        debug!("no .env file loaded: {err}");
    }

    let cli = Cli::parse();

    info!("triviabot {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&Config::path(cli.config.as_deref()))
        .map_err(errors::Error::from)
        .expect_or_log("configuration could not be loaded");

    if cli.command() == Command::Config {
        info!(channel = %config.game.channel, server = %config.server.host, "config is valid");
        return;
    }

    if let Some(flavor_text) = config.logs.flavor_text() {
        info!("{flavor_text}");
    }

    match run(config).await {
        Ok(Exit::Die) => info!("goodbye!"),
        Ok(Exit::Restart) => {
            let err = restart();
            error!("couldn't restart: {err:#}");
            std::process::exit(1);
        }
        Err(err) => {
            err.trace();
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> Result<Exit, errors::Error> {
    let scores_path = config.game.scores_path();

    let session = GameSession::new(
        config.session_settings(),
        QuestionsDir::new(config.game.questions_dir()),
        Scoreboard::load(&scores_path),
    );

    let (sender, events, connection) = irc::Client::spawn(config.client_settings());

    let bot = Bot::new(
        session,
        sender,
        ScoreWriter::spawn(scores_path),
        config.game.wait_interval(),
        config.bot.quit_message(),
    );

    let exit = bot.run(events).await?;

    match tokio::time::timeout(DISCONNECT_TIMEOUT, connection).await {
        Ok(Ok(())) => (),
        Ok(Err(err)) => error!("connection task panicked: {err}"),
        Err(_) => warn!("server didn't close the connection in time"),
    }

    Ok(exit)
}

/// Replaces this process with a fresh copy of itself. Only returns if that
/// fails.
#[cfg(unix)]
fn restart() -> anyhow::Error {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe().context("couldn't find the running executable") {
        Ok(exe) => exe,
        Err(err) => return err,
    };

    info!(?exe, "restarting");

    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();

    anyhow::Error::new(err).context(format!("couldn't exec {}", exe.display()))
}

/// Starts a fresh copy of this process and exits. Only returns if that fails.
#[cfg(not(unix))]
fn restart() -> anyhow::Error {
    let result = std::env::current_exe()
        .context("couldn't find the running executable")
        .and_then(|exe| {
            info!(?exe, "restarting");

            std::process::Command::new(&exe)
                .args(std::env::args_os().skip(1))
                .spawn()
                .with_context(|| format!("couldn't start {}", exe.display()))
        });

    match result {
        Ok(_) => std::process::exit(0),
        Err(err) => err,
    }
}
