use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use rand::seq::IteratorRandom;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{irc::ClientSettings, trivia};

pub const DEFAULT_PATH: &str = "./triviabot.toml";

#[derive(Debug, thiserror::Error, thisslime::TracingError)]
pub enum Error {
    #[error("file read error: {0}")]
    #[event(level = ERROR)]
    Read(config::ConfigError),

    #[error("parsing error: {0}")]
    #[event(level = ERROR)]
    Parse(config::ConfigError),

    #[error("invalid config: {0}")]
    #[event(level = ERROR)]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    pub server: ServerConfig,
    pub game: GameConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

impl Config {
    /// Where to look for the config file: the command line first, then
    /// `TRIVIABOT_TOML`, then the working directory.
    pub fn path(cli: Option<&Path>) -> PathBuf {
        if let Some(path) = cli {
            info!(?path, "using config file from command line");
            path.to_owned()
        } else if let Ok(path) = std::env::var("TRIVIABOT_TOML") {
            info!(path, "looking for config file with TRIVIABOT_TOML...");
            path.into()
        } else {
            warn!(path = DEFAULT_PATH, "TRIVIABOT_TOML env unset, using default path");
            DEFAULT_PATH.into()
        }
    }

    /// Reads the TOML file, with `TRIVIABOT__SECTION__KEY` environment
    /// variables layered on top.
    #[tracing::instrument(skip_all, name = "config", fields(path = ?path))]
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ))
            .add_source(::config::Environment::with_prefix("TRIVIABOT").separator("__"))
            .build()
            .map_err(Error::Read)?
            .try_deserialize()
            .map_err(Error::Parse)?;

        config.validate()?;

        info!("config loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.game.channel.starts_with(['#', '&']) {
            return Err(Error::Invalid(format!(
                "game.channel `{}` is not a channel name",
                self.game.channel
            )));
        }

        if self.server.idle_timeout_secs == 0 {
            return Err(Error::Invalid(
                "server.idle_timeout_secs must be at least 1".to_owned(),
            ));
        }

        if self.game.wait_interval_secs == 0 {
            return Err(Error::Invalid(
                "game.wait_interval_secs must be at least 1".to_owned(),
            ));
        }

        if self.game.admins.is_empty() {
            warn!("no admins in config, nobody will be able to skip, save or stop the bot");
        }

        Ok(())
    }

    pub fn session_settings(&self) -> trivia::Settings {
        trivia::Settings {
            channel: self.game.channel.clone(),
            nick: self.bot.nick.clone(),
            admins: self.game.admins.clone(),
            source: self.bot.source().map(str::to_owned),
            original_source: self.bot.original_source.clone(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            host: self.server.host.clone(),
            port: self.server.port,
            nick: self.bot.nick.clone(),
            realname: self.bot.realname.clone(),
            user_modes: self.bot.user_modes.clone(),
            ident_pass: self.bot.ident_pass.clone(),
            channel: self.game.channel.clone(),
            connect_timeout: self.server.timeout(),
            idle_timeout: self.server.idle_timeout(),
            line_rate: self.server.line_rate(),
            tls: self.server.tls,
            bind: self.server.bind(),
        }
    }
}

fn default_nick() -> String {
    "TriviaBot".to_owned()
}

fn default_realname() -> String {
    "Trivia Bot".to_owned()
}

fn default_user_modes() -> String {
    "iB".to_owned()
}

fn default_quit_message() -> String {
    "This is triviabot, signing off.".to_owned()
}

#[derive(Deserialize, Debug, Clone)]
pub struct BotConfig {
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    #[serde(default = "default_user_modes")]
    pub user_modes: String,
    #[serde(default = "default_quit_message")]
    quit_message: String,
    ident_pass: Option<String>,
    source: Option<String>,
    original_source: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            realname: default_realname(),
            user_modes: default_user_modes(),
            quit_message: default_quit_message(),
            ident_pass: None,
            source: None,
            original_source: None,
        }
    }
}

impl BotConfig {
    pub fn quit_message(&self) -> &str {
        &self.quit_message
    }

    pub fn source(&self) -> Option<&str> {
        if self.source.is_none() {
            warn!("no bot.source in config");
        }

        self.source.as_deref()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_timeout")]
    timeout_secs: u64,
    #[serde(default = "ServerConfig::default_line_rate")]
    line_rate_ms: u64,
    #[serde(default = "ServerConfig::default_idle_timeout")]
    idle_timeout_secs: u64,
    #[serde(default)]
    pub tls: bool,
    bind_addr: Option<IpAddr>,
    bind_port: Option<u16>,
}

impl ServerConfig {
    const fn default_port() -> u16 {
        6667
    }

    const fn default_timeout() -> u64 {
        30
    }

    const fn default_line_rate() -> u64 {
        400
    }

    const fn default_idle_timeout() -> u64 {
        300
    }

    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Where to connect from. Unset unless either half is configured; a
    /// missing address means any IPv4 interface, a missing port any port.
    pub fn bind(&self) -> Option<SocketAddr> {
        if self.bind_addr.is_none() && self.bind_port.is_none() {
            return None;
        }

        let addr = self.bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Some(SocketAddr::new(addr, self.bind_port.unwrap_or(0)))
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn line_rate(&self) -> Duration {
        if self.line_rate_ms == 0 {
            warn!("server.line_rate_ms is 0, the server may disconnect us for flooding");
        }

        // tokio intervals can't be zero
        Duration::from_millis(self.line_rate_ms.max(1))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct GameConfig {
    pub channel: String,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default = "GameConfig::default_questions_dir")]
    questions_dir: PathBuf,
    #[serde(default = "GameConfig::default_save_dir")]
    save_dir: PathBuf,
    #[serde(default = "GameConfig::default_wait_interval")]
    wait_interval_secs: u64,
}

impl GameConfig {
    fn default_questions_dir() -> PathBuf {
        "./questions/".into()
    }

    fn default_save_dir() -> PathBuf {
        "./savedata/".into()
    }

    const fn default_wait_interval() -> u64 {
        15
    }

    pub fn questions_dir(&self) -> &Path {
        &self.questions_dir
    }

    pub fn scores_path(&self) -> PathBuf {
        self.save_dir.join(trivia::scoreboard::SCORES_FILE)
    }

    pub const fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LogsConfig {
    #[serde(default)]
    flavor_texts: Vec<String>,
}

impl LogsConfig {
    pub fn flavor_text(&self) -> Option<&str> {
        let flavor_text = self
            .flavor_texts
            .iter()
            .choose(&mut rand::thread_rng())
            .map(|s| s.as_str());

        if flavor_text.is_none() {
            warn!("no flavor texts provided in config :(");
        }

        flavor_text
    }
}
