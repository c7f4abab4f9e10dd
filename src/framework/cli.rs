use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Runs a trivia game in an IRC channel")]
pub struct Cli {
    /// Config file; falls back to `TRIVIABOT_TOML`, then ./triviabot.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Load and check the config, then exit
    Config,

    #[default]
    Start,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::{Cli, Command};

    #[test]
    fn defaults_to_start() {
        let cli = Cli::parse_from(["triviabot"]);

        assert_eq!(cli.command(), Command::Start);
        assert!(cli.config.is_none());
    }

    #[test]
    fn config_path_and_subcommand() {
        let cli = Cli::parse_from(["triviabot", "--config", "/etc/trivia.toml", "config"]);

        assert_eq!(cli.command(), Command::Config);
        assert_eq!(cli.config.unwrap().to_str(), Some("/etc/trivia.toml"));
    }
}
