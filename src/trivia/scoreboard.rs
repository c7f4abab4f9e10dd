use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use thiserror::Error;
use thisslime::TracingError;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

pub const SCORES_FILE: &str = "scores.json";

#[derive(Debug, Error, TracingError)]
pub enum Error {
    #[error("io error: {0}")]
    #[event(level = ERROR)]
    Io(#[from] std::io::Error),

    #[error("couldn't read scores: {0}")]
    #[event(level = ERROR)]
    Json(#[from] serde_json::Error),
}

/// Everyone's points, in the order they first scored.
///
/// Scores outlive channel membership: leaving the channel doesn't cost anyone
/// their points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scoreboard {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing<'a> {
    pub rank: usize,
    pub player: &'a str,
    pub score: u64,
}

impl fmt::Display for Standing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {} with {} points", self.rank, self.player, self.score)
    }
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, player: &str) -> Option<u64> {
        self.index.get(player).map(|&i| self.entries[i].1)
    }

    fn entry(&mut self, player: &str) -> &mut u64 {
        let i = match self.index.get(player) {
            Some(&i) => i,
            None => {
                self.entries.push((player.to_owned(), 0));
                self.index.insert(player.to_owned(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        &mut self.entries[i].1
    }

    /// Adds points, creating the player at zero first if needed. Returns the
    /// new total.
    pub fn increment(&mut self, player: &str, amount: u64) -> u64 {
        let score = self.entry(player);
        *score = score.saturating_add(amount);
        *score
    }

    pub fn set(&mut self, player: &str, amount: u64) {
        *self.entry(player) = amount;
    }

    /// Highest score first. Ties keep the order players first scored in.
    pub fn ranked(&self) -> Vec<Standing<'_>> {
        let mut sorted: Vec<&(String, u64)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));

        sorted
            .into_iter()
            .enumerate()
            .map(|(i, (player, score))| Standing {
                rank: i + 1,
                player,
                score: *score,
            })
            .collect()
    }

    /// Reads a saved scoreboard. A missing or unreadable file is an empty
    /// board, not an error: the first save will replace it.
    #[instrument(skip_all, fields(path = ?path))]
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(board) => {
                info!(players = board.len(), "scores loaded");
                board
            }
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("save file doesn't exist, starting with an empty scoreboard");
                Self::new()
            }
            Err(err) => {
                err.trace();
                warn!("starting with an empty scoreboard");
                Self::new()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    #[instrument(skip_all, fields(path = ?path))]
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                debug!(?dir, "creating save directory");
                fs::create_dir_all(dir)?;
            }
        }

        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;

        debug!(players = self.len(), "scores saved");
        Ok(())
    }
}

impl<'a> FromIterator<(&'a str, u64)> for Scoreboard {
    fn from_iter<T: IntoIterator<Item = (&'a str, u64)>>(iter: T) -> Self {
        let mut board = Self::new();
        for (player, score) in iter {
            board.set(player, score);
        }
        board
    }
}

impl Serialize for Scoreboard {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (player, score) in &self.entries {
            map.serialize_entry(player, score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Scoreboard {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoreboardVisitor;

        impl<'de> Visitor<'de> for ScoreboardVisitor {
            type Value = Scoreboard;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of player names to non-negative scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut board = Scoreboard::new();
                while let Some((player, score)) = map.next_entry::<String, u64>()? {
                    board.set(&player, score);
                }
                Ok(board)
            }
        }

        deserializer.deserialize_map(ScoreboardVisitor)
    }
}

/// Writes scoreboards to disk off the game loop.
///
/// Only the latest snapshot matters, so a backlog is collapsed into a single
/// write.
#[derive(Debug)]
pub struct ScoreWriter {
    tx: mpsc::UnboundedSender<Scoreboard>,
    handle: JoinHandle<()>,
}

impl ScoreWriter {
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Scoreboard>();

        let handle = tokio::spawn(async move {
            while let Some(mut board) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    board = newer;
                }

                let path = path.clone();
                let result = tokio::task::spawn_blocking(move || board.save(&path)).await;

                match result {
                    Ok(Ok(())) => (),
                    Ok(Err(err)) => {
                        err.trace();
                        error!("failed to save scores");
                    }
                    Err(err) => error!("score writer panicked: {err}"),
                }
            }

            debug!("score writer finished");
        });

        Self { tx, handle }
    }

    pub fn save(&self, board: Scoreboard) {
        if self.tx.send(board).is_err() {
            error!("score writer is gone, scores were not saved");
        }
    }

    /// Waits for every queued save to hit the disk.
    pub async fn flush(self) {
        drop(self.tx);

        if let Err(err) = self.handle.await {
            error!("score writer panicked: {err}");
        }
    }
}
