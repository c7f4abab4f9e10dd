use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use thiserror::Error;
use thisslime::TracingError;
use tracing::{debug, instrument};

/// Separates the prompt from the answer on each line of a category file.
pub const DELIMITER: char = '`';

/// Gives up on finding a well-formed line after this many tries.
const MAX_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    prompt: String,
    answer: String,
}

impl Question {
    pub fn new(prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            answer: answer.into(),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }
}

#[derive(Debug, Error, TracingError, PartialEq, Eq)]
#[error("line `{line}` is not a `prompt`answer` pair")]
#[event(level = WARN)]
pub struct MalformedLine {
    #[field(print = Debug)]
    line: String,
}

impl MalformedLine {
    fn new(line: &str) -> Self {
        Self {
            line: line.to_owned(),
        }
    }
}

impl FromStr for Question {
    type Err = MalformedLine;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split(DELIMITER);

        match (parts.next(), parts.next(), parts.next()) {
            (Some(prompt), Some(answer), None) => {
                let (prompt, answer) = (prompt.trim(), answer.trim());

                if prompt.is_empty() || answer.is_empty() {
                    Err(MalformedLine::new(line))
                } else {
                    Ok(Self::new(prompt, answer))
                }
            }
            _ => Err(MalformedLine::new(line)),
        }
    }
}

#[derive(Debug, Error, TracingError)]
pub enum Error {
    #[error("couldn't read question corpus: {0}")]
    #[event(level = ERROR)]
    Io(#[from] std::io::Error),

    #[error("no category files in {0:?}")]
    #[event(level = ERROR)]
    NoCategories(PathBuf),

    #[error("no usable question after {0} attempts")]
    #[event(level = ERROR)]
    Exhausted(usize),
}

/// Anything that can hand the game its next question.
pub trait QuestionSource {
    fn next_question(&mut self) -> Result<Question, Error>;
}

/// A directory of category files, one `prompt`answer` pair per line.
///
/// Every draw picks a random file and then a random line from it, so the
/// directory can be edited while the bot is running.
#[derive(Debug)]
pub struct QuestionsDir {
    dir: PathBuf,
    rng: StdRng,
}

impl QuestionsDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_rng(dir, StdRng::from_entropy())
    }

    pub fn with_rng(dir: impl Into<PathBuf>, rng: StdRng) -> Self {
        Self {
            dir: dir.into(),
            rng,
        }
    }

    fn categories(&self) -> Result<Vec<PathBuf>, Error> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(Error::NoCategories(self.dir.clone()));
        }

        // read_dir order is platform-dependent
        files.sort();
        Ok(files)
    }

    fn draw_line(&mut self, categories: &[PathBuf]) -> Result<Option<String>, Error> {
        let Some(file) = categories.choose(&mut self.rng) else {
            return Ok(None);
        };

        let text = fs::read(file)?;
        let text = String::from_utf8_lossy(&text);

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let line = lines.choose(&mut self.rng).map(|line| (*line).to_owned());

        if line.is_none() {
            debug!(?file, "category file has no lines");
        }

        Ok(line)
    }
}

impl QuestionSource for QuestionsDir {
    #[instrument(skip_all, fields(dir = ?self.dir))]
    fn next_question(&mut self) -> Result<Question, Error> {
        let categories = self.categories()?;

        for _ in 0..MAX_ATTEMPTS {
            let Some(line) = self.draw_line(&categories)? else {
                continue;
            };

            match line.parse::<Question>() {
                Ok(question) => {
                    debug!(prompt = question.prompt(), "picked question");
                    return Ok(question);
                }
                Err(err) => err.trace(),
            }
        }

        Err(Error::Exhausted(MAX_ATTEMPTS))
    }
}

/// Hands out a fixed list of questions in order, forever.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedQuestions {
    questions: Vec<Question>,
    next: usize,
}

#[cfg(test)]
impl FixedQuestions {
    pub fn new(questions: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            questions: questions
                .into_iter()
                .map(|(prompt, answer)| Question::new(prompt, answer))
                .collect(),
            next: 0,
        }
    }
}

#[cfg(test)]
impl QuestionSource for FixedQuestions {
    fn next_question(&mut self) -> Result<Question, Error> {
        if self.questions.is_empty() {
            return Err(Error::Exhausted(0));
        }

        let question = self.questions[self.next % self.questions.len()].clone();
        self.next += 1;
        Ok(question)
    }
}
