use std::fmt;

use rand::Rng;
use tracing::trace;

/// Stands in for every alphanumeric character that hasn't been revealed yet.
pub const MASK_CHAR: char = '*';

/// An answer that gets given away a few letters at a time.
///
/// Punctuation and spaces are never hidden, so `"rock 'n' roll"` starts out
/// as `"**** '*' ****"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClueMask {
    answer: Vec<char>,
    mask: Vec<char>,
    // indices into `answer` that are still masked, in no particular order
    hidden: Vec<usize>,
}

impl ClueMask {
    pub fn conceal(answer: &str) -> Self {
        let answer: Vec<char> = answer.chars().collect();

        let mut mask = Vec::with_capacity(answer.len());
        let mut hidden = Vec::new();

        for (index, ch) in answer.iter().enumerate() {
            if ch.is_alphanumeric() {
                mask.push(MASK_CHAR);
                hidden.push(index);
            } else {
                mask.push(*ch);
            }
        }

        Self {
            answer,
            mask,
            hidden,
        }
    }

    /// How many characters a single clue gives away: a quarter of the
    /// answer, but never less than one.
    pub fn batch_size(&self) -> usize {
        (self.answer.len() / 4).max(1)
    }

    #[cfg(test)]
    pub fn reveal_batch(&mut self) -> String {
        self.reveal_batch_with(&mut rand::thread_rng())
    }

    pub fn reveal_batch_with(&mut self, rng: &mut impl Rng) -> String {
        for _ in 0..self.batch_size() {
            if self.is_revealed() {
                break;
            }

            self.reveal_one_with(rng);
        }

        self.current_mask()
    }

    #[cfg(test)]
    pub fn reveal_one(&mut self) -> String {
        self.reveal_one_with(&mut rand::thread_rng())
    }

    pub fn reveal_one_with(&mut self, rng: &mut impl Rng) -> String {
        if !self.is_revealed() {
            let pick = rng.gen_range(0..self.hidden.len());
            let index = self.hidden.swap_remove(pick);
            self.mask[index] = self.answer[index];

            trace!(index, "revealed character");
        }

        self.current_mask()
    }

    pub fn current_mask(&self) -> String {
        self.mask.iter().collect()
    }

    pub fn answer(&self) -> String {
        self.answer.iter().collect()
    }

    pub fn is_revealed(&self) -> bool {
        self.hidden.is_empty()
    }

    #[cfg(test)]
    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.answer.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.answer.is_empty()
    }

    /// Whether a line of chat counts as a correct answer. Case and
    /// surrounding whitespace don't matter.
    pub fn is_answer(&self, guess: &str) -> bool {
        let guess = guess.trim().to_lowercase();
        let answer = self.answer().trim().to_lowercase();

        !answer.is_empty() && guess == answer
    }
}

impl fmt::Display for ClueMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current_mask())
    }
}
