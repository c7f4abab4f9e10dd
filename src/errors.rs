use thiserror::Error as ThisError;
use thisslime::TracingError;

use crate::framework::config;

#[derive(Debug, ThisError, TracingError)]
#[span]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error("connection task ended without being asked to quit")]
    #[event(level = ERROR)]
    ConnectionClosed,
}
