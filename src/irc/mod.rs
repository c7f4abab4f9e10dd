//! Just enough IRC to run a channel game.

pub mod client;
pub use client::{Client, ClientSettings, Event, Sender};

pub mod message;
pub use message::Message;
