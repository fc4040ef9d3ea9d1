use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures surfaced by slot operations. None of them are fatal: the caller
/// renders the message and the manager keeps running on its in-memory state.
#[derive(Error, Debug)]
pub enum SlotError {
    #[error("Noita save folder not found!")]
    NoSaveFolder,

    /// Advisory block: the game process was seen in the process list.
    #[error("{exe} is running. Close it first, then try again.")]
    GameRunning { exe: String },

    #[error("Slot {} is empty!", .index + 1)]
    EmptySlot { index: usize },

    #[error("no such slot: {index} (valid slots are 0..{count})")]
    InvalidSlot { index: usize, count: usize },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl SlotError {
    pub(crate) fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        SlotError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for the game-running guard, which the presentation layer shows as
    /// a blocking warning rather than a status line.
    pub fn is_guard(&self) -> bool {
        matches!(self, SlotError::GameRunning { .. })
    }
}

pub type Result<T, E = SlotError> = std::result::Result<T, E>;
