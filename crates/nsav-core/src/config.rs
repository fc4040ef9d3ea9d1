use std::path::{Path, PathBuf};

/// Number of slots shown to the player; indices are `0..SLOT_COUNT`.
pub const SLOT_COUNT: usize = 8;

pub const DEFAULT_GAME_EXE: &str = "noita.exe";
pub const BACKUP_DIR_NAME: &str = "backups";
pub const METADATA_FILE_NAME: &str = "slots.json";

/// Where the manager keeps its state and what it guards against.
///
/// Everything hangs off `base_dir` unless overridden: `<base>/backups` holds
/// the slot trees and auto-backups, `<base>/slots.json` holds the metadata.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub auto_backup_dir: PathBuf,
    pub metadata_file: PathBuf,
    /// Explicit live save location; skips detection when set.
    pub save_dir: Option<PathBuf>,
    pub game_exe: String,
}

impl Config {
    pub fn with_base_dir(base: impl Into<PathBuf>) -> Self {
        let base_dir = base.into();
        let backup_dir = base_dir.join(BACKUP_DIR_NAME);
        Self {
            auto_backup_dir: backup_dir.clone(),
            metadata_file: base_dir.join(METADATA_FILE_NAME),
            backup_dir,
            base_dir,
            save_dir: None,
            game_exe: DEFAULT_GAME_EXE.to_string(),
        }
    }

    /// Base directory next to the running executable, falling back to the
    /// current directory when the executable path cannot be resolved.
    pub fn beside_executable() -> Self {
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::with_base_dir(base)
    }

    pub fn slot_dir(&self, index: usize) -> PathBuf {
        self.backup_dir.join(format!("slot_{}", index))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::beside_executable()
    }
}
