//! The slot manager: save, load, delete and rename over the backup tree.
//!
//! Every operation runs to completion on the caller's thread. Metadata is
//! flushed after each mutation; a flush failure does not undo the filesystem
//! work already done, it is attached to the [`Report`] instead.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use log::{info, warn};

use crate::config::{Config, SLOT_COUNT};
use crate::error::{Result, SlotError};
use crate::fsops;
use crate::guard::GameGuard;
use crate::locator::SaveLocator;
use crate::metadata::{MetadataStore, Slot, default_name};

const AUTO_BACKUP_PREFIX: &str = "auto_backup_";
const AUTO_BACKUP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Outcome of a successful operation, phrased for the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub message: String,
    /// Set when the operation went through but `slots.json` could not be
    /// written; the in-memory state is still current.
    pub metadata_warning: Option<String>,
}

impl Report {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata_warning: None,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(w) = &self.metadata_warning {
            write!(f, " (error saving slot data: {})", w)?;
        }
        Ok(())
    }
}

/// A safety copy of the live save taken before a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoBackup {
    pub name: String,
    pub path: PathBuf,
    pub taken_at: NaiveDateTime,
}

/// Owns the slot table, the backup tree and the live save location for the
/// lifetime of the process.
pub struct SlotManager {
    config: Config,
    save_location: Option<PathBuf>,
    guard: GameGuard,
    store: MetadataStore,
}

impl SlotManager {
    /// Resolve the save location (explicit `save_dir` or detection) and open
    /// the manager with the standard game guard.
    pub fn bootstrap(config: Config) -> Result<Self> {
        Self::bootstrap_with(config, &SaveLocator::from_env())
    }

    /// As [`bootstrap`](Self::bootstrap), detecting through `locator`. An
    /// explicit `save_dir` that is not a directory is ignored.
    pub fn bootstrap_with(config: Config, locator: &SaveLocator) -> Result<Self> {
        let save_location = match &config.save_dir {
            Some(dir) if dir.is_dir() => Some(dir.clone()),
            Some(dir) => {
                warn!(
                    "Configured save folder {} is not a directory, falling back to detection",
                    dir.display()
                );
                locator.locate()
            }
            None => locator.locate(),
        };
        let guard = GameGuard::new(config.game_exe.clone());
        Self::open(config, save_location, guard)
    }

    /// Create the backup root, load metadata and reconcile it against disk.
    pub fn open(config: Config, save_location: Option<PathBuf>, guard: GameGuard) -> Result<Self> {
        fs::create_dir_all(&config.backup_dir)
            .map_err(|e| SlotError::io("create", &config.backup_dir, e))?;
        let store = MetadataStore::load(&config.metadata_file);
        let mut manager = Self {
            config,
            save_location,
            guard,
            store,
        };
        manager.reconcile();
        info!("Backup directory: {}", manager.config.backup_dir.display());
        info!("Slots file: {}", manager.config.metadata_file.display());
        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn save_location(&self) -> Option<&Path> {
        self.save_location.as_deref()
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup_dir
    }

    pub fn metadata_path(&self) -> &Path {
        self.store.path()
    }

    pub fn slots(&self) -> &[Slot] {
        self.store.slots()
    }

    pub fn slot(&self, index: usize) -> Result<&Slot> {
        self.store.get(index).ok_or(SlotError::InvalidSlot {
            index,
            count: SLOT_COUNT,
        })
    }

    pub fn slot_dir(&self, index: usize) -> PathBuf {
        self.config.slot_dir(index)
    }

    /// Idle status line for the presentation layer.
    pub fn status_line(&self) -> &'static str {
        if self.save_location.is_some() {
            "Ready - Noita save folder detected"
        } else {
            "Warning - Noita save folder not found"
        }
    }

    pub fn is_game_running(&self) -> bool {
        self.guard.is_game_running()
    }

    /// Re-derive occupancy from the backup tree.
    pub fn reconcile(&mut self) {
        let config = &self.config;
        self.store.reconcile(|i| config.slot_dir(i));
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < SLOT_COUNT {
            Ok(())
        } else {
            Err(SlotError::InvalidSlot {
                index,
                count: SLOT_COUNT,
            })
        }
    }

    fn check_guard(&self) -> Result<()> {
        if self.guard.is_game_running() {
            warn!("{} is running, refusing to touch saves", self.guard.exe());
            return Err(SlotError::GameRunning {
                exe: self.guard.exe().to_string(),
            });
        }
        Ok(())
    }

    fn persist(&self, mut report: Report) -> Report {
        if let Err(e) = self.store.save() {
            warn!("Error saving slot data: {}", e);
            report.metadata_warning = Some(e.to_string());
        }
        report
    }

    /// Copy the live save into slot `index`, replacing what was there.
    pub fn save_to_slot(&mut self, index: usize) -> Result<Report> {
        self.check_index(index)?;
        let live = self.save_location.clone().ok_or(SlotError::NoSaveFolder)?;
        self.check_guard()?;

        let dir = self.slot_dir(index);
        fsops::replace_tree(&live, &dir).map_err(|e| SlotError::io("copy save into", &dir, e))?;

        if let Some(slot) = self.store.get_mut(index) {
            slot.last_saved_at = Some(Local::now().naive_local());
            slot.occupied = true;
            if slot.name.trim().is_empty() {
                slot.name = default_name(index);
            }
        }
        self.reconcile();
        info!("Saved {} to {}", live.display(), dir.display());
        Ok(self.persist(Report::new(format!("Saved to Slot {}", index + 1))))
    }

    /// Restore slot `index` over the live save, taking an auto-backup first.
    /// The live save is not touched unless the auto-backup succeeded.
    pub fn load_from_slot(&mut self, index: usize) -> Result<Report> {
        self.check_index(index)?;
        let dir = self.slot_dir(index);
        if !dir.is_dir() {
            return Err(SlotError::EmptySlot { index });
        }
        let live = self.save_location.clone().ok_or(SlotError::NoSaveFolder)?;
        self.check_guard()?;

        let backup = self.backup_live_save(&live)?;
        info!("Auto-backup created: {}", backup.display());
        fsops::replace_tree(&dir, &live).map_err(|e| SlotError::io("restore save into", &live, e))?;
        info!("Restored {} into {}", dir.display(), live.display());
        Ok(Report::new(format!(
            "Loaded Slot {} (auto-backup created)",
            index + 1
        )))
    }

    fn backup_live_save(&self, live: &Path) -> Result<PathBuf> {
        let root = &self.config.auto_backup_dir;
        fs::create_dir_all(root).map_err(|e| SlotError::io("create auto-backup dir", root, e))?;
        let stamp = Local::now().format(AUTO_BACKUP_FORMAT).to_string();
        let mut dest = root.join(format!("{}{}", AUTO_BACKUP_PREFIX, stamp));
        let mut n = 1;
        while dest.exists() {
            dest = root.join(format!("{}{}_{}", AUTO_BACKUP_PREFIX, stamp, n));
            n += 1;
        }
        fsops::copy_tree_clean(live, &dest).map_err(|e| SlotError::io("auto-backup to", &dest, e))?;
        Ok(dest)
    }

    /// Remove slot `index`. Callers obtain the player's confirmation first.
    pub fn delete_slot(&mut self, index: usize) -> Result<Report> {
        self.check_index(index)?;
        let dir = self.slot_dir(index);
        if !dir.is_dir() {
            return Ok(Report::new(format!("Slot {} is already empty!", index + 1)));
        }
        fs::remove_dir_all(&dir).map_err(|e| SlotError::io("delete", &dir, e))?;
        if let Some(slot) = self.store.get_mut(index) {
            *slot = Slot::empty(index);
        }
        self.reconcile();
        info!("Deleted {}", dir.display());
        Ok(self.persist(Report::new(format!("Deleted Slot {}", index + 1))))
    }

    /// Rename slot `index`. Blank names leave the slot untouched.
    pub fn rename_slot(&mut self, index: usize, new_name: &str) -> Result<Report> {
        self.check_index(index)?;
        let new_name = new_name.trim();
        let Some(slot) = self.store.get_mut(index) else {
            return Err(SlotError::InvalidSlot {
                index,
                count: SLOT_COUNT,
            });
        };
        if new_name.is_empty() {
            return Ok(Report::new(format!("Slot {} name unchanged", index + 1)));
        }
        slot.name = new_name.to_string();
        Ok(self.persist(Report::new(format!(
            "Slot {} renamed to \"{}\"",
            index + 1,
            new_name
        ))))
    }

    /// Auto-backups on disk, newest first.
    pub fn auto_backups(&self) -> Result<Vec<AutoBackup>> {
        let root = &self.config.auto_backup_dir;
        let rd = match fs::read_dir(root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SlotError::io("list", root, e)),
        };
        let mut out: Vec<AutoBackup> = rd
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let (taken_at, _) = parse_auto_backup_name(&name)?;
                Some(AutoBackup {
                    path: e.path(),
                    name,
                    taken_at,
                })
            })
            .collect();
        // Names sort chronologically; the `_N` suffix orders same-second copies
        out.sort_by(|a, b| {
            b.taken_at
                .cmp(&a.taken_at)
                .then_with(|| suffix_of(&b.name).cmp(&suffix_of(&a.name)))
        });
        Ok(out)
    }

    /// Delete all but the newest `keep` auto-backups; returns removed names.
    pub fn prune_auto_backups(&self, keep: usize) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for backup in self.auto_backups()?.into_iter().skip(keep) {
            fs::remove_dir_all(&backup.path).map_err(|e| SlotError::io("delete", &backup.path, e))?;
            info!("Pruned auto-backup {}", backup.name);
            removed.push(backup.name);
        }
        Ok(removed)
    }

    /// Flush metadata on orderly shutdown.
    pub fn flush(&self) -> Result<()> {
        self.store.save()
    }
}

fn suffix_of(name: &str) -> u32 {
    parse_auto_backup_name(name).map_or(0, |(_, n)| n)
}

/// Splits `auto_backup_YYYYMMDD_HHMMSS[_N]` into its timestamp and suffix.
/// Anything else under the auto-backup root was not written by us.
fn parse_auto_backup_name(name: &str) -> Option<(NaiveDateTime, u32)> {
    let rest = name.strip_prefix(AUTO_BACKUP_PREFIX)?;
    let stamp = rest.get(..15)?;
    let taken_at = NaiveDateTime::parse_from_str(stamp, AUTO_BACKUP_FORMAT).ok()?;
    let tail = rest.get(15..)?;
    if tail.is_empty() {
        return Some((taken_at, 0));
    }
    let digits = tail.strip_prefix('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((taken_at, digits.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_our_auto_backup_names_parse() {
        let (at, n) = parse_auto_backup_name("auto_backup_20240301_091500").unwrap();
        assert_eq!(at.format(AUTO_BACKUP_FORMAT).to_string(), "20240301_091500");
        assert_eq!(n, 0);
        assert_eq!(parse_auto_backup_name("auto_backup_20240301_091500_12").unwrap().1, 12);

        for foreign in [
            "auto_backup_mine_keep",
            "auto_backup_20240301_091500_",
            "auto_backup_20240301_091500_x",
            "auto_backup_20240301_091500-old",
            "auto_backup_2024",
            "slot_0",
        ] {
            assert!(parse_auto_backup_name(foreign).is_none(), "{}", foreign);
        }
    }
}
