//! Slot metadata and its JSON document (`slots.json`).
//!
//! The document is keyed by stringified slot index:
//!
//! ```json
//! { "0": { "name": "Before the Mountain", "date": "2025-03-01 21:40", "exists": true } }
//! ```
//!
//! The stored `exists` flag is written for readers of the file but never
//! trusted on load; occupancy always comes from the backup directory tree.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::SLOT_COUNT;
use crate::error::{Result, SlotError};
use crate::fsops;

/// Timestamp format used in the document, minute precision.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

const DISPLAY_NAME_MAX: usize = 15;
const DISPLAY_NAME_KEEP: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    pub name: String,
    pub last_saved_at: Option<NaiveDateTime>,
    pub occupied: bool,
}

impl Slot {
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            name: default_name(index),
            last_saved_at: None,
            occupied: false,
        }
    }

    /// "Slot N", 1-based, as shown to the player regardless of custom name.
    pub fn label(&self) -> String {
        default_name(self.index)
    }

    /// Name shortened to fit a slot tile.
    pub fn display_name(&self) -> String {
        if self.name.chars().count() > DISPLAY_NAME_MAX {
            let head: String = self.name.chars().take(DISPLAY_NAME_KEEP).collect();
            format!("{}...", head)
        } else {
            self.name.clone()
        }
    }

    pub fn date_string(&self) -> String {
        self.last_saved_at
            .map(|t| t.format(DATE_FORMAT).to_string())
            .unwrap_or_default()
    }

    /// Full name plus the save date on its own line; empty for empty slots.
    pub fn tooltip(&self) -> String {
        if !self.occupied {
            return String::new();
        }
        match self.last_saved_at {
            Some(_) => format!("{}\n{}", self.name, self.date_string()),
            None => self.name.clone(),
        }
    }

    fn from_record(index: usize, rec: SlotRecord) -> Self {
        let name = if rec.name.trim().is_empty() {
            default_name(index)
        } else {
            rec.name
        };
        let last_saved_at = match rec.date.trim() {
            "" => None,
            s => NaiveDateTime::parse_from_str(s, DATE_FORMAT)
                .inspect_err(|e| debug!("slot {}: unreadable date {:?}: {}", index, s, e))
                .ok(),
        };
        Self {
            index,
            name,
            last_saved_at,
            occupied: rec.exists,
        }
    }

    fn to_record(&self) -> SlotRecord {
        SlotRecord {
            name: self.name.clone(),
            date: self.date_string(),
            exists: self.occupied,
        }
    }
}

pub fn default_name(index: usize) -> String {
    format!("Slot {}", index + 1)
}

/// On-disk shape of one slot entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SlotRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    exists: bool,
}

/// In-memory slot table plus the file it is flushed to.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    slots: Vec<Slot>,
}

impl MetadataStore {
    /// Load the document, filling any missing or unreadable entry with a
    /// default record. Never fails: a broken file means starting from defaults.
    pub fn load(path: &Path) -> Self {
        let mut records: Vec<Option<SlotRecord>> = vec![None; SLOT_COUNT];
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text) {
                Ok(map) => {
                    for (i, rec) in records.iter_mut().enumerate() {
                        *rec = map.get(&i.to_string()).and_then(|v| {
                            serde_json::from_value::<SlotRecord>(v.clone())
                                .inspect_err(|e| warn!("slot {} metadata unreadable: {}", i, e))
                                .ok()
                        });
                    }
                }
                Err(e) => warn!("{} is not a slot document ({}), using defaults", path.display(), e),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no metadata at {}, starting fresh", path.display());
            }
            Err(e) => warn!("could not read {}: {}, using defaults", path.display(), e),
        }

        let slots = records
            .into_iter()
            .enumerate()
            .map(|(i, rec)| match rec {
                Some(rec) => Slot::from_record(i, rec),
                None => Slot::empty(i),
            })
            .collect();
        Self {
            path: path.to_path_buf(),
            slots,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    /// Align every slot with the directory tree: occupancy follows the
    /// directory, empty slots lose their date, and occupied slots without a
    /// usable date get the directory's creation time.
    pub fn reconcile<F>(&mut self, slot_dir: F)
    where
        F: Fn(usize) -> PathBuf,
    {
        for slot in &mut self.slots {
            let dir = slot_dir(slot.index);
            let exists = dir.is_dir();
            if slot.occupied != exists {
                debug!("slot {}: stored exists={} but disk says {}", slot.index, slot.occupied, exists);
            }
            slot.occupied = exists;
            if !exists {
                slot.last_saved_at = None;
            } else if slot.last_saved_at.is_none() {
                slot.last_saved_at = fsops::created_at(&dir);
                if slot.last_saved_at.is_none() {
                    warn!("slot {}: no timestamp available for {}", slot.index, dir.display());
                }
            }
        }
    }

    /// Write the document through a temp file and rename, creating the parent
    /// directory if needed.
    pub fn save(&self) -> Result<()> {
        let doc: BTreeMap<String, SlotRecord> = self
            .slots
            .iter()
            .map(|s| (s.index.to_string(), s.to_record()))
            .collect();
        let json = serde_json::to_string_pretty(&doc)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SlotError::io("create", parent, e))?;
        }
        let tmp = self.path.with_extension(format!("json.tmp.{}", std::process::id()));
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(SlotError::io("write", &self.path, e));
        }
        info!("Slot data saved to: {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: usize, name: &str, occupied: bool) -> Slot {
        Slot {
            index,
            name: name.to_string(),
            last_saved_at: None,
            occupied,
        }
    }

    #[test]
    fn display_name_truncates_long_names() {
        assert_eq!(slot(0, "Short", true).display_name(), "Short");
        assert_eq!(slot(0, "Exactly15Chars!", true).display_name(), "Exactly15Chars!");
        assert_eq!(
            slot(0, "Before the Mountain run", true).display_name(),
            "Before the M..."
        );
    }

    #[test]
    fn tooltip_includes_date_only_when_set() {
        let mut s = slot(2, "Coal pit", true);
        assert_eq!(s.tooltip(), "Coal pit");
        s.last_saved_at = NaiveDateTime::parse_from_str("2025-03-01 21:40", DATE_FORMAT).ok();
        assert_eq!(s.tooltip(), "Coal pit\n2025-03-01 21:40");
        assert_eq!(slot(2, "Coal pit", false).tooltip(), "");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let d = tempfile::tempdir().unwrap();
        let store = MetadataStore::load(&d.path().join("slots.json"));
        assert_eq!(store.slots().len(), SLOT_COUNT);
        for (i, s) in store.slots().iter().enumerate() {
            assert_eq!(*s, Slot::empty(i));
        }
    }

    #[test]
    fn garbage_file_yields_defaults() {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().join("slots.json");
        fs::write(&p, "{ not json").unwrap();
        let store = MetadataStore::load(&p);
        assert_eq!(store.get(7), Some(&Slot::empty(7)));
    }

    #[test]
    fn partial_document_is_filled_in() {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().join("slots.json");
        fs::write(
            &p,
            r#"{"1": {"name": "Mines", "date": "2025-01-02 03:04", "exists": true},
                "4": "corrupt",
                "5": {"name": "", "date": "Unknown date", "exists": false}}"#,
        )
        .unwrap();
        let store = MetadataStore::load(&p);
        let one = store.get(1).unwrap();
        assert_eq!(one.name, "Mines");
        assert_eq!(one.date_string(), "2025-01-02 03:04");
        assert_eq!(store.get(4), Some(&Slot::empty(4)));
        let five = store.get(5).unwrap();
        assert_eq!(five.name, "Slot 6");
        assert!(five.last_saved_at.is_none());
        assert_eq!(store.get(0), Some(&Slot::empty(0)));
    }

    #[test]
    fn save_writes_stringified_keys_and_reloads() {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().join("nested/slots.json");
        let mut store = MetadataStore::load(&p);
        {
            let s = store.get_mut(3).unwrap();
            s.name = "Holy Mountain".into();
            s.occupied = true;
            s.last_saved_at = NaiveDateTime::parse_from_str("2025-05-06 07:08", DATE_FORMAT).ok();
        }
        store.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&p).unwrap()).unwrap();
        assert_eq!(raw["3"]["name"], "Holy Mountain");
        assert_eq!(raw["3"]["date"], "2025-05-06 07:08");
        assert_eq!(raw["3"]["exists"], true);
        assert_eq!(raw["0"]["date"], "");
        assert_eq!(raw.as_object().unwrap().len(), SLOT_COUNT);

        let again = MetadataStore::load(&p);
        assert_eq!(again.get(3), store.get(3));
    }

    #[test]
    fn reconcile_trusts_the_directory_tree() {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().join("slots.json");
        fs::write(
            &p,
            r#"{"0": {"name": "Ghost", "date": "2025-01-02 03:04", "exists": true}}"#,
        )
        .unwrap();
        fs::create_dir_all(d.path().join("slot_3")).unwrap();
        let mut store = MetadataStore::load(&p);
        store.reconcile(|i| d.path().join(format!("slot_{}", i)));

        let ghost = store.get(0).unwrap();
        assert!(!ghost.occupied);
        assert!(ghost.last_saved_at.is_none());
        assert_eq!(ghost.name, "Ghost");

        let found = store.get(3).unwrap();
        assert!(found.occupied);
        assert!(found.last_saved_at.is_some());
        assert_eq!(found.name, "Slot 4");
    }
}
