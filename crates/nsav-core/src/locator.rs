//! Live save folder detection.
//!
//! Noita keeps its active run under `LocalLow\Nolla_Games_Noita\save00` in the
//! per-user application data tree. Depending on how the environment is set up
//! that folder is reachable through several variables, so a fixed list of
//! expansions is tried in order and the first existing directory wins.
//!
//! Detection happens once; a folder created after startup is only picked up
//! on the next launch.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

const NOITA_SAVE_SUFFIX: [&str; 3] = ["LocalLow", "Nolla_Games_Noita", "save00"];
const NOITA_STEAM_APP_ID: &str = "881100";

/// Ordered list of places the live save folder may live.
#[derive(Debug, Clone)]
pub struct SaveLocator {
    candidates: Vec<PathBuf>,
}

/// Result of probing every candidate, for troubleshooting a missing folder.
#[derive(Debug, Clone)]
pub struct LocatorReport {
    pub candidates: Vec<(PathBuf, bool)>,
    pub parent: Option<ParentListing>,
}

#[derive(Debug, Clone)]
pub struct ParentListing {
    pub path: PathBuf,
    pub exists: bool,
    /// Entry names, or the error message if listing failed.
    pub entries: Result<Vec<String>, String>,
}

impl SaveLocator {
    /// Candidates for the current user, from the real process environment.
    pub fn from_env() -> Self {
        Self::new(default_candidates(|k| std::env::var_os(k), dirs::home_dir()))
    }

    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate that exists on disk. Logs the full report when none do.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(found) = self.candidates.iter().find(|p| p.exists()) {
            info!("Found Noita save folder at: {}", found.display());
            return Some(found.clone());
        }
        self.diagnose().log();
        None
    }

    pub fn diagnose(&self) -> LocatorReport {
        let candidates = self
            .candidates
            .iter()
            .map(|p| (p.clone(), p.exists()))
            .collect();
        let parent = self
            .candidates
            .first()
            .and_then(|p| p.parent())
            .map(list_parent);
        LocatorReport { candidates, parent }
    }
}

impl LocatorReport {
    pub fn found(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .find(|(_, exists)| *exists)
            .map(|(p, _)| p.as_path())
    }

    fn log(&self) {
        warn!("Noita save folder not found. Checked paths:");
        for (i, (path, exists)) in self.candidates.iter().enumerate() {
            warn!(
                "  {}. {} - {}",
                i + 1,
                path.display(),
                if *exists { "EXISTS" } else { "NOT FOUND" }
            );
        }
        let Some(parent) = &self.parent else { return };
        if !parent.exists {
            warn!("Parent directory does not exist: {}", parent.path.display());
            return;
        }
        debug!("Parent directory exists: {}", parent.path.display());
        match &parent.entries {
            Ok(names) => {
                debug!("Contents:");
                for name in names {
                    debug!("  - {}", name);
                }
            }
            Err(e) => debug!("  Error listing contents: {}", e),
        }
    }
}

fn list_parent(path: &Path) -> ParentListing {
    let exists = path.is_dir();
    let entries = if exists {
        fs::read_dir(path)
            .map(|rd| {
                let mut names: Vec<String> = rd
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                names
            })
            .map_err(|e| e.to_string())
    } else {
        Ok(Vec::new())
    };
    ParentListing {
        path: path.to_path_buf(),
        exists,
        entries,
    }
}

fn with_suffix(base: PathBuf) -> PathBuf {
    NOITA_SAVE_SUFFIX.iter().fold(base, |p, part| p.join(part))
}

/// Build the candidate list from an environment lookup and a home directory.
///
/// Windows-style expansions come first, in the order players most often have
/// them set, followed by Proton prefixes for the Steam build on Linux.
/// Candidates whose variable is unset are skipped.
pub fn default_candidates<F>(env: F, home: Option<PathBuf>) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let var = |k: &str| env(k).filter(|v| !v.is_empty()).map(PathBuf::from);
    let mut out = Vec::new();

    if let Some(appdata) = var("APPDATA") {
        out.push(with_suffix(appdata));
    }
    if let Some(profile) = var("USERPROFILE") {
        out.push(with_suffix(profile.join("AppData")));
    }
    if let Some(local) = var("LOCALAPPDATA") {
        out.push(with_suffix(local.join("..")));
    }
    if let Some(home) = &home {
        out.push(with_suffix(home.join("AppData")));
    }

    let mut steam_roots = Vec::new();
    if let Some(xdg) = var("XDG_DATA_HOME") {
        steam_roots.push(xdg.join("Steam"));
    }
    if let Some(home) = &home {
        steam_roots.push(home.join(".local").join("share").join("Steam"));
        steam_roots.push(home.join(".steam").join("steam"));
    }
    for root in steam_roots {
        let user = root
            .join("steamapps")
            .join("compatdata")
            .join(NOITA_STEAM_APP_ID)
            .join("pfx")
            .join("drive_c")
            .join("users")
            .join("steamuser")
            .join("AppData");
        out.push(with_suffix(user));
    }

    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of<const N: usize>(
        pairs: [(&'static str, &'static str); N],
    ) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn windows_candidates_come_first_in_order() {
        let env = env_of([
            ("APPDATA", "C:/Users/mina/AppData/Roaming"),
            ("USERPROFILE", "C:/Users/mina"),
            ("LOCALAPPDATA", "C:/Users/mina/AppData/Local"),
        ]);
        let c = default_candidates(env, None);
        assert_eq!(c.len(), 3);
        assert!(c[0].starts_with("C:/Users/mina/AppData/Roaming"));
        assert!(c[1].starts_with("C:/Users/mina/AppData"));
        assert!(c[2].starts_with("C:/Users/mina/AppData/Local/.."));
        for p in &c {
            assert!(p.ends_with("LocalLow/Nolla_Games_Noita/save00"));
        }
    }

    #[test]
    fn unset_and_empty_variables_are_skipped() {
        let env = env_of([("APPDATA", "")]);
        assert!(default_candidates(env, None).is_empty());
    }

    #[test]
    fn home_adds_appdata_and_proton_candidates() {
        let c = default_candidates(env_of([]), Some(PathBuf::from("/home/mina")));
        assert_eq!(
            c[0],
            PathBuf::from("/home/mina/AppData/LocalLow/Nolla_Games_Noita/save00")
        );
        assert!(c.iter().skip(1).all(|p| {
            p.to_string_lossy().contains("compatdata/881100/pfx")
        }));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn locate_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let second = dir.path().join("second");
        let third = dir.path().join("third");
        fs::create_dir_all(&second).unwrap();
        fs::create_dir_all(&third).unwrap();
        let loc = SaveLocator::new(vec![missing, second.clone(), third]);
        assert_eq!(loc.locate(), Some(second));
    }

    #[test]
    fn diagnose_lists_parent_contents_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("other_game")).unwrap();
        let loc = SaveLocator::new(vec![dir.path().join("save00")]);
        assert_eq!(loc.locate(), None);
        let report = loc.diagnose();
        assert_eq!(report.candidates.len(), 1);
        assert!(!report.candidates[0].1);
        assert!(report.found().is_none());
        let parent = report.parent.unwrap();
        assert!(parent.exists);
        assert_eq!(parent.entries.unwrap(), vec!["other_game".to_string()]);
    }
}
