//! nsav-core: slot management for Noita save snapshots
//!
//! The crate keeps a small, explicit surface:
//! - Save folder detection across the usual per-user locations (`locator`)
//! - Advisory game-running guard with fallback probes (`guard`)
//! - Slot metadata document, repaired and reconciled against disk (`metadata`)
//! - Directory tree copy/replace used by save and restore (`fsops`)
//! - `SlotManager`, the context object a front end drives (`slots`)
//!
pub mod config;
pub mod error;
pub mod fsops;
pub mod guard;
pub mod locator;
pub mod metadata;
pub mod slots;

pub use config::{Config, SLOT_COUNT};
pub use error::{Result, SlotError};
pub use guard::{AssumeNotRunning, GameGuard, ProcessProbe, ShellProbe, SysinfoProbe};
pub use locator::{LocatorReport, SaveLocator};
pub use metadata::{DATE_FORMAT, MetadataStore, Slot};
pub use slots::{AutoBackup, Report, SlotManager};
