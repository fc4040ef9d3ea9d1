use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use nsav_core::{Config, SLOT_COUNT, SaveLocator, SlotError, SlotManager};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_FAILED: u8 = 2;
const EXIT_GAME_RUNNING: u8 = 3;
const EXIT_ABORTED: u8 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "nsav",
    about = "Noita Savior: keep eight named snapshots of your Noita save",
    version
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(ClapArgs, Debug)]
struct GlobalOpts {
    /// Directory holding backups/ and slots.json (defaults to the executable's directory)
    #[arg(long, env = "NSAV_BASE_DIR", global = true)]
    base_dir: Option<PathBuf>,
    /// Backup root for slot_N directories (defaults to <base-dir>/backups)
    #[arg(long, env = "NSAV_BACKUP_DIR", global = true)]
    backup_dir: Option<PathBuf>,
    /// Where auto-backups taken before a load go (defaults to the backup root)
    #[arg(long, env = "NSAV_AUTO_BACKUP_DIR", global = true)]
    auto_backup_dir: Option<PathBuf>,
    /// Slot metadata file (defaults to <base-dir>/slots.json)
    #[arg(long, env = "NSAV_METADATA_FILE", global = true)]
    metadata_file: Option<PathBuf>,
    /// Live save folder; skips detection
    #[arg(long, env = "NSAV_SAVE_DIR", global = true)]
    save_dir: Option<PathBuf>,
    /// Executable name checked before touching saves
    #[arg(long, env = "NSAV_GAME_EXE", global = true)]
    game_exe: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Show all slots (default)
    List,
    /// Show the detected save folder and whether the game is running
    Status,
    /// Copy the live save into a slot
    Save(SlotArg),
    /// Restore a slot over the live save (an auto-backup is taken first)
    Load(SlotArg),
    /// Delete a slot's backup
    Delete(DeleteArgs),
    /// Rename a slot
    Rename(RenameArgs),
    /// Print every candidate save location and whether it exists
    Locate,
    /// List auto-backups, newest first
    Backups,
    /// Delete old auto-backups
    Prune(PruneArgs),
}

#[derive(ClapArgs, Debug)]
struct SlotArg {
    /// Slot number as shown (1-8)
    #[arg(value_parser = clap::value_parser!(u8).range(1..=SLOT_COUNT as i64))]
    slot: u8,
}

#[derive(ClapArgs, Debug)]
struct DeleteArgs {
    #[command(flatten)]
    slot: SlotArg,
    /// Do not ask for confirmation
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,
}

#[derive(ClapArgs, Debug)]
struct RenameArgs {
    #[command(flatten)]
    slot: SlotArg,
    /// New name; blank keeps the current one
    name: String,
}

#[derive(ClapArgs, Debug)]
struct PruneArgs {
    /// Number of most recent auto-backups to keep
    #[arg(long, default_value_t = 10)]
    keep: usize,
}

impl Cmd {
    /// Commands that may change the slot table. Read-only commands must not
    /// create `slots.json` on a fresh install.
    fn mutates(&self) -> bool {
        matches!(
            self,
            Cmd::Save(_) | Cmd::Load(_) | Cmd::Delete(_) | Cmd::Rename(_)
        )
    }
}

impl SlotArg {
    fn index(&self) -> usize {
        usize::from(self.slot) - 1
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let cmd = cli.cmd.unwrap_or(Cmd::List);
    if matches!(cmd, Cmd::Locate) {
        return cmd_locate();
    }

    let mut mgr = match open_manager(cli.opts) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };
    let flush_on_exit = cmd.mutates() || mgr.metadata_path().exists();
    let code = match cmd {
        Cmd::List => cmd_list(&mgr),
        Cmd::Status => cmd_status(&mgr),
        Cmd::Save(a) => report(mgr.save_to_slot(a.index())),
        Cmd::Load(a) => report(mgr.load_from_slot(a.index())),
        Cmd::Delete(a) => cmd_delete(&mut mgr, a),
        Cmd::Rename(a) => report(mgr.rename_slot(a.slot.index(), &a.name)),
        Cmd::Backups => cmd_backups(&mgr),
        Cmd::Prune(a) => cmd_prune(&mgr, a),
        Cmd::Locate => cmd_locate(),
    };
    if flush_on_exit {
        if let Err(e) = mgr.flush() {
            log::warn!("Error saving slot data on exit: {}", e);
        }
    }
    code
}

fn open_manager(opts: GlobalOpts) -> anyhow::Result<SlotManager> {
    let mut cfg = match opts.base_dir {
        Some(base) => Config::with_base_dir(base),
        None => Config::beside_executable(),
    };
    if let Some(dir) = opts.backup_dir {
        if opts.auto_backup_dir.is_none() {
            cfg.auto_backup_dir = dir.clone();
        }
        cfg.backup_dir = dir;
    }
    if let Some(dir) = opts.auto_backup_dir {
        cfg.auto_backup_dir = dir;
    }
    if let Some(file) = opts.metadata_file {
        cfg.metadata_file = file;
    }
    if let Some(exe) = opts.game_exe {
        cfg.game_exe = exe;
    }
    cfg.save_dir = opts.save_dir;
    log::debug!("config: {:?}", cfg);
    SlotManager::bootstrap(cfg).context("could not open the slot store")
}

fn report(res: Result<nsav_core::Report, SlotError>) -> ExitCode {
    match res {
        Ok(r) => {
            println!("{}", r);
            ExitCode::SUCCESS
        }
        Err(e) if e.is_guard() => {
            eprintln!("Noita is Running");
            eprintln!("{}", e);
            ExitCode::from(EXIT_GAME_RUNNING)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn cmd_list(mgr: &SlotManager) -> ExitCode {
    println!("{}", mgr.status_line());
    for s in mgr.slots() {
        if s.occupied {
            println!("{}\t{}\t{}", s.label(), s.display_name(), s.date_string());
        } else {
            println!("{}\tEmpty", s.label());
        }
    }
    ExitCode::SUCCESS
}

fn cmd_status(mgr: &SlotManager) -> ExitCode {
    println!("{}", mgr.status_line());
    match mgr.save_location() {
        Some(p) => println!("save folder:\t{}", p.display()),
        None => println!("save folder:\t<not found>"),
    }
    println!("backups:\t{}", mgr.backup_dir().display());
    println!("slots file:\t{}", mgr.metadata_path().display());
    println!(
        "{}:\t{}",
        mgr.config().game_exe,
        if mgr.is_game_running() { "running" } else { "not running" }
    );
    ExitCode::SUCCESS
}

fn cmd_delete(mgr: &mut SlotManager, args: DeleteArgs) -> ExitCode {
    let index = args.slot.index();
    let occupied = mgr.slot(index).map(|s| s.occupied).unwrap_or(false);
    if occupied && !args.yes {
        match confirm(&format!("Are you sure you want to delete Slot {}?", index + 1)) {
            Ok(true) => {}
            Ok(false) => {
                println!("Delete cancelled");
                return ExitCode::from(EXIT_ABORTED);
            }
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::from(EXIT_FAILED);
            }
        }
    }
    report(mgr.delete_slot(index))
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn cmd_locate() -> ExitCode {
    let report = SaveLocator::from_env().diagnose();
    for (i, (path, exists)) in report.candidates.iter().enumerate() {
        println!(
            "{}. {} - {}",
            i + 1,
            path.display(),
            if *exists { "EXISTS" } else { "NOT FOUND" }
        );
    }
    if let Some(found) = report.found() {
        println!("using: {}", found.display());
        return ExitCode::SUCCESS;
    }
    if let Some(parent) = report.parent {
        if !parent.exists {
            println!("Parent directory does not exist: {}", parent.path.display());
        } else {
            println!("Parent directory exists: {}", parent.path.display());
            match parent.entries {
                Ok(names) => names.iter().for_each(|n| println!("  - {}", n)),
                Err(e) => println!("  Error listing contents: {}", e),
            }
        }
    }
    ExitCode::from(EXIT_FAILED)
}

fn cmd_backups(mgr: &SlotManager) -> ExitCode {
    match mgr.auto_backups() {
        Ok(list) => {
            for b in list {
                let when = b.taken_at.format(nsav_core::DATE_FORMAT);
                println!("{}\t{}\t{}", b.name, when, b.path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn cmd_prune(mgr: &SlotManager, args: PruneArgs) -> ExitCode {
    match mgr.prune_auto_backups(args.keep) {
        Ok(removed) => {
            for name in &removed {
                println!("removed {}", name);
            }
            println!("{} auto-backup(s) removed", removed.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cmd {
        let cli = Cli::try_parse_from(std::iter::once("nsav").chain(args.iter().copied())).unwrap();
        cli.cmd.unwrap_or(Cmd::List)
    }

    #[test]
    fn read_only_commands_do_not_flush_metadata() {
        for args in [&[][..], &["list"], &["status"], &["backups"], &["prune", "--keep", "3"]] {
            assert!(!parse(args).mutates(), "{:?}", args);
        }
    }

    #[test]
    fn slot_commands_flush_metadata() {
        for args in [
            &["save", "1"][..],
            &["load", "8"],
            &["delete", "2", "--yes"],
            &["rename", "3", "Coal Pits"],
        ] {
            assert!(parse(args).mutates(), "{:?}", args);
        }
    }

    #[test]
    fn slot_numbers_outside_one_to_eight_are_rejected() {
        assert!(Cli::try_parse_from(["nsav", "save", "0"]).is_err());
        assert!(Cli::try_parse_from(["nsav", "save", "9"]).is_err());
        assert!(matches!(parse(&["save", "8"]), Cmd::Save(a) if a.index() == 7));
    }
}
