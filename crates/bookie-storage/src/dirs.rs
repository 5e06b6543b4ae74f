//! Storage directory lifecycle
//!
//! Every configured directory holds a `current/` subdirectory with a
//! `VERSION` marker. This module validates that layout at mount time,
//! detects data left behind by older layouts, and formats directories.

use bookie_common::{Error, Result, ServerConfig};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Name of the namespaced subdirectory inside each configured directory
pub const CURRENT_DIR: &str = "current";

/// Name of the layout version marker
pub const VERSION_FILENAME: &str = "VERSION";

/// Layout version written into new directories
pub const CURRENT_LAYOUT_VERSION: u32 = 4;

/// Lock file taken inside every mounted `current/` directory
pub const LOCK_FILENAME: &str = "LOCK";

/// File extensions used by older on-disk layouts
const LEGACY_EXTENSIONS: &[&str] = &["txn", "idx", "log"];

/// Map each configured directory to its `current/` subdirectory
pub fn current_directories(dirs: Option<&[PathBuf]>) -> Result<Vec<PathBuf>> {
    let dirs = dirs.ok_or(Error::NullDirectoryList("directories"))?;
    Ok(dirs.iter().map(|dir| dir.join(CURRENT_DIR)).collect())
}

/// Validate (and create if needed) a `current/` directory
pub fn check_structure(dir: &Path) -> Result<()> {
    if !dir.exists() {
        if let Some(parent) = dir.parent() {
            if let Some(reason) = legacy_artifacts_in(parent, true) {
                return Err(Error::LegacyLayout {
                    path: dir.to_path_buf(),
                    reason,
                });
            }
        }

        fs::create_dir_all(dir).map_err(|e| creation_error(dir, &e))?;
        write_version(dir)?;
        info!("Created directory {:?}", dir);
        return Ok(());
    }

    if !dir.is_dir() {
        return Err(Error::DirectoryCreation {
            path: dir.to_path_buf(),
            reason: "path exists and is not a directory".to_string(),
        });
    }

    if dir.join(VERSION_FILENAME).is_file() {
        return Ok(());
    }

    if let Some(reason) = legacy_artifacts_in(dir, false) {
        return Err(Error::LegacyLayout {
            path: dir.to_path_buf(),
            reason,
        });
    }

    write_version(dir)
}

/// Look for data left by an older layout
///
/// A version marker only counts as legacy in a parent directory, where the
/// current layout never puts one.
fn legacy_artifacts_in(dir: &Path, version_is_legacy: bool) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;
    let mut has_content = false;

    for entry in entries.flatten() {
        has_content = true;
        let path = entry.path();
        let name = entry.file_name();

        if version_is_legacy && name == VERSION_FILENAME {
            return Some(format!("found {VERSION_FILENAME} in {}", dir.display()));
        }

        let is_legacy_file = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| LEGACY_EXTENSIONS.contains(&ext));
        if is_legacy_file {
            return Some(format!("found legacy data file {}", path.display()));
        }
    }

    // Inside a `current/` directory any content without a marker is legacy
    if !version_is_legacy && has_content {
        return Some(format!("{VERSION_FILENAME} missing from non-empty directory"));
    }

    None
}

fn write_version(dir: &Path) -> Result<()> {
    let path = dir.join(VERSION_FILENAME);
    fs::write(&path, format!("{CURRENT_LAYOUT_VERSION}\n")).map_err(|e| creation_error(dir, &e))
}

fn creation_error(dir: &Path, e: &io::Error) -> Error {
    Error::DirectoryCreation {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Exclusive advisory lock on a `current/` directory
///
/// Held for as long as the storage is mounted; dropping it releases the lock.
pub struct DirectoryLock {
    _lock: Flock<File>,
}

impl DirectoryLock {
    /// Take the lock, failing with `DirectoryLocked` if someone else holds it
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!("Locked {:?}", dir);
                Ok(Self { _lock: lock })
            }
            Err((_, Errno::EAGAIN)) => Err(Error::DirectoryLocked(dir.to_path_buf())),
            Err((_, errno)) => Err(Error::Io(io::Error::from(errno))),
        }
    }
}

/// Source of yes/no answers for interactive formatting
pub trait ConfirmationSource {
    /// Ask `prompt`; `Ok(false)` declines
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// Reads `Y`/`N` answers line by line
///
/// Anything other than y/n is asked again; end of input declines.
pub struct LineConfirmation<R> {
    input: R,
}

impl<R: BufRead> LineConfirmation<R> {
    pub const fn new(input: R) -> Self {
        Self { input }
    }
}

impl LineConfirmation<io::StdinLock<'static>> {
    /// Answers read from the process stdin
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock())
    }
}

impl<R: BufRead> ConfirmationSource for LineConfirmation<R> {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        loop {
            let mut stdout = io::stdout();
            write!(stdout, "{prompt} (Y or N) ")?;
            stdout.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            match line.trim() {
                "Y" | "y" => return Ok(true),
                "N" | "n" => return Ok(false),
                _ => continue,
            }
        }
    }
}

/// A named group of directories formatted under one confirmation
struct DirectoryGroup<'a> {
    name: &'static str,
    dirs: Vec<&'a Path>,
}

impl DirectoryGroup<'_> {
    fn has_data(&self) -> bool {
        self.dirs.iter().any(|dir| {
            fs::read_dir(dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false)
        })
    }
}

/// Wipe the contents of every configured directory
///
/// Journal, ledger and index directories are confirmed per group; the gc
/// metadata cache is cleared along with them without asking. Returns
/// `Ok(false)` when the operator declines or when a directory could not be
/// fully cleared. The directories themselves, and their permission bits, are
/// kept.
pub fn format(
    config: &ServerConfig,
    interactive: bool,
    force: bool,
    confirmation: &mut dyn ConfirmationSource,
) -> Result<bool> {
    let journal = config
        .journal_dirs
        .as_deref()
        .ok_or(Error::NullDirectoryList("journal"))?;
    let ledger = config
        .ledger_dirs
        .as_deref()
        .ok_or(Error::NullDirectoryList("ledger"))?;
    let index = config
        .index_dirs()
        .ok_or(Error::NullDirectoryList("index"))?;

    let groups = [
        DirectoryGroup {
            name: "journal",
            dirs: journal.iter().map(PathBuf::as_path).collect(),
        },
        DirectoryGroup {
            name: "ledger",
            dirs: ledger.iter().map(PathBuf::as_path).collect(),
        },
        DirectoryGroup {
            name: "index",
            dirs: index.iter().map(PathBuf::as_path).collect(),
        },
    ];

    for group in &groups {
        if group.has_data() {
            let proceed = if interactive && !force {
                let prompt = format!("Are you sure to format the bookie {} directories?", group.name);
                match confirmation.confirm(&prompt) {
                    Ok(answer) => answer,
                    Err(e) => {
                        error!("Failed to read format confirmation: {}", e);
                        false
                    }
                }
            } else {
                force
            };

            if !proceed {
                error!("Bookie format aborted at {} directories", group.name);
                return Ok(false);
            }
        }

        for dir in &group.dirs {
            if !clean_dir(dir) {
                error!("Formatting {} directory {:?} failed", group.name, dir);
                return Ok(false);
            }
        }
    }

    // Cached gc metadata is derived from the ledgers and goes with them
    if let Some(gc_path) = config
        .gc_entry_log_metadata_cache_path
        .as_deref()
        .filter(|path| !path.as_os_str().is_empty())
    {
        if !clean_dir(gc_path) {
            error!("Formatting gc entry log metadata directory {:?} failed", gc_path);
            return Ok(false);
        }
    }

    info!("Bookie format completed successfully");
    Ok(true)
}

/// Remove every child of `dir`, creating `dir` if it does not exist
fn clean_dir(dir: &Path) -> bool {
    if !dir.exists() {
        return match fs::create_dir_all(dir) {
            Ok(()) => true,
            Err(e) => {
                error!("Not able to create directory {:?}: {}", dir, e);
                false
            }
        };
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Not able to list directory {:?}: {}", dir, e);
            return false;
        }
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                return false;
            }
        };
        let removed = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            error!("Not able to delete {:?}: {}", path, e);
            return false;
        }
        debug!("Deleted {:?}", path);
    }
    true
}


#[cfg(test)]
mod tests {
    use super::fixtures::{DirState, Fixture, running_as_root};
    use super::*;
    use std::io::Cursor;

    fn answers(input: &str) -> LineConfirmation<Cursor<Vec<u8>>> {
        LineConfirmation::new(Cursor::new(input.as_bytes().to_vec()))
    }

    fn config_for(
        fixture: &mut Fixture,
        journal: DirState,
        ledger: DirState,
        index: DirState,
        gc: DirState,
    ) -> ServerConfig {
        let gc_path = match gc {
            DirState::Null | DirState::EmptyList => None,
            state => Some(fixture.build_one(state)),
        };
        ServerConfig {
            journal_dirs: fixture.build(journal, 3),
            ledger_dirs: fixture.build(ledger, 3),
            index_dirs: fixture.build(index, 3),
            gc_entry_log_metadata_cache_path: gc_path,
            ..ServerConfig::default()
        }
    }

    fn assert_formatted(dirs: Option<&[PathBuf]>) {
        for dir in dirs.unwrap_or_default() {
            assert!(dir.is_dir(), "{dir:?} should exist");
            assert_eq!(fs::read_dir(dir).unwrap().count(), 0, "{dir:?} should be empty");
            let meta = fs::metadata(dir).unwrap();
            assert!(!meta.permissions().readonly(), "{dir:?} should be writable");
        }
    }

    #[test]
    fn test_current_directories() {
        let dirs = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(
            current_directories(Some(&dirs)).unwrap(),
            vec![PathBuf::from("/a/current"), PathBuf::from("/b/current")]
        );
        assert!(current_directories(Some(&[])).unwrap().is_empty());
        assert!(matches!(
            current_directories(None),
            Err(Error::NullDirectoryList(_))
        ));
    }

    #[test]
    fn test_check_structure_creates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ledgers").join(CURRENT_DIR);
        check_structure(&dir).unwrap();
        assert!(dir.join(VERSION_FILENAME).is_file());
        // A second check accepts the versioned directory
        check_structure(&dir).unwrap();
    }

    #[test]
    fn test_check_structure_special_characters() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("testDir_特殊字符@#%$");
        fs::create_dir(&dir).unwrap();
        check_structure(&dir).unwrap();
        assert!(dir.exists());
    }

    #[test]
    fn test_check_structure_rejects_legacy_parent() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("oldfile.log"), b"old").unwrap();
        let err = check_structure(&root.path().join(CURRENT_DIR)).unwrap_err();
        assert!(matches!(err, Error::LegacyLayout { .. }));

        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(VERSION_FILENAME), b"2\n").unwrap();
        let err = check_structure(&root.path().join(CURRENT_DIR)).unwrap_err();
        assert!(matches!(err, Error::LegacyLayout { .. }));
    }

    #[test]
    fn test_check_structure_rejects_unversioned_content() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(CURRENT_DIR);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("0.txn"), b"journal").unwrap();
        assert!(matches!(
            check_structure(&dir),
            Err(Error::LegacyLayout { .. })
        ));
    }

    #[test]
    fn test_check_structure_rejects_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("testFile");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            check_structure(&file),
            Err(Error::DirectoryCreation { .. })
        ));
    }

    #[test]
    fn test_check_structure_creation_failure() {
        if running_as_root() {
            return;
        }
        let mut fixture = Fixture::new();
        let locked = fixture.build_one(DirState::WithLockedEmptySubdir);
        let err = check_structure(&locked.join("child").join(CURRENT_DIR)).unwrap_err();
        assert!(matches!(err, Error::DirectoryCreation { .. }));
    }

    #[test]
    fn test_check_structure_under_a_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("plainFile");
        fs::write(&file, b"data").unwrap();
        let err = check_structure(&file.join("ledgers").join(CURRENT_DIR)).unwrap_err();
        assert!(matches!(err, Error::DirectoryCreation { .. }));
        assert_eq!(fs::read(&file).unwrap(), b"data");
    }

    #[test]
    fn test_directory_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirectoryLock::acquire(dir.path()).unwrap();
        assert!(matches!(
            DirectoryLock::acquire(dir.path()),
            Err(Error::DirectoryLocked(_))
        ));
        drop(lock);
        DirectoryLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn test_format_confirmed_clears_everything() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::WithFile,
            DirState::WithSubdirAndFile,
            DirState::WithSubdirAndFile,
            DirState::WithSubdirAndFile,
        );

        assert!(format(&config, true, false, &mut answers("Y\nY\nY\n")).unwrap());
        assert_formatted(config.journal_dirs.as_deref());
        assert_formatted(config.ledger_dirs.as_deref());
        assert_formatted(config.index_dirs());
        assert_formatted(config.gc_entry_log_metadata_cache_path.as_slice().into());
    }

    #[test]
    fn test_format_declined() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::WithSubdirAndFile,
            DirState::WithFile,
            DirState::EmptyList,
            DirState::NonExistent,
        );

        assert!(!format(&config, true, false, &mut answers("N\n")).unwrap());
        let journal = &config.journal_dirs.as_ref().unwrap()[0];
        assert!(journal.join("subdir").join("file.txt").exists());
    }

    #[test]
    fn test_format_reprompts_on_garbage_and_declines_on_eof() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::WithFile,
            DirState::WithFile,
            DirState::EmptyList,
            DirState::EmptyList,
        );
        // "maybe" is re-asked, journal accepted, ledger hits end of input
        assert!(!format(&config, true, false, &mut answers("maybe\ny\n")).unwrap());
        assert_formatted(config.journal_dirs.as_deref());
    }

    #[test]
    fn test_format_non_interactive_requires_force() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::WithFile,
            DirState::WithFile,
            DirState::WithFile,
            DirState::EmptyList,
        );
        assert!(!format(&config, false, false, &mut answers("")).unwrap());
        assert!(format(&config, false, true, &mut answers("")).unwrap());
        assert_formatted(config.ledger_dirs.as_deref());
    }

    #[test]
    fn test_format_creates_missing_dirs() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::NonExistent,
            DirState::NonExistent,
            DirState::EmptyList,
            DirState::NonExistent,
        );
        assert!(format(&config, true, false, &mut answers("")).unwrap());
        assert_formatted(config.journal_dirs.as_deref());
    }

    #[test]
    fn test_format_empty_lists() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::EmptyList,
            DirState::EmptyList,
            DirState::EmptyList,
            DirState::EmptyList,
        );
        assert!(format(&config, true, true, &mut answers("Y\n")).unwrap());
    }

    #[test]
    fn test_format_null_group_is_an_error() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::Null,
            DirState::EmptyList,
            DirState::Null,
            DirState::EmptyList,
        );
        assert!(matches!(
            format(&config, false, false, &mut answers("Y\n")),
            Err(Error::NullDirectoryList(_))
        ));
    }

    #[test]
    fn test_format_locked_dirs_report_false() {
        if running_as_root() {
            return;
        }
        for state in [DirState::WithLockedFile, DirState::WithLockedEmptySubdir] {
            let mut fixture = Fixture::new();
            let config = config_for(&mut fixture, state, state, state, DirState::EmptyList);
            assert!(!format(&config, false, true, &mut answers("")).unwrap());
            let journal = &config.journal_dirs.as_ref().unwrap()[0];
            assert!(fs::read_dir(journal).is_ok_and(|mut e| e.next().is_some()));
        }
    }

    #[test]
    fn test_format_unlistable_dir_reports_false() {
        let mut fixture = Fixture::new();
        let mut config = config_for(
            &mut fixture,
            DirState::WithFile,
            DirState::WithFile,
            DirState::EmptyList,
            DirState::EmptyList,
        );
        let file = fixture.build_one(DirState::WithFile).join("file.txt");
        config.ledger_dirs.as_mut().unwrap().push(file.clone());

        assert!(!format(&config, false, true, &mut answers("")).unwrap());
        assert_eq!(fs::read(&file).unwrap(), b"data");
    }

    #[test]
    fn test_format_clears_gc_path_without_asking() {
        let mut fixture = Fixture::new();
        let config = config_for(
            &mut fixture,
            DirState::EmptyList,
            DirState::EmptyList,
            DirState::EmptyList,
            DirState::WithSubdirAndFile,
        );
        assert!(format(&config, true, false, &mut answers("")).unwrap());
        assert_formatted(config.gc_entry_log_metadata_cache_path.as_slice().into());
    }

    #[test]
    fn test_format_gc_path_failure_reports_false() {
        let mut fixture = Fixture::new();
        let mut config = config_for(
            &mut fixture,
            DirState::WithFile,
            DirState::EmptyList,
            DirState::EmptyList,
            DirState::EmptyList,
        );
        let file = fixture.build_one(DirState::WithFile).join("file.txt");
        config.gc_entry_log_metadata_cache_path = Some(file.clone());

        assert!(!format(&config, true, false, &mut answers("Y\n")).unwrap());
        assert_formatted(config.journal_dirs.as_deref());
        assert_eq!(fs::read(&file).unwrap(), b"data");
    }
}
