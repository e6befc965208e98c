//! Launcher script folders: import, write and remove scripts.
//!
//! [`ScriptFolder::entries`] walks the top level of a folder lazily and
//! decodes every `.bat`/`.cmd` file it meets; calling it again restarts the
//! walk. [`scan`] builds an import report on top of it, skipping scripts
//! that do not decode and logins that are already known.

use std::collections::HashSet;
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::codec::script::{decode_bytes, encode, LauncherScript};
use crate::models::account::Account;
use crate::{AppError, Result};

const SCRIPT_PATTERNS: [&str; 2] = ["*.bat", "*.cmd"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// File name used for an account's launcher script.
///
/// Characters other than letters, digits, `_` and `-` become `_`.
#[must_use]
pub fn script_file_name(login: &str) -> String {
    let safe: String = login
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("account_{safe}.bat")
}

/// A directory holding launcher scripts.
#[derive(Debug, Clone)]
pub struct ScriptFolder {
    root: PathBuf,
    patterns: Vec<Pattern>,
}

impl ScriptFolder {
    /// Wrap `root`. Nothing is read until [`entries`](Self::entries).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: SCRIPT_PATTERNS
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
        }
    }

    /// Folder path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh walk over the folder's scripts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the folder cannot be opened.
    pub fn entries(&self) -> Result<ScriptEntries<'_>> {
        let dir = fs::read_dir(&self.root).map_err(|err| {
            AppError::Io(format!("cannot read {}: {err}", self.root.display()))
        })?;
        Ok(ScriptEntries { folder: self, dir })
    }

    fn is_script(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns
            .iter()
            .any(|p| p.matches_with(name, MATCH_OPTIONS))
            && path.is_file()
    }

    /// Write the launcher script for `account`.
    ///
    /// An existing script for the same login is replaced. If the default
    /// file name is taken by another login's script, a unique name is used.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an invalid account, or
    /// `AppError::Io` if the file cannot be written.
    pub fn write(&self, account: &Account, client_executable: &str) -> Result<PathBuf> {
        account.validate()?;

        let mut path = self.root.join(script_file_name(&account.login));
        if path.exists() && !script_belongs_to(&path, &account.login) {
            let suffix = Uuid::new_v4().simple().to_string();
            path = self
                .root
                .join(format!("account_{}.bat", &suffix[..8]));
        }

        fs::write(&path, encode(account, client_executable))
            .map_err(|err| AppError::Io(format!("cannot write {}: {err}", path.display())))?;
        info!(login = %account.login, path = %path.display(), "launcher script written");
        Ok(path)
    }

    /// Delete every script in the folder that launches `login`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the folder cannot be read or a matching
    /// script cannot be removed.
    pub fn remove_for(&self, login: &str) -> Result<usize> {
        let doomed: Vec<PathBuf> = self
            .entries()?
            .filter(|entry| {
                entry
                    .script
                    .as_ref()
                    .is_ok_and(|s| s.account.login == login)
            })
            .map(|entry| entry.path)
            .collect();

        for path in &doomed {
            fs::remove_file(path).map_err(|err| {
                AppError::Io(format!("cannot remove {}: {err}", path.display()))
            })?;
            info!(login, path = %path.display(), "launcher script removed");
        }
        Ok(doomed.len())
    }
}

fn script_belongs_to(path: &Path, login: &str) -> bool {
    fs::read(path)
        .ok()
        .and_then(|bytes| decode_bytes(&bytes).ok())
        .is_some_and(|script| script.account.login == login)
}

/// One script file and its decode result.
#[derive(Debug)]
pub struct ScriptEntry {
    /// Script path.
    pub path: PathBuf,
    /// Decoded script or the reason it could not be read.
    pub script: Result<LauncherScript>,
}

/// Lazy walk over a [`ScriptFolder`].
#[derive(Debug)]
pub struct ScriptEntries<'a> {
    folder: &'a ScriptFolder,
    dir: ReadDir,
}

impl Iterator for ScriptEntries<'_> {
    type Item = ScriptEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let path = match self.dir.next()? {
                Ok(entry) => entry.path(),
                Err(err) => {
                    return Some(ScriptEntry {
                        path: self.folder.root.clone(),
                        script: Err(AppError::Io(format!("directory entry unreadable: {err}"))),
                    })
                }
            };
            if !self.folder.is_script(&path) {
                continue;
            }

            let script = fs::read(&path)
                .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))
                .and_then(|bytes| decode_bytes(&bytes));
            return Some(ScriptEntry { path, script });
        }
    }
}

/// Outcome of importing a script folder.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    /// Newly discovered accounts, in directory order.
    pub imported: Vec<Account>,
    /// Scripts skipped because their login was already known.
    pub duplicates: usize,
    /// Scripts skipped because they could not be read or decoded.
    pub unreadable: usize,
}

/// Decode every script in `dir`, keeping accounts whose login is not in
/// `existing_logins`.
///
/// A login seen twice within the folder counts as a duplicate after its
/// first occurrence.
///
/// # Errors
///
/// Returns `AppError::Io` if the folder cannot be opened. Individual
/// unreadable scripts are counted, not reported as errors.
pub fn scan(dir: &Path, existing_logins: &HashSet<String>) -> Result<ImportReport> {
    let _span = info_span!("scan", dir = %dir.display()).entered();

    let folder = ScriptFolder::new(dir);
    let mut seen = existing_logins.clone();
    let mut report = ImportReport::default();

    for entry in folder.entries()? {
        match entry.script {
            Ok(script) => {
                if seen.insert(script.account.login.clone()) {
                    report.imported.push(script.account);
                } else {
                    debug!(login = %script.account.login, path = %entry.path.display(), "duplicate login skipped");
                    report.duplicates += 1;
                }
            }
            Err(err) => {
                debug!(path = %entry.path.display(), %err, "unreadable script skipped");
                report.unreadable += 1;
            }
        }
    }

    info!(
        imported = report.imported.len(),
        duplicates = report.duplicates,
        unreadable = report.unreadable,
        "script folder scanned"
    );
    Ok(report)
}
