//! JSON account list shared with the account editor.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::models::account::Account;
use crate::{AppError, Result};

/// Ordered account list backed by a JSON file.
#[derive(Debug, Clone)]
pub struct AccountBook {
    path: PathBuf,
    accounts: Vec<Account>,
}

impl AccountBook {
    /// Load the book at `path`. A missing file is an empty book.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let accounts = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                AppError::Io(format!("invalid account file {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "cannot read account file {}: {err}",
                    path.display()
                )))
            }
        };
        Ok(Self { path, accounts })
    }

    /// Write the book back to its file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.accounts)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Io(format!(
                    "cannot create account directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        fs::write(&self.path, json).map_err(|err| {
            AppError::Io(format!(
                "cannot write account file {}: {err}",
                self.path.display()
            ))
        })
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All accounts in stored order.
    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Look up an account by login.
    #[must_use]
    pub fn find(&self, login: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.login == login)
    }

    /// Set of known logins.
    #[must_use]
    pub fn logins(&self) -> HashSet<String> {
        self.accounts.iter().map(|a| a.login.clone()).collect()
    }

    /// Append accounts whose login is not yet present. Returns how many
    /// were added.
    pub fn merge(&mut self, incoming: Vec<Account>) -> usize {
        let mut known = self.logins();
        let before = self.accounts.len();
        for account in incoming {
            if known.insert(account.login.clone()) {
                self.accounts.push(account);
            }
        }
        let added = self.accounts.len() - before;
        if added > 0 {
            info!(added, path = %self.path.display(), "accounts merged");
        }
        added
    }
}
