//! Account record supplied by the account book.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

use super::empty_string_as_none;

const LOGIN_MIN: usize = 3;
const LOGIN_MAX: usize = 50;
const PASSWORD_MAX: usize = 100;
const CHARACTER_MAX: usize = 50;
const DESCRIPTION_MAX: usize = 200;
const OWNER_MAX: usize = 50;

/// Game account credentials plus operator notes.
///
/// `login` is the join key for every session the engine tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Account {
    /// Unique login within the account set.
    pub login: String,
    /// Password in clear form; passed to the client as an argument.
    pub password: String,
    /// Character selected automatically after login.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub character_name: Option<String>,
    /// Free-text note.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub description: Option<String>,
    /// Free-text owner label.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub owner: Option<String>,
}

impl Account {
    /// Construct an account with no optional fields.
    #[must_use]
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            character_name: None,
            description: None,
            owner: None,
        }
    }

    /// Set the auto-selected character.
    #[must_use]
    pub fn with_character(mut self, name: impl Into<String>) -> Self {
        self.character_name = non_empty(name.into());
        self
    }

    /// Set the owner label.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = non_empty(owner.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = non_empty(description.into());
        self
    }

    /// Check field lengths and character sets.
    ///
    /// Accounts that pass are guaranteed to survive a launcher-script
    /// round trip unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let login_len = self.login.chars().count();
        if login_len < LOGIN_MIN {
            return Err(AppError::Validation(format!(
                "login must be at least {LOGIN_MIN} characters"
            )));
        }
        if login_len > LOGIN_MAX {
            return Err(AppError::Validation(format!(
                "login must be at most {LOGIN_MAX} characters"
            )));
        }
        if !self
            .login
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(AppError::Validation(
                "login may only contain letters, digits, '_', '-' and '.'".into(),
            ));
        }

        if self.password.is_empty() {
            return Err(AppError::Validation("password is required".into()));
        }
        if self.password.chars().count() > PASSWORD_MAX {
            return Err(AppError::Validation(format!(
                "password must be at most {PASSWORD_MAX} characters"
            )));
        }
        check_argument_text("password", &self.password)?;

        if let Some(ref name) = self.character_name {
            if name.chars().count() > CHARACTER_MAX {
                return Err(AppError::Validation(format!(
                    "character name must be at most {CHARACTER_MAX} characters"
                )));
            }
            check_argument_text("character name", name)?;
        }

        if let Some(ref description) = self.description {
            if description.chars().count() > DESCRIPTION_MAX {
                return Err(AppError::Validation(format!(
                    "description must be at most {DESCRIPTION_MAX} characters"
                )));
            }
            check_single_line("description", description)?;
        }

        if let Some(ref owner) = self.owner {
            if owner.chars().count() > OWNER_MAX {
                return Err(AppError::Validation(format!(
                    "owner must be at most {OWNER_MAX} characters"
                )));
            }
            check_single_line("owner", owner)?;
        }

        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Values embedded as client arguments cannot hold quotes or control bytes.
fn check_argument_text(field: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c == '"' || c.is_control()) {
        return Err(AppError::Validation(format!(
            "{field} must not contain quotes or control characters"
        )));
    }
    Ok(())
}

/// Comment values are stored trimmed, so edge whitespace would not survive.
fn check_single_line(field: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(AppError::Validation(format!(
            "{field} must be a single line"
        )));
    }
    if value.trim() != value {
        return Err(AppError::Validation(format!(
            "{field} must not start or end with whitespace"
        )));
    }
    Ok(())
}
