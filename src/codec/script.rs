//! Launcher script codec.
//!
//! A launcher script is a Windows batch file whose single consequential
//! line starts the game client with the account credentials as arguments:
//!
//! ```text
//! chcp 65001
//! start elementclient.exe startbypatcher user:alice pwd:secret role:Mage
//! :: Owner: Bob
//! :: Description: main crafter
//! ```
//!
//! Argument values are written bare unless they contain whitespace or a
//! batch metacharacter, in which case they are quoted as `key:"value"`.
//! `%` is always doubled so the batch interpreter passes it through.

use crate::models::account::Account;
use crate::{AppError, Result};

use super::cp1251;

/// Marker argument the client expects before the credential tokens.
pub const PATCHER_MARKER: &str = "startbypatcher";

const CODE_PAGE_LINE: &str = "chcp 65001";
const LOGIN_KEY: &str = "user";
const PASSWORD_KEY: &str = "pwd";
const CHARACTER_KEY: &str = "role";
const OWNER_COMMENT: &str = "Owner:";
const DESCRIPTION_COMMENT: &str = "Description:";

/// Decoded launcher script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherScript {
    /// Account fields recovered from the arguments and comments.
    pub account: Account,
    /// Client executable as written in the script.
    pub client_path: String,
}

/// Credential arguments in their fixed order.
fn credential_pairs(account: &Account) -> Vec<(&'static str, &str)> {
    let mut pairs = vec![
        (LOGIN_KEY, account.login.as_str()),
        (PASSWORD_KEY, account.password.as_str()),
    ];
    if let Some(name) = account.character_name.as_deref().filter(|n| !n.is_empty()) {
        pairs.push((CHARACTER_KEY, name));
    }
    pairs
}

/// Arguments passed to the client process for `account`.
///
/// These are the same tokens [`encode`] writes, before batch quoting.
#[must_use]
pub fn client_arguments(account: &Account) -> Vec<String> {
    let mut args = vec![PATCHER_MARKER.to_owned()];
    args.extend(
        credential_pairs(account)
            .into_iter()
            .map(|(key, value)| format!("{key}:{value}")),
    );
    args
}

/// Render a launcher script for `account`.
///
/// Output is deterministic: the same inputs always yield identical text.
#[must_use]
pub fn encode(account: &Account, client_path: &str) -> String {
    let mut out = String::new();
    out.push_str(CODE_PAGE_LINE);
    out.push('\n');

    out.push_str("start ");
    if client_path.is_empty() || needs_quotes(client_path) {
        // A leading quoted argument to `start` is the window title.
        out.push_str("\"\" ");
    }
    out.push_str(&render_value(client_path));
    out.push(' ');
    out.push_str(PATCHER_MARKER);
    for (key, value) in credential_pairs(account) {
        out.push(' ');
        out.push_str(key);
        out.push(':');
        out.push_str(&render_value(value));
    }
    out.push('\n');

    if let Some(owner) = account.owner.as_deref().filter(|o| !o.is_empty()) {
        out.push_str(&format!(":: {OWNER_COMMENT} {owner}\n"));
    }
    if let Some(description) = account.description.as_deref().filter(|d| !d.is_empty()) {
        out.push_str(&format!(":: {DESCRIPTION_COMMENT} {description}\n"));
    }

    out
}

/// Decode a launcher script into account fields.
///
/// # Errors
///
/// Returns `AppError::MalformedScript` if the client invocation or its
/// credential arguments are missing or out of place.
pub fn decode(text: &str) -> Result<Account> {
    parse(text).map(|script| script.account)
}

/// Decode raw script bytes, accepting UTF-8 or Windows-1251.
///
/// # Errors
///
/// Returns `AppError::MalformedScript` if the bytes are in neither encoding
/// or the text does not decode.
pub fn decode_bytes(bytes: &[u8]) -> Result<LauncherScript> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => cp1251::decode(bytes)
            .ok_or_else(|| AppError::MalformedScript("unsupported text encoding".into()))?,
    };
    parse(&text)
}

/// Decode a launcher script, keeping the client path.
///
/// # Errors
///
/// Returns `AppError::MalformedScript` on any grammar violation.
pub fn parse(text: &str) -> Result<LauncherScript> {
    let mut command: Option<(usize, &str)> = None;
    let mut owner = None;
    let mut description = None;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if let Some(comment) = line.strip_prefix("::") {
            let comment = comment.trim();
            if let Some(value) = comment.strip_prefix(OWNER_COMMENT) {
                owner = non_empty(value.trim());
            } else if let Some(value) = comment.strip_prefix(DESCRIPTION_COMMENT) {
                description = non_empty(value.trim());
            }
            continue;
        }
        if is_inert(line) {
            continue;
        }
        if let Some((first, _)) = command {
            return Err(AppError::MalformedScript(format!(
                "unexpected command on line {} (client invocation already on line {})",
                index + 1,
                first + 1
            )));
        }
        command = Some((index, line));
    }

    let Some((_, line)) = command else {
        return Err(AppError::MalformedScript(
            "no client invocation found".into(),
        ));
    };

    let (client_path, mut account) = parse_invocation(line)?;
    account.owner = owner;
    account.description = description;
    Ok(LauncherScript {
        account,
        client_path,
    })
}

/// Lines that carry no behaviour: blanks, remarks, code page and echo
/// switches, directory changes.
fn is_inert(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.is_empty()
        || lower == "rem"
        || lower.starts_with("rem ")
        || lower == "chcp"
        || lower.starts_with("chcp ")
        || lower.starts_with("@echo ")
        || lower.starts_with("echo off")
        || lower == "cd"
        || lower.starts_with("cd ")
        || lower == "exit"
}

fn parse_invocation(line: &str) -> Result<(String, Account)> {
    let tokens = tokenize(line)?;
    let mut rest = tokens.iter().map(String::as_str).peekable();

    if rest.peek().is_some_and(|t| t.eq_ignore_ascii_case("start")) {
        rest.next();
        if rest.peek().is_some_and(|t| t.is_empty()) {
            rest.next();
        }
    }

    let client_path = match rest.next() {
        Some(token) if !has_key(token, LOGIN_KEY) => token.to_owned(),
        _ => {
            return Err(AppError::MalformedScript(
                "client executable missing before credentials".into(),
            ))
        }
    };

    if rest
        .peek()
        .is_some_and(|t| t.eq_ignore_ascii_case(PATCHER_MARKER))
    {
        rest.next();
    }

    let login = rest
        .next()
        .and_then(|t| value_of(t, LOGIN_KEY))
        .ok_or_else(|| AppError::MalformedScript("login argument not found".into()))?;
    if login.is_empty() {
        return Err(AppError::MalformedScript("login argument is empty".into()));
    }

    let password = rest
        .next()
        .and_then(|t| value_of(t, PASSWORD_KEY))
        .ok_or_else(|| AppError::MalformedScript("password argument not found".into()))?;

    let mut account = Account::new(login, password);
    if let Some(token) = rest.next() {
        let name = value_of(token, CHARACTER_KEY).ok_or_else(|| {
            AppError::MalformedScript(format!("unexpected argument '{token}'"))
        })?;
        account.character_name = non_empty(name);
    }

    if let Some(extra) = rest.next() {
        return Err(AppError::MalformedScript(format!(
            "unexpected trailing argument '{extra}'"
        )));
    }

    Ok((client_path, account))
}

fn has_key(token: &str, key: &str) -> bool {
    value_of(token, key).is_some()
}

fn value_of<'a>(token: &'a str, key: &str) -> Option<&'a str> {
    token.strip_prefix(key)?.strip_prefix(':')
}

/// Split a command line on whitespace outside double quotes.
///
/// Quote characters are dropped and `%%` collapses to `%`. An empty quoted
/// token (`""`) is preserved as an empty string.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current: Option<String> = None;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.get_or_insert_with(String::new);
            }
            '%' if chars.peek() == Some(&'%') => {
                chars.next();
                current.get_or_insert_with(String::new).push('%');
            }
            c if c.is_whitespace() && !in_quotes => {
                if let Some(token) = current.take() {
                    tokens.push(token);
                }
            }
            c => current.get_or_insert_with(String::new).push(c),
        }
    }

    if in_quotes {
        return Err(AppError::MalformedScript("unterminated quote".into()));
    }
    if let Some(token) = current {
        tokens.push(token);
    }
    Ok(tokens)
}

fn needs_quotes(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '&' | '|' | '<' | '>' | '^' | '(' | ')'))
}

fn render_value(value: &str) -> String {
    let escaped = value.replace('%', "%%");
    if value.is_empty() || needs_quotes(value) {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}
