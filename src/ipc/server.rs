//! Local IPC server for `pw-session-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the session engine.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "launch", "logins": ["alice", "bob"]}
//! {"command": "launch", "all": true}
//! {"command": "close", "logins": ["alice"]}
//! {"command": "import", "dir": "C:/Games/PerfectWorld/element"}
//! {"command": "script", "login": "alice"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not running: alice"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::importer::{self, ScriptFolder};
use crate::models::account::Account;
use crate::orchestrator::bulk::{BulkCoordinator, BulkOutcome, OutcomeRow};
use crate::orchestrator::registry::SessionRegistry;
use crate::persistence::account_book::AccountBook;
use crate::{AppError, Result};

/// Shared state behind every IPC connection.
pub struct EngineState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Bulk coordinator (and through it the launcher and registry).
    pub bulk: BulkCoordinator,
    /// Serializes read-modify-write cycles on the account file.
    book_lock: Mutex<()>,
}

impl EngineState {
    /// Bundle the engine components served over IPC.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, bulk: BulkCoordinator) -> Self {
        Self {
            config,
            bulk,
            book_lock: Mutex::new(()),
        }
    }

    /// Session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        self.bulk.launcher().registry()
    }

    fn game_directory(&self) -> Result<PathBuf> {
        self.config.game_directory.clone().ok_or_else(|| {
            AppError::GameClientNotFound("game_directory is not configured".into())
        })
    }

    fn load_book(&self) -> Result<AccountBook> {
        AccountBook::load(&self.config.accounts_file)
    }
}

/// Inbound IPC request from `pw-session-ctl`.
#[derive(Debug, Default, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Target logins (for `launch`, `close`).
    #[serde(default)]
    logins: Vec<String>,
    /// Target every account (`launch`) or every running client (`close`).
    #[serde(default)]
    all: bool,
    /// Folder to import from; defaults to the game directory.
    dir: Option<PathBuf>,
    /// Single login (for `script`).
    login: Option<String>,
}

/// Outbound IPC response to `pw-session-ctl`.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<serde_json::Value>> for IpcResponse {
    fn from(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<EngineState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<EngineState>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(request, &state).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the engine.
async fn dispatch_command(request: IpcRequest, state: &EngineState) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async move {
        let command = request.command.clone();
        let result = match command.as_str() {
            "list" => handle_list(state),
            "launch" => handle_launch(request, state).await,
            "close" => handle_close(request, state).await,
            "import" => handle_import(request, state).await,
            "script" => handle_script(request, state).await,
            other => return IpcResponse::error(format!("unknown command: {other}")),
        };
        if let Err(ref err) = result {
            warn!(%err, "ipc command failed");
        }
        IpcResponse::from(result)
    }
    .instrument(span)
    .await
}

/// Running sessions, sorted by login.
fn handle_list(state: &EngineState) -> Result<serde_json::Value> {
    let sessions = state.registry().list_running();
    Ok(serde_json::json!({ "sessions": serde_json::to_value(sessions)? }))
}

/// Launch the listed accounts, or every account in the book.
async fn handle_launch(request: IpcRequest, state: &EngineState) -> Result<serde_json::Value> {
    let game_directory = state.game_directory()?;
    let book = state.load_book()?;

    let wanted: Vec<std::result::Result<Account, String>> = if request.all {
        book.accounts().iter().cloned().map(Ok).collect()
    } else if request.logins.is_empty() {
        return Err(AppError::Validation("no logins given".into()));
    } else {
        request
            .logins
            .into_iter()
            .map(|login| book.find(&login).cloned().ok_or(login))
            .collect()
    };

    let accounts: Vec<Account> = wanted.iter().filter_map(|w| w.as_ref().ok().cloned()).collect();
    let mut launched = state
        .bulk
        .launch_many(accounts, game_directory)
        .await
        .into_iter();

    // Unknown logins keep their slot in the requested order.
    let rows: Vec<OutcomeRow<_>> = wanted
        .into_iter()
        .filter_map(|w| match w {
            Ok(_) => launched.next(),
            Err(login) => Some(BulkOutcome {
                result: Err(AppError::Validation(format!("unknown account: {login}"))),
                login,
            }),
        })
        .map(OutcomeRow::from)
        .collect();

    Ok(serde_json::json!({ "outcomes": serde_json::to_value(rows)? }))
}

/// Close the listed logins, or every running client.
async fn handle_close(request: IpcRequest, state: &EngineState) -> Result<serde_json::Value> {
    let outcomes = if request.all {
        state.bulk.close_all().await
    } else if request.logins.is_empty() {
        return Err(AppError::Validation("no logins given".into()));
    } else {
        state.bulk.close_many(request.logins).await
    };

    let rows: Vec<OutcomeRow<_>> = outcomes.into_iter().map(OutcomeRow::from).collect();
    Ok(serde_json::json!({ "outcomes": serde_json::to_value(rows)? }))
}

/// Import scripts from a folder into the account book.
async fn handle_import(request: IpcRequest, state: &EngineState) -> Result<serde_json::Value> {
    let dir = match request.dir {
        Some(dir) => dir,
        None => state.game_directory()?,
    };

    let _book_guard = state.book_lock.lock().await;
    let mut book = state.load_book()?;
    let existing = book.logins();

    let report = tokio::task::spawn_blocking(move || importer::scan(&dir, &existing))
        .await
        .map_err(|err| AppError::Io(format!("import task failed: {err}")))??;

    let logins: Vec<String> = report.imported.iter().map(|a| a.login.clone()).collect();
    let added = book.merge(report.imported);
    if added > 0 {
        book.save()?;
    }

    Ok(serde_json::json!({
        "imported": logins,
        "duplicates": report.duplicates,
        "unreadable": report.unreadable,
    }))
}

/// Write the launcher script for one account into the game directory.
async fn handle_script(request: IpcRequest, state: &EngineState) -> Result<serde_json::Value> {
    let Some(login) = request.login else {
        return Err(AppError::Validation("missing required 'login' field".into()));
    };
    let game_directory = state.game_directory()?;
    let account = state
        .load_book()?
        .find(&login)
        .cloned()
        .ok_or_else(|| AppError::Validation(format!("unknown account: {login}")))?;
    let executable = state.config.client_executable.clone();

    let path = tokio::task::spawn_blocking(move || {
        ScriptFolder::new(game_directory).write(&account, &executable)
    })
    .await
    .map_err(|err| AppError::Io(format!("script task failed: {err}")))??;

    Ok(serde_json::json!({ "login": login, "path": path }))
}
