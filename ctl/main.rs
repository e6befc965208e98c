#![forbid(unsafe_code)]

//! `pw-session-ctl`: local CLI companion for `pw-session-engine`.
//!
//! Connects to the IPC socket and sends JSON commands to the daemon.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "pw-session-ctl",
    about = "Local CLI for pw-session-engine",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "pw-session-engine")]
    ipc_name: String,

    /// Print the raw JSON response instead of a per-login breakdown.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List running clients.
    List,

    /// Launch clients for the given accounts.
    Launch {
        /// Account logins.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        logins: Vec<String>,
        /// Launch every account in the account file.
        #[arg(long)]
        all: bool,
    },

    /// Close running clients.
    Close {
        /// Account logins.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        logins: Vec<String>,
        /// Close every running client.
        #[arg(long)]
        all: bool,
    },

    /// Import accounts from launcher scripts in a folder.
    Import {
        /// Folder to scan; defaults to the daemon's game directory.
        dir: Option<PathBuf>,
    },

    /// Write the launcher script for one account.
    Script {
        /// Account login.
        login: String,
    },
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::List => serde_json::json!({ "command": "list" }),
        Command::Launch { logins, all } => {
            serde_json::json!({ "command": "launch", "logins": logins, "all": all })
        }
        Command::Close { logins, all } => {
            serde_json::json!({ "command": "close", "logins": logins, "all": all })
        }
        Command::Import { dir } => {
            let mut req = serde_json::json!({ "command": "import" });
            if let Some(d) = dir {
                req["dir"] = serde_json::Value::String(d.to_string_lossy().into_owned());
            }
            req
        }
        Command::Script { login } => {
            serde_json::json!({ "command": "script", "login": login })
        }
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    match obj.get("data") {
                        Some(data) if args.json => {
                            println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                        }
                        Some(data) => {
                            if !print_summary(&args.command, data) {
                                std::process::exit(2);
                            }
                        }
                        None => println!("OK"),
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is pw-session-engine running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Print a human-readable view of `data`. Returns `false` when any
/// per-login outcome failed.
fn print_summary(command: &Command, data: &serde_json::Value) -> bool {
    match command {
        Command::List => {
            let sessions = data
                .get("sessions")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .unwrap_or_default();
            if sessions.is_empty() {
                println!("no running clients");
            }
            for s in &sessions {
                println!(
                    "{:<24} pid {:<8} since {}",
                    s.get("account_login").and_then(|v| v.as_str()).unwrap_or("?"),
                    s.get("process_id").and_then(serde_json::Value::as_u64).unwrap_or(0),
                    s.get("started_at").and_then(|v| v.as_str()).unwrap_or("?"),
                );
            }
            true
        }
        Command::Launch { .. } | Command::Close { .. } => {
            let rows = data
                .get("outcomes")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut failed = 0usize;
            for row in &rows {
                let login = row.get("login").and_then(|v| v.as_str()).unwrap_or("?");
                if row.get("ok").and_then(serde_json::Value::as_bool) == Some(true) {
                    let detail = match row.get("value") {
                        Some(serde_json::Value::String(status)) => status.clone(),
                        Some(value) => value
                            .get("process_id")
                            .and_then(serde_json::Value::as_u64)
                            .map_or_else(String::new, |pid| format!("pid {pid}")),
                        None => String::new(),
                    };
                    println!("ok    {login:<24} {detail}");
                } else {
                    failed += 1;
                    let error = row.get("error").and_then(|v| v.as_str()).unwrap_or("failed");
                    println!("FAIL  {login:<24} {error}");
                }
            }
            println!("{} succeeded, {failed} failed", rows.len() - failed);
            failed == 0
        }
        Command::Import { .. } => {
            let imported = data
                .get("imported")
                .and_then(serde_json::Value::as_array)
                .map_or(0, Vec::len);
            println!(
                "imported {imported}, duplicates {}, unreadable {}",
                data.get("duplicates").and_then(serde_json::Value::as_u64).unwrap_or(0),
                data.get("unreadable").and_then(serde_json::Value::as_u64).unwrap_or(0),
            );
            true
        }
        Command::Script { .. } => {
            println!(
                "{} -> {}",
                data.get("login").and_then(|v| v.as_str()).unwrap_or("?"),
                data.get("path").and_then(|v| v.as_str()).unwrap_or("?"),
            );
            true
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
