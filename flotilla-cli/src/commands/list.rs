//! `flotilla list` — registered clusters and their runtime state.
//!
//! With a running daemon the listing merges the live registry with a fresh
//! runtime-state snapshot. Without one it falls back to the persisted
//! document, read-only, with every status reported as `unknown`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use flotilla_core::{store, ClusterId, ClusterModel, ConnectionStatus, RuntimeState};
use flotilla_daemon::{request_all_states, request_list, DaemonError};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

struct ClusterRow {
    model: ClusterModel,
    /// `None` when the daemon was unreachable and no state is known.
    state: Option<RuntimeState>,
}

#[derive(Serialize)]
struct ClusterRowJson {
    id: String,
    name: String,
    connection_uri: String,
    color: Option<String>,
    favorite: bool,
    status: String,
    server_version: Option<String>,
}

#[derive(Tabled)]
struct ListTableRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "uri")]
    uri: String,
    #[tabled(rename = "fav")]
    favorite: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let rows = match fetch_live(&home) {
            Ok(rows) => rows,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                eprintln!(
                    "{}",
                    "daemon not running; showing persisted document only".yellow()
                );
                fetch_offline(&home)?
            }
            Err(err) => return Err(err).context("failed to query daemon"),
        };

        if self.json {
            print_json(rows)?;
            return Ok(());
        }

        print_table(rows);
        Ok(())
    }
}

fn fetch_live(home: &Path) -> Result<Vec<ClusterRow>, DaemonError> {
    let models = request_list(home)?;
    let states: HashMap<ClusterId, RuntimeState> = request_all_states(home)?
        .into_iter()
        .map(|entry| (entry.id, entry.state))
        .collect();

    Ok(models
        .into_iter()
        .map(|model| {
            let state = states.get(&model.id).cloned();
            ClusterRow { model, state }
        })
        .collect())
}

fn fetch_offline(home: &Path) -> Result<Vec<ClusterRow>> {
    let document = store::load_at(home).context("failed to load cluster document")?;
    Ok(document
        .clusters
        .into_iter()
        .map(|model| ClusterRow { model, state: None })
        .collect())
}

fn status_key(state: &Option<RuntimeState>) -> &'static str {
    match state {
        None => "unknown",
        Some(state) => match state.status {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        },
    }
}

fn status_cell(state: &Option<RuntimeState>) -> String {
    match state {
        None => "unknown".bright_black().to_string(),
        Some(state) => match state.status {
            ConnectionStatus::Disconnected => "disconnected".bright_black().to_string(),
            ConnectionStatus::Connecting => "connecting".yellow().to_string(),
            ConnectionStatus::Connected => "connected".green().bold().to_string(),
        },
    }
}

fn print_json(rows: Vec<ClusterRow>) -> Result<()> {
    let payload: Vec<ClusterRowJson> = rows
        .into_iter()
        .map(|row| ClusterRowJson {
            status: status_key(&row.state).to_string(),
            server_version: row.state.and_then(|s| s.server_version),
            id: row.model.id.0,
            name: row.model.name,
            connection_uri: row.model.connection_uri,
            color: row.model.color,
            favorite: row.model.favorite,
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize cluster list")?
    );
    Ok(())
}

fn print_table(rows: Vec<ClusterRow>) {
    let connected = rows
        .iter()
        .filter(|row| {
            matches!(
                row.state.as_ref().map(|s| s.status),
                Some(ConnectionStatus::Connected)
            )
        })
        .count();
    println!(
        "Flotilla v{} | {} clusters | {} connected",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        connected,
    );

    if rows.is_empty() {
        println!("No clusters registered. Run 'flotilla add' to register one.");
        return;
    }

    let table_rows: Vec<ListTableRow> = rows
        .into_iter()
        .map(|row| ListTableRow {
            status: status_cell(&row.state),
            id: row.model.id.0,
            name: row.model.name,
            uri: row.model.connection_uri,
            favorite: if row.model.favorite {
                "★".to_string()
            } else {
                String::new()
            },
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}
