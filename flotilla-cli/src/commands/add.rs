//! `flotilla add` — register a new cluster with the running daemon.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;

use flotilla_core::{ClusterId, ClusterModel};
use flotilla_daemon::{request_add_cluster, DaemonError};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Display name for the cluster.
    pub name: String,

    /// Connection URI, e.g. mongodb://localhost:27017.
    #[arg(long)]
    pub uri: String,

    /// Optional UI color tag.
    #[arg(long)]
    pub color: Option<String>,

    /// Mark the cluster as a favorite.
    #[arg(long)]
    pub favorite: bool,
}

impl AddArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let model = ClusterModel {
            id: ClusterId::from(uuid::Uuid::new_v4().to_string()),
            name: self.name,
            connection_uri: self.uri,
            color: self.color,
            favorite: self.favorite,
            created_at: Utc::now(),
        };

        // The daemon exclusively owns the persisted document; there is no
        // offline write path.
        match request_add_cluster(&home, &model) {
            Ok(_) => {
                println!("added cluster '{}' ({})", model.name, model.id);
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                bail!("daemon is not running; start it with `flotilla daemon start`")
            }
            Err(err) => Err(err).context("failed to add cluster"),
        }
    }
}
