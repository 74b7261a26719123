//! `flotilla watch` — attach as a live secondary view.
//!
//! Builds a local view registry from the persisted document, performs the
//! initial snapshot pull through [`SecondarySync`], then prints every
//! `state-update` the daemon pushes until the connection closes.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use flotilla_core::cluster::NullEventSink;
use flotilla_core::error::{ClusterError, FactoryError};
use flotilla_core::{
    store, Cluster, ClusterFactory, ClusterId, ClusterModel, ClusterRegistry, ConfigHandle,
    ConnectionStatus, RuntimeState,
};
use flotilla_daemon::paths::socket_path;
use flotilla_daemon::WireMessage;
use flotilla_sync::messages::{TOPIC_ALL_STATES, TOPIC_REQUEST_ALL, TOPIC_STATE_UPDATE};
use flotilla_sync::{
    LocalChannel, MessageChannel, Role, SecondarySync, SharedRegistry, StateListener, StateUpdate,
};

#[derive(Args, Debug)]
pub struct WatchArgs {}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let socket = socket_path(&home);
        if !socket.exists() {
            bail!("daemon is not running; start it with `flotilla daemon start`");
        }

        let stream = UnixStream::connect(&socket)
            .with_context(|| format!("connect {}", socket.display()))?;
        let writer = Arc::new(Mutex::new(
            stream.try_clone().context("clone socket stream")?,
        ));

        // The view's own registry, seeded read-only from the document. The
        // daemon remains the only writer.
        let document = store::load_at(&home).context("failed to load cluster document")?;
        let mut registry =
            ClusterRegistry::new(Arc::new(ViewClusterFactory), Arc::new(NullEventSink));
        let summary = registry.reload(document.clusters);
        println!("loaded {} cluster(s) from document", summary.created);
        let registry: SharedRegistry = Arc::new(Mutex::new(registry));

        let (app_end, wire_end) = LocalChannel::pair();
        let app_end: Arc<dyn MessageChannel> = Arc::new(app_end);

        // Outbound frames from the sync drivers go to the daemon socket.
        {
            let writer = writer.clone();
            wire_end.subscribe(
                TOPIC_REQUEST_ALL,
                Arc::new(move |payload| {
                    if let Err(err) = write_frame(&writer, TOPIC_REQUEST_ALL, payload) {
                        eprintln!("failed to send snapshot request: {err}");
                    }
                }),
            );
        }

        // Print alongside applying: the listener updates the registry, these
        // handlers narrate.
        app_end.subscribe(
            TOPIC_ALL_STATES,
            Arc::new(|payload: Value| {
                let count = payload.as_array().map(Vec::len).unwrap_or(0);
                println!("synced {count} cluster state(s) from primary");
            }),
        );
        app_end.subscribe(
            TOPIC_STATE_UPDATE,
            Arc::new(|payload: Value| {
                if let Ok(update) = serde_json::from_value::<StateUpdate>(payload) {
                    print_update(&update);
                }
            }),
        );

        let mut listener = StateListener::new(registry.clone(), app_end.clone());
        listener.register();

        let secondary = SecondarySync::new(Role::Secondary, registry).context("secondary role")?;
        secondary
            .attach(&app_end)
            .context("failed to request initial snapshot")?;

        println!("watching cluster state (ctrl-c to exit)");
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = line.context("daemon socket read")?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: WireMessage = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(err) => {
                    eprintln!("ignoring malformed frame: {err}");
                    continue;
                }
            };
            if let Err(err) = wire_end.send(&frame.topic, frame.payload) {
                eprintln!("dispatch failed: {err}");
            }
        }

        listener.unregister();
        println!("daemon closed the connection");
        Ok(())
    }
}

fn write_frame(writer: &Arc<Mutex<UnixStream>>, topic: &str, payload: Value) -> Result<()> {
    let frame = WireMessage::new(topic, payload);
    let line = serde_json::to_string(&frame)?;
    let mut stream = writer
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

fn print_update(update: &StateUpdate) {
    let status = match update.state.status {
        ConnectionStatus::Connected => "connected".green().bold().to_string(),
        ConnectionStatus::Connecting => "connecting".yellow().to_string(),
        ConnectionStatus::Disconnected => "disconnected".bright_black().to_string(),
    };
    match &update.state.server_version {
        Some(version) => println!("{} {} (server {})", update.id, status, version),
        None => println!("{} {}", update.id, status),
    }
}

// ---------------------------------------------------------------------------
// View-side cluster
// ---------------------------------------------------------------------------

/// A passive mirror of a daemon-side cluster. Never connects to anything and
/// never fans state out.
struct ViewCluster {
    model: ClusterModel,
    state: RuntimeState,
}

impl Cluster for ViewCluster {
    fn id(&self) -> &ClusterId {
        &self.model.id
    }

    fn apply_model(&mut self, model: ClusterModel) -> Result<(), ClusterError> {
        self.model = model;
        Ok(())
    }

    fn runtime_state(&self) -> RuntimeState {
        self.state.clone()
    }

    fn apply_runtime_state(&mut self, state: RuntimeState) {
        self.state = state;
    }

    fn is_disconnected(&self) -> bool {
        self.state.status == ConnectionStatus::Disconnected
    }

    fn to_model(&self) -> ClusterModel {
        self.model.clone()
    }

    fn publish_state(&self) {}
}

struct ViewClusterFactory;

impl ClusterFactory for ViewClusterFactory {
    fn read_config(&self, _model: &ClusterModel) -> Result<ConfigHandle, FactoryError> {
        Ok(ConfigHandle(Value::Null))
    }

    fn create(
        &self,
        model: ClusterModel,
        _config: ConfigHandle,
    ) -> Result<Box<dyn Cluster + Send>, FactoryError> {
        Ok(Box::new(ViewCluster {
            model,
            state: RuntimeState::default(),
        }))
    }
}
