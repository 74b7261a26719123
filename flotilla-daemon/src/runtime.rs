//! Daemon runtime: the primary process.
//!
//! Owns the live registry, watches the persisted document for external
//! edits, serves the socket protocol, and fans runtime-state pushes out to
//! every attached client. Three long-lived tasks (document watcher, socket
//! server, signal handler) share a broadcast shutdown channel; the first one
//! to finish tears the others down.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use flotilla_core::store::{self, document_path_at, flotilla_root};
use flotilla_core::{ClusterModel, ClusterRegistry, ReloadSummary};
use flotilla_sync::messages::{TOPIC_ALL_STATES, TOPIC_REQUEST_ALL, TOPIC_STATE_UPDATE};
use flotilla_sync::{
    ConnectedSetWatcher, LocalChannel, MessageChannel, PrimarySync, Role, SharedRegistry,
    SharedWatcher, StateListener, StateUpdate,
};

use crate::cluster::{LocalClusterFactory, TracingEventSink};
use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path, DAEMON_LABEL, DEBOUNCE_WINDOW};
use crate::protocol::{
    WireMessage, TOPIC_ADDED, TOPIC_ADD_CLUSTER, TOPIC_CLUSTERS, TOPIC_LIST_CLUSTERS, TOPIC_STATUS,
    TOPIC_STOP, TOPIC_STOPPING,
};

const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let (pushes_tx, _) = broadcast::channel::<StateUpdate>(PUSH_CHANNEL_CAPACITY);
    let factory = Arc::new(LocalClusterFactory::new(pushes_tx.clone()));
    let registry: SharedRegistry = Arc::new(Mutex::new(ClusterRegistry::new(
        factory,
        Arc::new(TracingEventSink),
    )));

    // A document that cannot be loaded or migrated aborts startup; the
    // daemon never runs against partial state.
    let document = store::load_at(&home)?;
    let summary = lock(&registry).reload(document.clusters);
    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        "cluster document loaded",
    );

    let primary = Arc::new(PrimarySync::new(Role::Primary, registry.clone())?);
    let watcher: SharedWatcher = Arc::new(Mutex::new(ConnectedSetWatcher::new()));
    primary.wire_push(&mut lock(&watcher));

    let started_at_unix = unix_seconds_now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let registry = registry.clone();
        let watcher = watcher.clone();
        tokio::spawn(async move {
            let result = document_watcher_task(home, registry, watcher, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let registry = registry.clone();
        let watcher = watcher.clone();
        let primary = primary.clone();
        let pushes_tx = pushes_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                registry,
                watcher,
                primary,
                pushes_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, socket_result, signal_result) =
        tokio::join!(watcher_handle, socket_handle, signal_handle);

    handle_join("document_watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Document watcher
// ---------------------------------------------------------------------------

async fn document_watcher_task(
    home: PathBuf,
    registry: SharedRegistry,
    watcher: SharedWatcher,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = flotilla_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    // Canonicalize so FSEvents paths (real paths, e.g. /private/var/... on
    // macOS) match the file-name checks below.
    let root = fs::canonicalize(&root).unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    _watcher.watch(&root, RecursiveMode::NonRecursive)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if !is_cluster_document(&path) {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }

                    match reload_document(&home, &registry).await {
                        Ok(summary) => {
                            tracing::info!(
                                updated = summary.updated,
                                created = summary.created,
                                dropped = summary.dropped,
                                skipped = summary.skipped,
                                "external document change applied",
                            );
                            observe_connected(&registry, &watcher);
                        }
                        Err(err) => {
                            // Keep serving the last good state; only a
                            // startup load failure is fatal.
                            tracing::error!(error = %err, "document reload failed");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Load the persisted document and reconcile the registry against it.
async fn reload_document(
    home: &Path,
    registry: &SharedRegistry,
) -> Result<ReloadSummary, DaemonError> {
    let home = home.to_path_buf();
    let document = tokio::task::spawn_blocking(move || store::load_at(&home))
        .await
        .map_err(|err| DaemonError::Protocol(format!("document load join error: {err}")))??;
    Ok(lock(registry).reload(document.clusters))
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    registry: SharedRegistry,
    watcher: SharedWatcher,
    primary: Arc<PrimarySync>,
    pushes_tx: broadcast::Sender<StateUpdate>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let registry = registry.clone();
                let watcher = watcher.clone();
                let primary = primary.clone();
                let pushes_rx = pushes_tx.subscribe();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        registry,
                        watcher,
                        primary,
                        pushes_rx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    registry: SharedRegistry,
    watcher: SharedWatcher,
    primary: Arc<PrimarySync>,
    mut pushes_rx: broadcast::Receiver<StateUpdate>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Each client gets an in-process channel junction: the sync drivers
    // attach to the application end, inbound frames are dispatched through
    // the wire end, and anything the drivers send back surfaces on `out_rx`.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let (app_end, wire_end) = bridge_channel(out_tx);
    let snapshot_sub = primary.attach(&app_end);
    let mut listener = StateListener::new(registry.clone(), app_end.clone());
    listener.register();

    let mut stopping = false;
    let result: Result<(), DaemonError> = loop {
        tokio::select! {
            maybe_frame = out_rx.recv() => {
                let Some(frame) = maybe_frame else { break Ok(()) };
                if let Err(err) = write_frame(&mut writer, &frame).await {
                    break Err(err);
                }
            }
            push = pushes_rx.recv() => {
                match push {
                    Ok(update) => {
                        let payload = match serde_json::to_value(&update) {
                            Ok(payload) => payload,
                            Err(err) => break Err(DaemonError::Json(err)),
                        };
                        let frame = WireMessage::new(TOPIC_STATE_UPDATE, payload);
                        if let Err(err) = write_frame(&mut writer, &frame).await {
                            break Err(err);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "client fell behind on state pushes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                }
            }
            maybe_line = lines.next_line() => {
                let line = match maybe_line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(io_err("daemon socket read", err)),
                };
                if line.trim().is_empty() {
                    continue;
                }

                let frame: WireMessage = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(err) => {
                        let reply = WireMessage::error(format!("invalid frame JSON: {err}"));
                        if let Err(err) = write_frame(&mut writer, &reply).await {
                            break Err(err);
                        }
                        continue;
                    }
                };

                match frame.topic.as_str() {
                    TOPIC_REQUEST_ALL => {
                        // The snapshot reply comes back via `out_rx`.
                        if let Err(err) = wire_end.send(TOPIC_REQUEST_ALL, frame.payload) {
                            tracing::warn!(error = %err, "snapshot request dispatch failed");
                        }
                    }
                    TOPIC_STATE_UPDATE => {
                        // Fire-and-forget: applied if the id exists, no reply.
                        if let Err(err) = wire_end.send(TOPIC_STATE_UPDATE, frame.payload) {
                            tracing::warn!(error = %err, "state-update dispatch failed");
                        }
                        observe_connected(&registry, &watcher);
                    }
                    TOPIC_STATUS => {
                        let payload = build_status_payload(&home, &registry, started_at_unix);
                        let reply = WireMessage::new(TOPIC_STATUS, payload);
                        if let Err(err) = write_frame(&mut writer, &reply).await {
                            break Err(err);
                        }
                    }
                    TOPIC_LIST_CLUSTERS => {
                        let clusters = lock(&registry).serialize().clusters;
                        let reply = match serde_json::to_value(&clusters) {
                            Ok(payload) => WireMessage::new(TOPIC_CLUSTERS, payload),
                            Err(err) => break Err(DaemonError::Json(err)),
                        };
                        if let Err(err) = write_frame(&mut writer, &reply).await {
                            break Err(err);
                        }
                    }
                    TOPIC_ADD_CLUSTER => {
                        let reply = handle_add_cluster(&home, &registry, frame.payload);
                        if let Err(err) = write_frame(&mut writer, &reply).await {
                            break Err(err);
                        }
                    }
                    TOPIC_STOP => {
                        let _ = shutdown_tx.send(());
                        let reply = WireMessage::new(TOPIC_STOPPING, Value::Null);
                        if let Err(err) = write_frame(&mut writer, &reply).await {
                            break Err(err);
                        }
                        stopping = true;
                    }
                    other => {
                        let reply = WireMessage::error(format!("unknown topic '{other}'"));
                        if let Err(err) = write_frame(&mut writer, &reply).await {
                            break Err(err);
                        }
                    }
                }

                if stopping {
                    break Ok(());
                }
            }
        }
    };

    listener.unregister();
    app_end.unsubscribe(snapshot_sub);
    result
}

/// Register `payload` as a new cluster and persist the document. Collaborator
/// failures surface as an error frame, not a dropped connection.
fn handle_add_cluster(home: &Path, registry: &SharedRegistry, payload: Value) -> WireMessage {
    let model: ClusterModel = match serde_json::from_value(payload) {
        Ok(model) => model,
        Err(err) => return WireMessage::error(format!("invalid cluster model: {err}")),
    };

    let document = {
        let mut registry = lock(registry);
        if let Err(err) = registry.add_model(model.clone()) {
            return WireMessage::error(err.to_string());
        }
        registry.serialize()
    };

    if let Err(err) = store::save_at(home, &document) {
        return WireMessage::error(format!("cluster added but document save failed: {err}"));
    }

    match serde_json::to_value(&model) {
        Ok(payload) => WireMessage::new(TOPIC_ADDED, payload),
        Err(err) => WireMessage::error(err.to_string()),
    }
}

fn build_status_payload(home: &Path, registry: &SharedRegistry, started_at_unix: u64) -> Value {
    let (clusters, connected) = {
        let registry = lock(registry);
        let entries: Vec<Value> = registry
            .list()
            .iter()
            .map(|cluster| {
                let state = cluster.runtime_state();
                json!({
                    "id": cluster.id().0,
                    "name": cluster.to_model().name,
                    "status": state.status,
                    "server_version": state.server_version,
                })
            })
            .collect();
        (entries, registry.connected_ids().len())
    };

    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at_unix": started_at_unix,
        "connected": connected,
        "clusters": clusters,
        "socket": socket_path(home).display().to_string(),
        "document": document_path_at(home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Channel bridge
// ---------------------------------------------------------------------------

/// One client's in-process junction. Returns the application end (what the
/// sync drivers attach to) and the wire end (where inbound socket frames are
/// dispatched). Frames the drivers send toward the client land on `out_tx`.
fn bridge_channel(
    out_tx: mpsc::UnboundedSender<WireMessage>,
) -> (Arc<dyn MessageChannel>, LocalChannel) {
    let (app_end, wire_end) = LocalChannel::pair();
    wire_end.subscribe(
        TOPIC_ALL_STATES,
        Arc::new(move |payload| {
            let _ = out_tx.send(WireMessage::new(TOPIC_ALL_STATES, payload));
        }),
    );
    (Arc::new(app_end), wire_end)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Feed the current connected set to the change watcher. Must be called
/// without holding the registry lock — a detected change re-locks it to push.
fn observe_connected(registry: &SharedRegistry, watcher: &SharedWatcher) {
    let ids = lock(registry).connected_ids();
    lock(watcher).observe(ids);
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_cluster_document(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()) == Some("clusters.json")
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = flotilla_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }
    Ok(())
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &WireMessage) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(frame)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lock a mutex, recovering from poisoning — shared state stays usable even
/// if a handler panicked while holding the lock.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use tempfile::TempDir;
    use tokio::time::advance;

    use flotilla_core::types::PersistedDocument;
    use flotilla_core::{ClusterId, ConnectionStatus, RuntimeState};

    fn test_model(id: &str) -> ClusterModel {
        ClusterModel {
            id: ClusterId::from(id),
            name: id.to_string(),
            connection_uri: format!("mongodb://{id}:27017"),
            color: None,
            favorite: false,
            created_at: Utc::now(),
        }
    }

    fn test_registry(pushes: &broadcast::Sender<StateUpdate>, ids: &[&str]) -> SharedRegistry {
        let factory = Arc::new(LocalClusterFactory::new(pushes.clone()));
        let mut registry = ClusterRegistry::new(factory, Arc::new(TracingEventSink));
        registry.reload(ids.iter().map(|id| test_model(id)).collect());
        Arc::new(Mutex::new(registry))
    }

    fn connected_state() -> RuntimeState {
        RuntimeState {
            status: ConnectionStatus::Connected,
            server_version: Some("7.0.4".to_string()),
            is_writable: true,
            last_error: None,
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/clusters.json");
        let mut reload_triggers = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold)
            {
                reload_triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }

        advance(Duration::from_millis(150)).await;
        assert_eq!(
            reload_triggers, 1,
            "rapid saves should collapse to one reload trigger"
        );
    }

    #[test]
    fn only_the_cluster_document_triggers_reload() {
        assert!(is_cluster_document(Path::new("/home/x/.flotilla/clusters.json")));
        assert!(!is_cluster_document(Path::new("/home/x/.flotilla/clusters.json.tmp")));
        assert!(!is_cluster_document(Path::new("/home/x/.flotilla/daemon.sock")));
    }

    #[tokio::test]
    async fn reload_document_reconciles_against_the_disk_state() {
        let home = TempDir::new().expect("home");
        let (pushes_tx, _) = broadcast::channel(8);
        let registry = test_registry(&pushes_tx, &["a"]);

        store::save_at(
            home.path(),
            &PersistedDocument {
                version: flotilla_core::migrate::CURRENT_VERSION,
                clusters: vec![test_model("a"), test_model("b")],
            },
        )
        .expect("save");

        let summary = reload_document(home.path(), &registry)
            .await
            .expect("reload");
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(lock(&registry).len(), 2);
    }

    #[tokio::test]
    async fn snapshot_request_through_the_bridge_replies_with_all_states() {
        let (pushes_tx, _) = broadcast::channel(8);
        let registry = test_registry(&pushes_tx, &["a", "b"]);
        let primary = PrimarySync::new(Role::Primary, registry).expect("primary");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (app_end, wire_end) = bridge_channel(out_tx);
        let _sub = primary.attach(&app_end);

        wire_end
            .send(TOPIC_REQUEST_ALL, Value::Null)
            .expect("dispatch");

        let frame = out_rx.try_recv().expect("snapshot reply");
        assert_eq!(frame.topic, TOPIC_ALL_STATES);
        let entries = frame.payload.as_array().expect("entries array");
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn inbound_state_update_applies_and_pushes_on_connect() {
        let (pushes_tx, mut pushes_rx) = broadcast::channel(16);
        let registry = test_registry(&pushes_tx, &["a", "b"]);
        let primary = PrimarySync::new(Role::Primary, registry.clone()).expect("primary");
        let watcher: SharedWatcher = Arc::new(Mutex::new(ConnectedSetWatcher::new()));
        primary.wire_push(&mut lock(&watcher));
        observe_connected(&registry, &watcher); // empty baseline

        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (app_end, wire_end) = bridge_channel(out_tx);
        let mut listener = StateListener::new(registry.clone(), app_end.clone());
        listener.register();

        let update = serde_json::to_value(StateUpdate {
            id: ClusterId::from("a"),
            state: connected_state(),
        })
        .expect("encode");
        wire_end.send(TOPIC_STATE_UPDATE, update).expect("dispatch");
        observe_connected(&registry, &watcher);

        let state = lock(&registry)
            .get(&ClusterId::from("a"))
            .expect("a")
            .runtime_state();
        assert_eq!(state.status, ConnectionStatus::Connected);

        // The connected set changed, so every registered cluster pushed once.
        assert!(pushes_rx.try_recv().is_ok());
        assert!(pushes_rx.try_recv().is_ok());
        assert!(pushes_rx.try_recv().is_err(), "exactly two pushes");
    }

    #[tokio::test]
    async fn add_cluster_registers_and_persists() {
        let home = TempDir::new().expect("home");
        let (pushes_tx, _) = broadcast::channel(8);
        let registry = test_registry(&pushes_tx, &[]);

        let payload = serde_json::to_value(test_model("fresh")).expect("encode");
        let reply = handle_add_cluster(home.path(), &registry, payload);

        assert_eq!(reply.topic, TOPIC_ADDED);
        assert_eq!(lock(&registry).len(), 1);
        let document = store::load_at(home.path()).expect("load");
        assert_eq!(document.clusters.len(), 1);
        assert_eq!(document.clusters[0].id, ClusterId::from("fresh"));
    }

    #[tokio::test]
    async fn add_cluster_rejects_invalid_models_without_side_effects() {
        let home = TempDir::new().expect("home");
        let (pushes_tx, _) = broadcast::channel(8);
        let registry = test_registry(&pushes_tx, &[]);

        let reply = handle_add_cluster(home.path(), &registry, json!({ "id": 42 }));
        assert_eq!(reply.topic, crate::protocol::TOPIC_ERROR);

        let mut bad = test_model("bad");
        bad.connection_uri = "no-scheme".to_string();
        let payload = serde_json::to_value(bad).expect("encode");
        let reply = handle_add_cluster(home.path(), &registry, payload);
        assert_eq!(reply.topic, crate::protocol::TOPIC_ERROR);

        assert!(lock(&registry).is_empty());
        assert!(!document_path_at(home.path()).exists(), "nothing persisted");
    }

    #[tokio::test]
    async fn status_payload_reflects_the_registry() {
        let home = TempDir::new().expect("home");
        let (pushes_tx, _) = broadcast::channel(8);
        let registry = test_registry(&pushes_tx, &["a", "b"]);
        lock(&registry).apply_state(&ClusterId::from("b"), connected_state());

        let payload = build_status_payload(home.path(), &registry, 1_000_000);

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["connected"], json!(1));
        let clusters = payload["clusters"].as_array().expect("clusters array");
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0]["id"], json!("a"));
        assert_eq!(clusters[1]["status"], json!("connected"));
    }
}
