//! Newline-delimited JSON socket protocol.
//!
//! Every frame, in both directions, is one [`WireMessage`] per line. The
//! replication topics (`request-all-states`, `all-states`, `state-update`)
//! share the wire with the daemon control topics defined here. Pushed
//! `state-update` frames may interleave with a request's reply; the client
//! helpers skip them while waiting for the expected topic.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use flotilla_core::ClusterModel;
use flotilla_sync::messages::{TOPIC_ALL_STATES, TOPIC_REQUEST_ALL, TOPIC_STATE_UPDATE};
use flotilla_sync::ClusterStateEntry;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

// Control-plane topics. The replication topics live in flotilla-sync.
pub const TOPIC_STATUS: &str = "status";
pub const TOPIC_STOP: &str = "stop";
pub const TOPIC_STOPPING: &str = "stopping";
pub const TOPIC_ADD_CLUSTER: &str = "add-cluster";
pub const TOPIC_ADDED: &str = "added";
pub const TOPIC_LIST_CLUSTERS: &str = "list-clusters";
pub const TOPIC_CLUSTERS: &str = "clusters";
pub const TOPIC_ERROR: &str = "error";

/// One JSON frame on the daemon socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl WireMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            topic: TOPIC_ERROR.to_string(),
            payload: json!({ "message": message.into() }),
        }
    }

    /// The message carried by an `error` frame.
    pub fn error_message(&self) -> String {
        self.payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown daemon error")
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Blocking client helpers
// ---------------------------------------------------------------------------

/// Send one frame to the daemon socket and wait for the reply with topic
/// `expect`. Interleaved `state-update` pushes are skipped.
pub fn send_request(
    home: &Path,
    request: &WireMessage,
    expect: &str,
) -> Result<Value, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    read_response(&mut reader, &socket, expect)
}

/// Query the daemon status, retrying briefly while the socket is still
/// appearing — `daemon start` callers race the bind.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = WireMessage::new(TOPIC_STATUS, Value::Null);

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request, TOPIC_STATUS) {
            Ok(payload) => return Ok(payload),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    send_request(
        home,
        &WireMessage::new(TOPIC_STOP, Value::Null),
        TOPIC_STOPPING,
    )
    .map(|_| ())
}

/// Register a new cluster with the running daemon. The daemon constructs it,
/// persists the document, and echoes the accepted model back.
pub fn request_add_cluster(home: &Path, model: &ClusterModel) -> Result<Value, DaemonError> {
    send_request(
        home,
        &WireMessage::new(TOPIC_ADD_CLUSTER, serde_json::to_value(model)?),
        TOPIC_ADDED,
    )
}

pub fn request_list(home: &Path) -> Result<Vec<ClusterModel>, DaemonError> {
    let payload = send_request(
        home,
        &WireMessage::new(TOPIC_LIST_CLUSTERS, Value::Null),
        TOPIC_CLUSTERS,
    )?;
    Ok(serde_json::from_value(payload)?)
}

/// Pull a full point-in-time snapshot of every cluster's runtime state.
pub fn request_all_states(home: &Path) -> Result<Vec<ClusterStateEntry>, DaemonError> {
    let payload = send_request(
        home,
        &WireMessage::new(TOPIC_REQUEST_ALL, Value::Null),
        TOPIC_ALL_STATES,
    )?;
    Ok(serde_json::from_value(payload)?)
}

fn read_response<R: BufRead>(
    reader: &mut R,
    socket: &Path,
    expect: &str,
) -> Result<Value, DaemonError> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(
                "daemon closed connection before responding".to_string(),
            ));
        }
        if line.trim().is_empty() {
            continue;
        }

        let frame: WireMessage = serde_json::from_str(line.trim_end())?;
        if frame.topic == TOPIC_STATE_UPDATE {
            continue; // push frame racing our reply
        }
        if frame.topic == TOPIC_ERROR {
            return Err(DaemonError::Protocol(frame.error_message()));
        }
        if frame.topic == expect {
            return Ok(frame.payload);
        }
        return Err(DaemonError::Protocol(format!(
            "unexpected daemon reply topic '{}'",
            frame.topic
        )));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
