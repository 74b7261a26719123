//! Shared test doubles for flotilla-sync integration tests.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use flotilla_core::cluster::NullEventSink;
use flotilla_core::error::{ClusterError, FactoryError};
use flotilla_core::{
    Cluster, ClusterFactory, ClusterId, ClusterModel, ClusterRegistry, ConfigHandle,
    ConnectionStatus, RuntimeState,
};
use flotilla_sync::{SharedRegistry, StateUpdate};

/// Log of every `publish_state` call made by any cluster of one factory.
pub type PushLog = Arc<Mutex<Vec<StateUpdate>>>;

/// Log of every `apply_runtime_state` call, by cluster id.
pub type ApplyLog = Arc<Mutex<Vec<ClusterId>>>;

pub struct StubCluster {
    model: ClusterModel,
    state: Mutex<RuntimeState>,
    pushes: PushLog,
    applies: ApplyLog,
}

impl Cluster for StubCluster {
    fn id(&self) -> &ClusterId {
        &self.model.id
    }

    fn apply_model(&mut self, model: ClusterModel) -> Result<(), ClusterError> {
        self.model = model;
        Ok(())
    }

    fn runtime_state(&self) -> RuntimeState {
        self.state.lock().expect("state lock").clone()
    }

    fn apply_runtime_state(&mut self, state: RuntimeState) {
        self.applies
            .lock()
            .expect("apply log lock")
            .push(self.model.id.clone());
        *self.state.lock().expect("state lock") = state;
    }

    fn is_disconnected(&self) -> bool {
        self.runtime_state().status == ConnectionStatus::Disconnected
    }

    fn to_model(&self) -> ClusterModel {
        self.model.clone()
    }

    fn publish_state(&self) {
        self.pushes.lock().expect("push log lock").push(StateUpdate {
            id: self.model.id.clone(),
            state: self.runtime_state(),
        });
    }
}

pub struct StubFactory {
    pushes: PushLog,
    applies: ApplyLog,
}

impl ClusterFactory for StubFactory {
    fn read_config(&self, model: &ClusterModel) -> Result<ConfigHandle, FactoryError> {
        Ok(ConfigHandle(serde_json::json!({
            "uri": model.connection_uri
        })))
    }

    fn create(
        &self,
        model: ClusterModel,
        _config: ConfigHandle,
    ) -> Result<Box<dyn Cluster + Send>, FactoryError> {
        Ok(Box::new(StubCluster {
            model,
            state: Mutex::new(RuntimeState::default()),
            pushes: self.pushes.clone(),
            applies: self.applies.clone(),
        }))
    }
}

pub fn model(id: &str) -> ClusterModel {
    ClusterModel {
        id: ClusterId::from(id),
        name: id.to_string(),
        connection_uri: format!("mongodb://{id}:27017"),
        color: None,
        favorite: false,
        created_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
    }
}

/// A shared registry seeded with `ids`, plus the push and apply logs of its
/// factory.
pub fn seeded_registry(ids: &[&str]) -> (SharedRegistry, PushLog, ApplyLog) {
    let pushes: PushLog = Arc::new(Mutex::new(vec![]));
    let applies: ApplyLog = Arc::new(Mutex::new(vec![]));
    let mut registry = ClusterRegistry::new(
        Arc::new(StubFactory {
            pushes: pushes.clone(),
            applies: applies.clone(),
        }),
        Arc::new(NullEventSink),
    );
    registry.reload(ids.iter().map(|id| model(id)).collect());
    (Arc::new(Mutex::new(registry)), pushes, applies)
}

pub fn connected_state() -> RuntimeState {
    RuntimeState {
        status: ConnectionStatus::Connected,
        server_version: Some("7.0.4".to_string()),
        is_writable: true,
        last_error: None,
    }
}
