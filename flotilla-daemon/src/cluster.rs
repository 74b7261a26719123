//! The daemon's live cluster implementation and its injected collaborators.
//!
//! State pushes fan out over a tokio broadcast channel; every connected
//! socket client holds a receiver and forwards each update as a
//! `state-update` frame.

use serde_json::json;
use tokio::sync::broadcast;

use flotilla_core::error::{ClusterError, FactoryError};
use flotilla_core::{
    Cluster, ClusterFactory, ClusterId, ClusterModel, ConfigHandle, ConnectionStatus, EventSink,
    RegistryEvent, RuntimeState,
};
use flotilla_sync::StateUpdate;

pub struct LocalCluster {
    model: ClusterModel,
    state: RuntimeState,
    pushes: broadcast::Sender<StateUpdate>,
}

impl Cluster for LocalCluster {
    fn id(&self) -> &ClusterId {
        &self.model.id
    }

    fn apply_model(&mut self, model: ClusterModel) -> Result<(), ClusterError> {
        if model.id != self.model.id {
            return Err(ClusterError::new(
                self.model.id.0.clone(),
                "cluster id is immutable",
            ));
        }
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

    fn publish_state(&self) {
        // No receivers just means no attached views right now.
        let _ = self.pushes.send(StateUpdate {
            id: self.model.id.clone(),
            state: self.state.clone(),
        });
    }
}

/// Builds [`LocalCluster`]s wired to the daemon's push channel.
pub struct LocalClusterFactory {
    pushes: broadcast::Sender<StateUpdate>,
}

impl LocalClusterFactory {
    pub fn new(pushes: broadcast::Sender<StateUpdate>) -> Self {
        Self { pushes }
    }
}

impl ClusterFactory for LocalClusterFactory {
    fn read_config(&self, model: &ClusterModel) -> Result<ConfigHandle, FactoryError> {
        let uri = model.connection_uri.trim();
        if uri.is_empty() {
            return Err(FactoryError::InvalidConfig {
                id: model.id.0.clone(),
                reason: "connection URI is empty".to_string(),
            });
        }
        if !uri.contains("://") {
            return Err(FactoryError::InvalidConfig {
                id: model.id.0.clone(),
                reason: format!("connection URI '{uri}' has no scheme"),
            });
        }
        Ok(ConfigHandle(json!({ "uri": uri })))
    }

    fn create(
        &self,
        model: ClusterModel,
        _config: ConfigHandle,
    ) -> Result<Box<dyn Cluster + Send>, FactoryError> {
        Ok(Box::new(LocalCluster {
            model,
            state: RuntimeState::default(),
            pushes: self.pushes.clone(),
        }))
    }
}

/// Logs registry lifecycle events through tracing.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::ClusterCreated { id } => {
                tracing::info!(cluster = %id, "cluster registered");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn model(id: &str) -> ClusterModel {
        ClusterModel {
            id: ClusterId::from(id),
            name: id.to_string(),
            connection_uri: format!("mongodb://{id}:27017"),
            color: None,
            favorite: false,
            created_at: Utc::now(),
        }
    }

    fn factory() -> (LocalClusterFactory, broadcast::Receiver<StateUpdate>) {
        let (tx, rx) = broadcast::channel(8);
        (LocalClusterFactory::new(tx), rx)
    }

    fn build(factory: &LocalClusterFactory, model: ClusterModel) -> Box<dyn Cluster + Send> {
        let config = factory.read_config(&model).expect("config");
        factory.create(model, config).expect("create")
    }

    #[test]
    fn apply_model_rejects_id_change() {
        let (factory, _rx) = factory();
        let mut cluster = build(&factory, model("a"));
        let err = cluster.apply_model(model("b")).expect_err("id change");
        assert_eq!(err.id, "a");
        assert_eq!(cluster.id(), &ClusterId::from("a"));
    }

    #[test]
    fn runtime_state_survives_model_update() {
        let (factory, _rx) = factory();
        let mut cluster = build(&factory, model("a"));
        cluster.apply_runtime_state(RuntimeState {
            status: ConnectionStatus::Connected,
            ..RuntimeState::default()
        });

        let mut renamed = model("a");
        renamed.name = "a-renamed".to_string();
        cluster.apply_model(renamed).expect("update");

        assert_eq!(cluster.runtime_state().status, ConnectionStatus::Connected);
        assert_eq!(cluster.to_model().name, "a-renamed");
    }

    #[test]
    fn publish_state_fans_out_over_broadcast() {
        let (factory, mut rx) = factory();
        let mut cluster = build(&factory, model("a"));
        cluster.apply_runtime_state(RuntimeState {
            status: ConnectionStatus::Connected,
            server_version: Some("7.0.4".to_string()),
            is_writable: true,
            last_error: None,
        });

        cluster.publish_state();

        let update = rx.try_recv().expect("one push");
        assert_eq!(update.id, ClusterId::from("a"));
        assert_eq!(update.state.status, ConnectionStatus::Connected);
    }

    #[test]
    fn publish_state_without_receivers_is_fine() {
        let (factory, rx) = factory();
        drop(rx);
        let cluster = build(&factory, model("a"));
        cluster.publish_state();
    }

    #[test]
    fn factory_rejects_empty_uri() {
        let (factory, _rx) = factory();
        let mut bad = model("a");
        bad.connection_uri = "   ".to_string();
        let err = factory.read_config(&bad).expect_err("empty uri");
        assert!(matches!(err, FactoryError::InvalidConfig { .. }));
    }

    #[test]
    fn factory_rejects_uri_without_scheme() {
        let (factory, _rx) = factory();
        let mut bad = model("a");
        bad.connection_uri = "localhost:27017".to_string();
        let err = factory.read_config(&bad).expect_err("no scheme");
        assert!(matches!(err, FactoryError::InvalidConfig { .. }));
    }
}
