//! Shared test doubles for flotilla-core integration tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use flotilla_core::cluster::NullEventSink;
use flotilla_core::error::{ClusterError, FactoryError};
use flotilla_core::{
    Cluster, ClusterFactory, ClusterId, ClusterModel, ClusterRegistry, ConfigHandle,
    ConnectionStatus, RuntimeState,
};

pub struct TestCluster {
    model: ClusterModel,
    state: RuntimeState,
}

impl Cluster for TestCluster {
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

/// Factory that refuses to build any model whose name is `FAIL_NAME`.
pub struct TestFactory;

pub const FAIL_NAME: &str = "unbuildable";

impl ClusterFactory for TestFactory {
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
        if model.name == FAIL_NAME {
            return Err(FactoryError::Construct {
                id: model.id.0.clone(),
                reason: "test factory refuses".to_string(),
            });
        }
        Ok(Box::new(TestCluster {
            model,
            state: RuntimeState::default(),
        }))
    }
}

pub fn registry() -> ClusterRegistry {
    ClusterRegistry::new(Arc::new(TestFactory), Arc::new(NullEventSink))
}

/// A model with a fixed timestamp so serialized documents compare equal.
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
