//! Per-device session: identity, profile, registry and update emission

use crate::error::{Lwm2mError, Result};
use crate::model::DeviceProfile;
use crate::node::ResourceNode;
use crate::observation::DeviceRegistry;
use crate::path::ResourcePath;
use crate::tree::ResourceTreeProvider;
use serde_json::Value;
use std::time::Instant;
use tracing::warn;

/// Downstream consumer of observation-driven updates
///
/// Emission is fire-and-forget: callers return once registry state is
/// correct, not once delivery is confirmed.
pub trait UpdateSink: Send + Sync {
    fn emit(&self, device_id: &str, path: &ResourcePath, node: &ResourceNode);
}

/// Sink that drops updates, for setups without a telemetry pipeline
#[derive(Debug, Default)]
pub struct NoopSink;

impl UpdateSink for NoopSink {
    fn emit(&self, _device_id: &str, _path: &ResourcePath, _node: &ResourceNode) {}
}

/// State held for one connected device
#[derive(Debug)]
pub struct DeviceSession {
    device_id: String,
    profile: DeviceProfile,
    registry: DeviceRegistry,
}

impl DeviceSession {
    pub fn new(device_id: impl Into<String>, profile: DeviceProfile) -> Self {
        DeviceSession {
            device_id: device_id.into(),
            profile,
            registry: DeviceRegistry::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Resolve the `id`/`key` parameter pair to a validated path
    pub fn resolve_target(&self, params: &Value) -> Result<ResourcePath> {
        let text = match (params.get("id"), params.get("key")) {
            (Some(Value::String(id)), _) => id.clone(),
            (_, Some(Value::String(key))) => self.profile.resolve_key(key)?.to_string(),
            _ => {
                return Err(Lwm2mError::BadRequest(
                    "Can't find 'key' or 'id' in the requestParams parameters!".to_string(),
                ));
            }
        };
        let path = ResourcePath::parse(&text)?;
        path.validate_version(&self.profile)?;
        Ok(path)
    }

    /// Resolve the composite `ids`/`keys` parameter pair to validated paths
    pub fn resolve_targets(&self, params: &Value) -> Result<Vec<ResourcePath>> {
        let texts: Vec<String> = match (params.get("ids"), params.get("keys")) {
            (Some(Value::Array(ids)), _) => ids
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        Lwm2mError::BadRequest(format!("Invalid path: {}", v))
                    })
                })
                .collect::<Result<_>>()?,
            (_, Some(Value::Array(keys))) => keys
                .iter()
                .map(|v| {
                    let key = v.as_str().ok_or_else(|| {
                        Lwm2mError::BadRequest(format!("Invalid key: {}", v))
                    })?;
                    Ok(self.profile.resolve_key(key)?.to_string())
                })
                .collect::<Result<_>>()?,
            _ => {
                return Err(Lwm2mError::BadRequest(
                    "Can't find 'keys' or 'ids' in the requestParams parameters!".to_string(),
                ));
            }
        };
        if texts.is_empty() {
            return Err(Lwm2mError::BadRequest(
                "Composite request requires at least one path!".to_string(),
            ));
        }
        texts
            .iter()
            .map(|text| {
                let path = ResourcePath::parse(text)?;
                path.validate_version(&self.profile)?;
                Ok(path)
            })
            .collect()
    }

    /// Re-evaluate observed paths on a registration-update event
    ///
    /// Due paths are collected and stamped under the registry lock, then
    /// read from the provider and emitted with the lock released.
    pub fn on_registration_update<P: ResourceTreeProvider + ?Sized>(
        &self,
        provider: &P,
        sink: &dyn UpdateSink,
    ) {
        let due = self.registry.due_for_update(Instant::now());
        for path in due {
            match provider.node(&self.device_id, &path) {
                Ok(node) => sink.emit(&self.device_id, &path, &node),
                Err(err) => {
                    warn!(device = %self.device_id, path = %path, error = %err,
                        "skipping update emission");
                }
            }
        }
    }

    /// Drop all observation and attribute state on deregistration
    pub fn on_deregistration(&self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceType;
    use crate::node::ResourceValue;
    use crate::tree::InMemoryResourceTree;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn profile() -> DeviceProfile {
        r#"{
            "objects": [{
                "id": 3,
                "version": "1.0",
                "resources": [
                    {"id": 9, "name": "Battery Level", "operations": "R", "type": "integer"}
                ]
            }],
            "keys": {"batteryLevel": "/3_1.0/0/9"}
        }"#
        .parse()
        .unwrap()
    }

    #[test]
    fn test_resolve_by_id_and_key() {
        let session = DeviceSession::new("urn:dev-1", profile());
        assert_eq!(
            session.resolve_target(&json!({"id": "/3/0/9"})).unwrap(),
            ResourcePath::resource(3, 0, 9)
        );
        assert_eq!(
            session
                .resolve_target(&json!({"key": "batteryLevel"}))
                .unwrap(),
            ResourcePath::resource(3, 0, 9)
        );
    }

    #[test]
    fn test_resolve_missing_target() {
        let session = DeviceSession::new("urn:dev-1", profile());
        let err = session.resolve_target(&json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can't find 'key' or 'id' in the requestParams parameters!"
        );
    }

    #[test]
    fn test_resolve_rejects_wrong_version() {
        let session = DeviceSession::new("urn:dev-1", profile());
        let err = session
            .resolve_target(&json!({"id": "/3_1.2/0/9"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Specified resource id /3_1.2/0/9 is not valid version! Must be version: 1.0"
        );
    }

    #[test]
    fn test_resolve_composite_targets() {
        let session = DeviceSession::new("urn:dev-1", profile());
        let paths = session
            .resolve_targets(&json!({"ids": ["/3/0/9", "/3/0"]}))
            .unwrap();
        assert_eq!(paths.len(), 2);
        let by_key = session
            .resolve_targets(&json!({"keys": ["batteryLevel"]}))
            .unwrap();
        assert_eq!(by_key, vec![ResourcePath::resource(3, 0, 9)]);
        assert!(session.resolve_targets(&json!({"ids": []})).is_err());
    }

    #[derive(Default)]
    struct RecordingSink {
        emitted: Mutex<Vec<String>>,
    }

    impl UpdateSink for RecordingSink {
        fn emit(&self, _device_id: &str, path: &ResourcePath, _node: &ResourceNode) {
            self.emitted.lock().unwrap().push(path.render());
        }
    }

    #[test]
    fn test_registration_update_emits_observed_paths() {
        let session = DeviceSession::new("urn:dev-1", profile());
        let tree = InMemoryResourceTree::new();
        let mut resources = BTreeMap::new();
        resources.insert(
            9,
            ResourceNode::single(9, ResourceType::Integer, ResourceValue::Integer(42)),
        );
        let mut instances = BTreeMap::new();
        instances.insert(0, ResourceNode::ObjectInstance { id: 0, resources });
        let mut objects = BTreeMap::new();
        objects.insert(3, ResourceNode::Object { id: 3, instances });
        tree.seed_device("urn:dev-1", objects);

        session
            .registry()
            .observe_single(ResourcePath::resource(3, 0, 9))
            .unwrap();
        let sink = RecordingSink::default();
        session.on_registration_update(&tree, &sink);
        assert_eq!(*sink.emitted.lock().unwrap(), vec!["/3/0/9".to_string()]);
    }
}
