//! Resource-tree provider boundary
//!
//! The dispatcher never talks to a transport directly; it goes through the
//! `ResourceTreeProvider` trait. Provider failures are opaque to the core
//! and surface as INTERNAL_SERVER_ERROR with the provider's message passed
//! through verbatim. `InMemoryResourceTree` is the bundled implementation,
//! backing tests and local simulation.

use crate::node::ResourceNode;
use crate::path::ResourcePath;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use thiserror::Error;

/// Failure reported by a resource-tree provider
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        ProviderError(message.into())
    }
}

/// Access to one device's live resource tree
pub trait ResourceTreeProvider: Send + Sync {
    /// Read the node addressed by `path`, `ResourceNode::Absent` if missing
    fn node(&self, device_id: &str, path: &ResourcePath)
        -> Result<ResourceNode, ProviderError>;

    /// Store a node at `path`; `replace` swaps the subtree, otherwise merges
    fn apply_write(
        &self,
        device_id: &str,
        path: &ResourcePath,
        node: ResourceNode,
        replace: bool,
    ) -> Result<(), ProviderError>;

    /// Trigger an executable resource
    fn execute(
        &self,
        device_id: &str,
        path: &ResourcePath,
        args: Option<&Value>,
    ) -> Result<(), ProviderError>;

    /// Add a new object instance
    fn create_instance(
        &self,
        device_id: &str,
        path: &ResourcePath,
        node: ResourceNode,
    ) -> Result<(), ProviderError>;

    /// Remove an object instance
    fn delete_instance(&self, device_id: &str, path: &ResourcePath)
        -> Result<(), ProviderError>;
}

type ObjectMap = BTreeMap<u16, ResourceNode>;

/// Provider holding every device tree in process memory
#[derive(Debug, Default)]
pub struct InMemoryResourceTree {
    devices: Mutex<HashMap<String, ObjectMap>>,
    executions: Mutex<Vec<(String, String)>>,
}

impl InMemoryResourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a device tree, replacing any previous one
    pub fn seed_device(&self, device_id: &str, objects: ObjectMap) {
        self.devices
            .lock()
            .expect("tree lock")
            .insert(device_id.to_string(), objects);
    }

    /// Executions recorded so far, as `(device, path)` pairs
    pub fn executions(&self) -> Vec<(String, String)> {
        self.executions.lock().expect("tree lock").clone()
    }

    fn with_objects<T>(
        &self,
        device_id: &str,
        body: impl FnOnce(&mut ObjectMap) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut devices = self.devices.lock().expect("tree lock");
        let objects = devices
            .get_mut(device_id)
            .ok_or_else(|| ProviderError::new(format!("device {} is not connected", device_id)))?;
        body(objects)
    }
}

fn lookup<'a>(objects: &'a ObjectMap, path: &ResourcePath) -> Option<&'a ResourceNode> {
    let mut node = objects.get(&path.object_id())?;
    if let Some(instance_id) = path.instance_id() {
        let ResourceNode::Object { instances, .. } = node else {
            return None;
        };
        node = instances.get(&instance_id)?;
    }
    if let Some(resource_id) = path.resource_id() {
        let ResourceNode::ObjectInstance { resources, .. } = node else {
            return None;
        };
        node = resources.get(&resource_id)?;
    }
    if let Some(resource_instance_id) = path.resource_instance_id() {
        let ResourceNode::MultipleResource { instances, .. } = node else {
            return None;
        };
        node = instances.get(&resource_instance_id)?;
    }
    Some(node)
}

impl ResourceTreeProvider for InMemoryResourceTree {
    fn node(
        &self,
        device_id: &str,
        path: &ResourcePath,
    ) -> Result<ResourceNode, ProviderError> {
        self.with_objects(device_id, |objects| {
            Ok(lookup(objects, path).cloned().unwrap_or(ResourceNode::Absent))
        })
    }

    fn apply_write(
        &self,
        device_id: &str,
        path: &ResourcePath,
        node: ResourceNode,
        replace: bool,
    ) -> Result<(), ProviderError> {
        self.with_objects(device_id, |objects| {
            let missing =
                || ProviderError::new(format!("no node at {} to write into", path.render()));
            match (path.instance_id(), path.resource_id(), path.resource_instance_id()) {
                (Some(instance_id), None, None) => {
                    let ResourceNode::Object { instances, .. } =
                        objects.get_mut(&path.object_id()).ok_or_else(missing)?
                    else {
                        return Err(missing());
                    };
                    let node = match (replace, instances.get_mut(&instance_id), node) {
                        (false, Some(ResourceNode::ObjectInstance { resources, .. }),
                            ResourceNode::ObjectInstance { resources: new, .. }) => {
                            resources.extend(new);
                            return Ok(());
                        }
                        (_, _, node) => node,
                    };
                    instances.insert(instance_id, node);
                    Ok(())
                }
                (Some(instance_id), Some(resource_id), None) => {
                    let ResourceNode::Object { instances, .. } =
                        objects.get_mut(&path.object_id()).ok_or_else(missing)?
                    else {
                        return Err(missing());
                    };
                    let ResourceNode::ObjectInstance { resources, .. } =
                        instances.get_mut(&instance_id).ok_or_else(missing)?
                    else {
                        return Err(missing());
                    };
                    let node = match (replace, resources.get_mut(&resource_id), node) {
                        (false, Some(ResourceNode::MultipleResource { instances, .. }),
                            ResourceNode::MultipleResource { instances: new, .. }) => {
                            instances.extend(new);
                            return Ok(());
                        }
                        (_, _, node) => node,
                    };
                    resources.insert(resource_id, node);
                    Ok(())
                }
                (Some(instance_id), Some(resource_id), Some(resource_instance_id)) => {
                    let ResourceNode::Object { instances, .. } =
                        objects.get_mut(&path.object_id()).ok_or_else(missing)?
                    else {
                        return Err(missing());
                    };
                    let ResourceNode::ObjectInstance { resources, .. } =
                        instances.get_mut(&instance_id).ok_or_else(missing)?
                    else {
                        return Err(missing());
                    };
                    let ResourceNode::MultipleResource { instances: values, .. } =
                        resources.get_mut(&resource_id).ok_or_else(missing)?
                    else {
                        return Err(missing());
                    };
                    values.insert(resource_instance_id, node);
                    Ok(())
                }
                _ => Err(ProviderError::new(format!(
                    "cannot write whole object {}",
                    path.render()
                ))),
            }
        })
    }

    fn execute(
        &self,
        device_id: &str,
        path: &ResourcePath,
        _args: Option<&Value>,
    ) -> Result<(), ProviderError> {
        self.with_objects(device_id, |_| Ok(()))?;
        self.executions
            .lock()
            .expect("tree lock")
            .push((device_id.to_string(), path.render()));
        Ok(())
    }

    fn create_instance(
        &self,
        device_id: &str,
        path: &ResourcePath,
        node: ResourceNode,
    ) -> Result<(), ProviderError> {
        self.with_objects(device_id, |objects| {
            let instance_id = path
                .instance_id()
                .ok_or_else(|| ProviderError::new("instance id required for create"))?;
            let object = objects
                .entry(path.object_id())
                .or_insert_with(|| ResourceNode::Object {
                    id: path.object_id(),
                    instances: BTreeMap::new(),
                });
            let ResourceNode::Object { instances, .. } = object else {
                return Err(ProviderError::new(format!(
                    "node {} is not an object",
                    path.object_id()
                )));
            };
            instances.insert(instance_id, node);
            Ok(())
        })
    }

    fn delete_instance(
        &self,
        device_id: &str,
        path: &ResourcePath,
    ) -> Result<(), ProviderError> {
        self.with_objects(device_id, |objects| {
            let instance_id = path
                .instance_id()
                .ok_or_else(|| ProviderError::new("instance id required for delete"))?;
            let Some(ResourceNode::Object { instances, .. }) =
                objects.get_mut(&path.object_id())
            else {
                return Err(ProviderError::new(format!(
                    "object {} not present",
                    path.object_id()
                )));
            };
            instances
                .remove(&instance_id)
                .map(|_| ())
                .ok_or_else(|| {
                    ProviderError::new(format!("instance {} not present", path.render()))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceType;
    use crate::node::ResourceValue;

    fn seeded_tree() -> InMemoryResourceTree {
        let mut resources = BTreeMap::new();
        resources.insert(
            9,
            ResourceNode::single(9, ResourceType::Integer, ResourceValue::Integer(42)),
        );
        let mut instances = BTreeMap::new();
        instances.insert(0, ResourceNode::ObjectInstance { id: 0, resources });
        let mut objects = BTreeMap::new();
        objects.insert(3, ResourceNode::Object { id: 3, instances });

        let tree = InMemoryResourceTree::new();
        tree.seed_device("urn:dev-1", objects);
        tree
    }

    fn path(text: &str) -> ResourcePath {
        ResourcePath::parse(text).unwrap()
    }

    #[test]
    fn test_lookup_levels() {
        let tree = seeded_tree();
        assert!(matches!(
            tree.node("urn:dev-1", &path("/3")).unwrap(),
            ResourceNode::Object { .. }
        ));
        assert!(matches!(
            tree.node("urn:dev-1", &path("/3/0/9")).unwrap(),
            ResourceNode::SingleResource { .. }
        ));
        assert!(tree.node("urn:dev-1", &path("/3/1")).unwrap().is_absent());
        assert!(tree.node("urn:dev-1", &path("/5")).unwrap().is_absent());
    }

    #[test]
    fn test_unknown_device_is_provider_error() {
        let tree = seeded_tree();
        let err = tree.node("urn:ghost", &path("/3")).unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_resource_write_replaces_value() {
        let tree = seeded_tree();
        tree.apply_write(
            "urn:dev-1",
            &path("/3/0/9"),
            ResourceNode::single(9, ResourceType::Integer, ResourceValue::Integer(90)),
            true,
        )
        .unwrap();
        assert_eq!(
            tree.node("urn:dev-1", &path("/3/0/9")).unwrap(),
            ResourceNode::single(9, ResourceType::Integer, ResourceValue::Integer(90))
        );
    }

    #[test]
    fn test_instance_update_merges_resources() {
        let tree = seeded_tree();
        let mut resources = BTreeMap::new();
        resources.insert(
            14,
            ResourceNode::single(
                14,
                ResourceType::String,
                ResourceValue::String("+5".to_string()),
            ),
        );
        tree.apply_write(
            "urn:dev-1",
            &path("/3/0"),
            ResourceNode::ObjectInstance { id: 0, resources },
            false,
        )
        .unwrap();
        // The untouched resource survives the merge.
        assert!(!tree.node("urn:dev-1", &path("/3/0/9")).unwrap().is_absent());
        assert!(!tree.node("urn:dev-1", &path("/3/0/14")).unwrap().is_absent());
    }

    #[test]
    fn test_create_and_delete_instance() {
        let tree = seeded_tree();
        tree.create_instance(
            "urn:dev-1",
            &path("/19/0"),
            ResourceNode::ObjectInstance {
                id: 0,
                resources: BTreeMap::new(),
            },
        )
        .unwrap();
        assert!(!tree.node("urn:dev-1", &path("/19/0")).unwrap().is_absent());
        tree.delete_instance("urn:dev-1", &path("/19/0")).unwrap();
        assert!(tree.node("urn:dev-1", &path("/19/0")).unwrap().is_absent());
    }

    #[test]
    fn test_execute_recorded() {
        let tree = seeded_tree();
        tree.execute("urn:dev-1", &path("/3/0/4"), None).unwrap();
        assert_eq!(
            tree.executions(),
            vec![("urn:dev-1".to_string(), "/3/0/4".to_string())]
        );
    }
}
