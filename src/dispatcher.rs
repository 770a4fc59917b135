//! The RPC dispatcher
//!
//! Single entry point for operator requests. Each dispatch resolves the
//! target path(s), routes by method name, consults the resource-tree
//! provider and the device's observation registry, and renders a
//! `{result, value|error}` response. The dispatcher itself is stateless
//! and safe to call concurrently; per-device serialization lives in the
//! registry. Provider failures are remapped to INTERNAL_SERVER_ERROR with
//! the provider's message passed through verbatim.

use crate::attributes::{render_links, NotificationAttributes};
use crate::client::DeviceSession;
use crate::codec::{decode_multiple, decode_single};
use crate::error::{Lwm2mError, Result};
use crate::model::{DeviceProfile, ResourceDef};
use crate::node::ResourceNode;
use crate::path::ResourcePath;
use crate::rpc::{OperationType, RpcRequest, RpcResponse};
use crate::tree::{ProviderError, ResourceTreeProvider};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub struct RpcDispatcher<P: ResourceTreeProvider> {
    provider: P,
}

impl<P: ResourceTreeProvider> RpcDispatcher<P> {
    pub fn new(provider: P) -> Self {
        RpcDispatcher { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Route one request and render its response
    pub fn dispatch(&self, session: &DeviceSession, request: &RpcRequest) -> RpcResponse {
        debug!(device = %session.device_id(), method = %request.method, "rpc dispatch");
        let op = match OperationType::from_name(&request.method) {
            Ok(op) => op,
            Err(response) => return response,
        };
        let outcome = match op {
            OperationType::Read => self.read(session, &request.params),
            OperationType::ReadComposite => self.read_composite(session, &request.params),
            OperationType::WriteReplace => self.write(session, &request.params, true),
            OperationType::WriteUpdate => self.write(session, &request.params, false),
            OperationType::WriteAttributes => self.write_attributes(session, &request.params),
            OperationType::WriteComposite => self.write_composite(session, &request.params),
            OperationType::Execute => self.execute(session, &request.params),
            OperationType::Discover => self.discover(session, &request.params),
            OperationType::DiscoverAll => self.discover_all(session),
            OperationType::Create => self.create(session, &request.params),
            OperationType::Delete => self.delete(session, &request.params),
            OperationType::Observe => self.observe(session, &request.params),
            OperationType::ObserveCancel => self.observe_cancel(session, &request.params),
            OperationType::ObserveCancelAll => {
                Ok(RpcResponse::content(session.registry().cancel_all().to_string()))
            }
            OperationType::ObserveComposite => self.observe_composite(session, &request.params),
            OperationType::ObserveCompositeCancel => {
                self.observe_composite_cancel(session, &request.params)
            }
            OperationType::ObserveReadAll => self.observe_read_all(session),
        };
        outcome.unwrap_or_else(RpcResponse::from)
    }

    fn node(&self, session: &DeviceSession, path: &ResourcePath) -> Result<ResourceNode> {
        self.provider
            .node(session.device_id(), path)
            .map_err(provider_failure)
    }

    fn read(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        require_supported(session.profile(), &path)?;
        let node = self.node(session, &path)?;
        if node.is_absent() {
            return Err(not_found(&path));
        }
        Ok(RpcResponse::content(node.to_string()))
    }

    fn read_composite(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let paths = session.resolve_targets(params)?;
        let mut entries = Vec::with_capacity(paths.len());
        for path in &paths {
            let rendered = if session.profile().supports_object(path.object_id()) {
                self.node(session, path)?.to_string()
            } else {
                "null".to_string()
            };
            entries.push(format!("{}={}", path.render(), rendered));
        }
        Ok(RpcResponse::content(format!("{{{}}}", entries.join(", "))))
    }

    fn write(&self, session: &DeviceSession, params: &Value, replace: bool) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        require_supported(session.profile(), &path)?;
        let value = params.get("value").ok_or_else(|| {
            Lwm2mError::BadRequest("Value to write is not specified!".to_string())
        })?;
        if path.is_object() {
            return Err(Lwm2mError::BadRequest(
                "Update of the root level object is not supported yet!".to_string(),
            ));
        }
        let instance_id = path.instance_id().unwrap_or_default();
        if !self.instance_exists(session, path.object_id(), instance_id)? {
            return Err(Lwm2mError::NotFound(format!(
                "object instance /{}/{} not found",
                path.object_id(),
                instance_id
            )));
        }
        let node = if path.is_object_instance() {
            build_instance_node(session.profile(), &path, value)?
        } else {
            build_resource_node(session.profile(), &path, value)?
        };
        self.provider
            .apply_write(session.device_id(), &path, node, replace)
            .map_err(provider_failure)?;
        Ok(RpcResponse::changed())
    }

    fn write_attributes(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        require_supported(session.profile(), &path)?;
        let attributes = params
            .get("attributes")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Lwm2mError::BadRequest("Attributes to write are not specified!".to_string())
            })?;
        let parsed = NotificationAttributes::from_params(attributes)?;
        if parsed.is_empty() {
            return Err(Lwm2mError::BadRequest(
                "Attributes to write are not specified!".to_string(),
            ));
        }
        parsed.validate_target(&path, session.profile())?;
        session.registry().write_attributes(&path, &parsed);
        Ok(RpcResponse::changed())
    }

    fn write_composite(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let nodes = params.get("nodes").and_then(Value::as_object).ok_or_else(|| {
            Lwm2mError::BadRequest(
                "Can't find 'nodes' in the requestParams parameters!".to_string(),
            )
        })?;
        if nodes.is_empty() {
            return Err(Lwm2mError::BadRequest(
                "Composite write requires at least one path!".to_string(),
            ));
        }
        // Validate every target and decode every value before the first
        // write; a missing instance fails the whole call.
        let mut writes = Vec::with_capacity(nodes.len());
        for (target, value) in nodes {
            let text = if target.starts_with('/') {
                target.clone()
            } else {
                session.profile().resolve_key(target)?.to_string()
            };
            let path = ResourcePath::parse(&text)?;
            path.validate_version(session.profile())?;
            require_supported(session.profile(), &path)?;
            if path.is_object() || path.is_object_instance() {
                return Err(Lwm2mError::BadRequest(format!(
                    "Composite write supports only resource paths, got {}!",
                    path
                )));
            }
            let instance_id = path.instance_id().unwrap_or_default();
            if !self.instance_exists(session, path.object_id(), instance_id)? {
                return Err(Lwm2mError::BadRequest(format!(
                    "object instance /{}/{} not found",
                    path.object_id(),
                    instance_id
                )));
            }
            let node = build_resource_node(session.profile(), &path, value)?;
            writes.push((path, node));
        }
        for (path, node) in writes {
            self.provider
                .apply_write(session.device_id(), &path, node, true)
                .map_err(provider_failure)?;
        }
        Ok(RpcResponse::changed())
    }

    fn execute(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        require_supported(session.profile(), &path)?;
        if !path.is_resource() {
            return Err(Lwm2mError::BadRequest(format!(
                "Execute target {} must be a resource!",
                path
            )));
        }
        let def = resource_def(session.profile(), &path)?;
        if !def.access.is_executable() {
            return Err(Lwm2mError::MethodNotAllowed(format!(
                "Resource {} is not executable!",
                path
            )));
        }
        self.provider
            .execute(session.device_id(), &path, params.get("value"))
            .map_err(provider_failure)?;
        Ok(RpcResponse::changed())
    }

    fn discover(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        require_supported(session.profile(), &path)?;
        let node = self.node(session, &path)?;
        if node.is_absent() {
            return Err(not_found(&path));
        }
        let version = path
            .is_object()
            .then(|| session.profile().object(path.object_id()))
            .flatten()
            .map(|object| object.version.clone());
        let links = render_links(
            &path,
            &node,
            version.as_deref(),
            &session.registry().attributes(),
        );
        Ok(RpcResponse::content(links))
    }

    fn discover_all(&self, session: &DeviceSession) -> Result<RpcResponse> {
        let attributes = session.registry().attributes();
        let mut links = Vec::new();
        for object_id in session.profile().object_ids() {
            let path = ResourcePath::object(object_id);
            let node = self.node(session, &path)?;
            if node.is_absent() {
                links.push(format!("<{}>", path.render()));
                continue;
            }
            let version = session
                .profile()
                .object(object_id)
                .map(|object| object.version.clone());
            links.push(render_links(&path, &node, version.as_deref(), &attributes));
        }
        Ok(RpcResponse::content(links.join(",")))
    }

    fn create(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        if !session.profile().supports_object(path.object_id()) {
            return Err(Lwm2mError::BadRequest(format!(
                "Specified object id {} absent in the list supported objects of the client or is security object!",
                path.object_id()
            )));
        }
        let object = session
            .profile()
            .object(path.object_id())
            .ok_or_else(|| not_found(&path))?;
        if !object.multiple {
            return Err(Lwm2mError::BadRequest("Object must be Multiple !".to_string()));
        }
        let instance_id = match path.instance_id() {
            Some(id) => id,
            None => self.next_instance_id(session, path.object_id())?,
        };
        if self.instance_exists(session, path.object_id(), instance_id)? {
            return Err(Lwm2mError::BadRequest(format!(
                "instance {} already exists",
                instance_id
            )));
        }
        let instance_path = ResourcePath::object_instance(path.object_id(), instance_id);
        let node = match params.get("value") {
            Some(value) => build_instance_node(session.profile(), &instance_path, value)?,
            None => ResourceNode::ObjectInstance {
                id: instance_id,
                resources: BTreeMap::new(),
            },
        };
        self.provider
            .create_instance(session.device_id(), &instance_path, node)
            .map_err(provider_failure)?;
        Ok(RpcResponse::created())
    }

    fn delete(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        if !path.is_object_instance() {
            return Err(Lwm2mError::BadRequest(format!(
                "Invalid path {}. Only object instances can be delete",
                path
            )));
        }
        require_supported(session.profile(), &path)?;
        if self.node(session, &path)?.is_absent() {
            return Err(not_found(&path));
        }
        self.provider
            .delete_instance(session.device_id(), &path)
            .map_err(provider_failure)?;
        Ok(RpcResponse::deleted())
    }

    fn observe(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        require_supported(session.profile(), &path)?;
        if !is_observable(session.profile(), &path) {
            return Err(Lwm2mError::BadRequest(format!(
                "Resource {} is not readable!",
                path
            )));
        }
        // Read outside the registry lock; registration happens after.
        let node = self.node(session, &path)?;
        if node.is_absent() {
            return Err(not_found(&path));
        }
        session.registry().observe_single(path)?;
        Ok(RpcResponse::content(node.to_string()))
    }

    fn observe_cancel(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let path = session.resolve_target(params)?;
        let count = session.registry().cancel_single(&path)?;
        Ok(RpcResponse::content(count.to_string()))
    }

    fn observe_composite(&self, session: &DeviceSession, params: &Value) -> Result<RpcResponse> {
        let paths = session.resolve_targets(params)?;
        let mut entries = Vec::with_capacity(paths.len());
        let mut observable = Vec::new();
        for path in paths {
            let supported = session.profile().supports_object(path.object_id());
            let readable = supported && is_observable(session.profile(), &path);
            let node = if supported {
                self.node(session, &path)?
            } else {
                ResourceNode::Absent
            };
            if readable && !node.is_absent() {
                entries.push(format!("{}={}", path.render(), node));
                observable.push(path);
            } else {
                // Unreadable or absent targets render as null and are left
                // out of the registration set.
                entries.push(format!("{}=null", path.render()));
            }
        }
        if !observable.is_empty() {
            session.registry().observe_composite(observable)?;
        }
        Ok(RpcResponse::content(format!("{{{}}}", entries.join(", "))))
    }

    fn observe_composite_cancel(
        &self,
        session: &DeviceSession,
        params: &Value,
    ) -> Result<RpcResponse> {
        let paths = session.resolve_targets(params)?;
        let count = session.registry().cancel_composite(&paths)?;
        Ok(RpcResponse::content(count.to_string()))
    }

    fn observe_read_all(&self, session: &DeviceSession) -> Result<RpcResponse> {
        let listing = session.registry().read_all();
        Ok(RpcResponse::content(serde_json::to_string(&listing)?))
    }

    fn instance_exists(
        &self,
        session: &DeviceSession,
        object_id: u16,
        instance_id: u16,
    ) -> Result<bool> {
        let path = ResourcePath::object_instance(object_id, instance_id);
        Ok(!self.node(session, &path)?.is_absent())
    }

    fn next_instance_id(&self, session: &DeviceSession, object_id: u16) -> Result<u16> {
        let node = self.node(session, &ResourcePath::object(object_id))?;
        let ResourceNode::Object { instances, .. } = node else {
            return Ok(0);
        };
        let mut candidate = 0;
        while instances.contains_key(&candidate) {
            candidate += 1;
        }
        Ok(candidate)
    }
}

fn provider_failure(err: ProviderError) -> Lwm2mError {
    Lwm2mError::Internal(err.to_string())
}

fn not_found(path: &ResourcePath) -> Lwm2mError {
    Lwm2mError::NotFound(format!("Resource with path {} not found!", path.render()))
}

fn require_supported(profile: &DeviceProfile, path: &ResourcePath) -> Result<()> {
    if profile.supports_object(path.object_id()) {
        Ok(())
    } else {
        Err(not_found(path))
    }
}

fn resource_def<'a>(profile: &'a DeviceProfile, path: &ResourcePath) -> Result<&'a ResourceDef> {
    path.resource_id()
        .and_then(|resource_id| profile.resource(path.object_id(), resource_id))
        .ok_or_else(|| not_found(path))
}

fn is_observable(profile: &DeviceProfile, path: &ResourcePath) -> bool {
    match path.resource_id() {
        None => true,
        Some(resource_id) => profile
            .resource(path.object_id(), resource_id)
            .is_some_and(|def| def.access.is_readable()),
    }
}

/// Decode a write value addressed at resource or resource-instance level
fn build_resource_node(
    profile: &DeviceProfile,
    path: &ResourcePath,
    value: &Value,
) -> Result<ResourceNode> {
    let def = resource_def(profile, path)?;
    if !def.access.is_writable() {
        return Err(Lwm2mError::MethodNotAllowed(format!(
            "Resource {} is read-only and can not be written!",
            path
        )));
    }
    if let Some(resource_instance_id) = path.resource_instance_id() {
        let decoded = decode_single(value, def.rtype, path)?;
        return Ok(ResourceNode::instance_value(
            resource_instance_id,
            def.rtype,
            decoded,
        ));
    }
    if def.multiple {
        let instances = decode_multiple(value, def.rtype, path)?;
        Ok(ResourceNode::MultipleResource {
            id: def.id,
            rtype: def.rtype,
            instances,
        })
    } else {
        let decoded = decode_single(value, def.rtype, path)?;
        Ok(ResourceNode::single(def.id, def.rtype, decoded))
    }
}

/// Decode an object-instance write value: `{resourceId: value, ...}`
fn build_instance_node(
    profile: &DeviceProfile,
    path: &ResourcePath,
    value: &Value,
) -> Result<ResourceNode> {
    let entries = value.as_object().ok_or_else(|| {
        Lwm2mError::BadRequest(format!(
            "Value for Object Instance {} must be in JSON format!",
            path
        ))
    })?;
    let instance_id = path.instance_id().unwrap_or_default();
    let mut resources = BTreeMap::new();
    for (key, entry) in entries {
        let resource_id: u16 = key.trim().parse().map_err(|_| {
            Lwm2mError::BadRequest(format!(
                "Invalid resource id {} for Object Instance {}!",
                key, path
            ))
        })?;
        let resource_path =
            ResourcePath::resource(path.object_id(), instance_id, resource_id);
        resources.insert(
            resource_id,
            build_resource_node(profile, &resource_path, entry)?,
        );
    }
    Ok(ResourceNode::ObjectInstance {
        id: instance_id,
        resources,
    })
}
