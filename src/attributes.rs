//! Notification attribute classes, validation and Link-Format rendering
//!
//! Attributes come in two disjoint classes. PROPERTIES attributes (`ver`,
//! `dim`, `uri`) describe static structure and are only ever reported by
//! Discover. NOTIFICATION attributes (`pmin`, `pmax`, `gt`, `lt`, `st`)
//! control when change notifications fire and are the only class accepted
//! by WriteAttributes.

use crate::error::{Lwm2mError, Result};
use crate::model::DeviceProfile;
use crate::node::ResourceNode;
use crate::path::ResourcePath;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Class of a discovery/notification attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeClass {
    Properties,
    Notification,
}

/// Classify an attribute name by its protocol class
pub fn classify(name: &str) -> Result<AttributeClass> {
    match name {
        "ver" | "dim" | "uri" => Ok(AttributeClass::Properties),
        "pmin" | "pmax" | "gt" | "lt" | "st" => Ok(AttributeClass::Notification),
        other => Err(Lwm2mError::BadRequest(format!(
            "Unknown attribute name: {}!",
            other
        ))),
    }
}

/// Stored NOTIFICATION attributes for one observed path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationAttributes {
    pub pmin: Option<u64>,
    pub pmax: Option<u64>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
}

impl NotificationAttributes {
    /// Parse a WriteAttributes payload, rejecting PROPERTIES-class names
    pub fn from_params(attributes: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut parsed = NotificationAttributes::default();
        for (name, value) in attributes {
            match classify(name)? {
                AttributeClass::Properties => {
                    return Err(Lwm2mError::BadRequest(format!(
                        "Attribute {} is of class PROPERTIES but only NOTIFICATION attribute can be used in WRITE ATTRIBUTE request.",
                        name
                    )));
                }
                AttributeClass::Notification => match name.as_str() {
                    "pmin" => parsed.pmin = Some(period_value(name, value)?),
                    "pmax" => parsed.pmax = Some(period_value(name, value)?),
                    "gt" => parsed.gt = Some(numeric_value(name, value)?),
                    "lt" => parsed.lt = Some(numeric_value(name, value)?),
                    "st" => parsed.st = Some(numeric_value(name, value)?),
                    _ => unreachable!(),
                },
            }
        }
        Ok(parsed)
    }

    /// Check value-gating attributes against the addressed resource model
    ///
    /// `gt`, `lt` and `st` only make sense on a numeric resource or resource
    /// instance; `pmin`/`pmax` are legal on any node.
    pub fn validate_target(&self, path: &ResourcePath, profile: &DeviceProfile) -> Result<()> {
        if self.gt.is_none() && self.lt.is_none() && self.st.is_none() {
            return Ok(());
        }
        let numeric = path
            .resource_id()
            .and_then(|res_id| profile.resource(path.object_id(), res_id))
            .is_some_and(|def| def.rtype.is_numeric());
        if !numeric {
            return Err(Lwm2mError::BadRequest(format!(
                "Attributes gt/lt/st can only be used for numeric resources, but {} is not one!",
                path
            )));
        }
        Ok(())
    }

    /// Overlay fields set in `update` onto `self`, keeping the rest
    pub fn merge(&mut self, update: &NotificationAttributes) {
        if update.pmin.is_some() {
            self.pmin = update.pmin;
        }
        if update.pmax.is_some() {
            self.pmax = update.pmax;
        }
        if update.gt.is_some() {
            self.gt = update.gt;
        }
        if update.lt.is_some() {
            self.lt = update.lt;
        }
        if update.st.is_some() {
            self.st = update.st;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == NotificationAttributes::default()
    }

    fn render_into(&self, out: &mut String) {
        if let Some(pmax) = self.pmax {
            let _ = write!(out, ";pmax={}", pmax);
        }
        if let Some(pmin) = self.pmin {
            let _ = write!(out, ";pmin={}", pmin);
        }
        if let Some(gt) = self.gt {
            let _ = write!(out, ";gt={}", gt);
        }
        if let Some(lt) = self.lt {
            let _ = write!(out, ";lt={}", lt);
        }
        if let Some(st) = self.st {
            let _ = write!(out, ";st={}", st);
        }
    }
}

fn period_value(name: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Lwm2mError::BadRequest(format!("Attribute {} must be a whole number of seconds!", name)))
}

fn numeric_value(name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Lwm2mError::BadRequest(format!("Attribute {} must be numeric!", name)))
}

/// Render a node subtree as CoRE Link-Format, merging stored attributes
///
/// One `<path>;attr=val` entry per node in document order. `ver` appears
/// only on the root object entry, `dim` always on multiple resources.
pub fn render_links(
    root_path: &ResourcePath,
    node: &ResourceNode,
    version: Option<&str>,
    stored: &HashMap<String, NotificationAttributes>,
) -> String {
    let mut entries = Vec::new();
    collect_links(root_path, node, version, stored, &mut entries);
    entries.join(",")
}

fn collect_links(
    path: &ResourcePath,
    node: &ResourceNode,
    version: Option<&str>,
    stored: &HashMap<String, NotificationAttributes>,
    out: &mut Vec<String>,
) {
    let mut entry = format!("<{}>", path.render());
    if let Some(ver) = version {
        let _ = write!(entry, ";ver={}", ver);
    }
    if let ResourceNode::MultipleResource { instances, .. } = node {
        let _ = write!(entry, ";dim={}", instances.len());
    }
    if let Some(attrs) = stored.get(&path.render()) {
        attrs.render_into(&mut entry);
    }
    out.push(entry);

    match node {
        ResourceNode::Object { instances, .. } => {
            for (id, child) in instances {
                let child_path = ResourcePath::object_instance(path.object_id(), *id);
                collect_links(&child_path, child, None, stored, out);
            }
        }
        ResourceNode::ObjectInstance { id, resources } => {
            for (res_id, child) in resources {
                let child_path = ResourcePath::resource(path.object_id(), *id, *res_id);
                collect_links(&child_path, child, None, stored, out);
            }
        }
        ResourceNode::MultipleResource { instances, .. } => {
            for (inst_id, child) in instances {
                if let (Some(instance_id), Some(resource_id)) =
                    (path.instance_id(), path.resource_id())
                {
                    let child_path = ResourcePath::resource_instance(
                        path.object_id(),
                        instance_id,
                        resource_id,
                        *inst_id,
                    );
                    collect_links(&child_path, child, None, stored, out);
                }
            }
        }
        _ => {}
    }
}
