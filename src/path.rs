//! LwM2M resource path parsing, rendering and containment
//!
//! A path addresses a node in the device resource tree:
//! `/objectId[_version]/instanceId/resourceId/resourceInstanceId`, each level
//! optional but only if every shallower level is present. The optional
//! version suffix (`/19_1.1/...`) is attached to the object segment only and
//! is excluded from path equality.

use crate::error::{Lwm2mError, Result};
use crate::model::DeviceProfile;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A parsed LwM2M resource path
#[derive(Debug, Clone)]
pub struct ResourcePath {
    object_id: u16,
    /// Declared object version from the `_major.minor` suffix, if present
    version: Option<String>,
    instance_id: Option<u16>,
    resource_id: Option<u16>,
    resource_instance_id: Option<u16>,
}

impl ResourcePath {
    /// Path addressing a whole object
    pub fn object(object_id: u16) -> Self {
        Self {
            object_id,
            version: None,
            instance_id: None,
            resource_id: None,
            resource_instance_id: None,
        }
    }

    /// Path addressing an object instance
    pub fn object_instance(object_id: u16, instance_id: u16) -> Self {
        let mut path = Self::object(object_id);
        path.instance_id = Some(instance_id);
        path
    }

    /// Path addressing a resource
    pub fn resource(object_id: u16, instance_id: u16, resource_id: u16) -> Self {
        let mut path = Self::object_instance(object_id, instance_id);
        path.resource_id = Some(resource_id);
        path
    }

    /// Path addressing a resource instance of a multiple resource
    pub fn resource_instance(
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
    ) -> Self {
        let mut path = Self::resource(object_id, instance_id, resource_id);
        path.resource_instance_id = Some(resource_instance_id);
        path
    }

    /// Parse a path from its wire text, with or without a leading `/`
    ///
    /// The object segment may carry a version suffix: `19_1.1`.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim().trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Lwm2mError::BadRequest(format!("Invalid path: {}", text)));
        }
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.len() > 4 {
            return Err(Lwm2mError::BadRequest(format!("Invalid path: {}", text)));
        }

        let (object_part, version) = match segments[0].split_once('_') {
            Some((id, ver)) => (id, Some(parse_version(ver, text)?)),
            None => (segments[0], None),
        };
        let object_id = parse_id(object_part, text)?;

        let mut path = Self::object(object_id);
        path.version = version;
        if let Some(seg) = segments.get(1) {
            path.instance_id = Some(parse_id(seg, text)?);
        }
        if let Some(seg) = segments.get(2) {
            path.resource_id = Some(parse_id(seg, text)?);
        }
        if let Some(seg) = segments.get(3) {
            path.resource_instance_id = Some(parse_id(seg, text)?);
        }
        Ok(path)
    }

    /// Object id of the root segment
    pub fn object_id(&self) -> u16 {
        self.object_id
    }

    /// Declared version suffix, if the wire text carried one
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Object instance id, if addressed
    pub fn instance_id(&self) -> Option<u16> {
        self.instance_id
    }

    /// Resource id, if addressed
    pub fn resource_id(&self) -> Option<u16> {
        self.resource_id
    }

    /// Resource instance id, if addressed
    pub fn resource_instance_id(&self) -> Option<u16> {
        self.resource_instance_id
    }

    /// True if the path addresses a whole object
    pub fn is_object(&self) -> bool {
        self.instance_id.is_none()
    }

    /// True if the path addresses an object instance
    pub fn is_object_instance(&self) -> bool {
        self.instance_id.is_some() && self.resource_id.is_none()
    }

    /// True if the path addresses a resource
    pub fn is_resource(&self) -> bool {
        self.resource_id.is_some() && self.resource_instance_id.is_none()
    }

    /// True if the path addresses a resource instance
    pub fn is_resource_instance(&self) -> bool {
        self.resource_instance_id.is_some()
    }

    /// The id chain, shallowest first
    pub fn ids(&self) -> Vec<u16> {
        let mut ids = vec![self.object_id];
        ids.extend(self.instance_id);
        ids.extend(self.resource_id);
        ids.extend(self.resource_instance_id);
        ids
    }

    /// Render without the version suffix: `/3/0/14`
    pub fn render(&self) -> String {
        let mut out = String::new();
        for id in self.ids() {
            out.push('/');
            out.push_str(&id.to_string());
        }
        out
    }

    /// Render keeping the version suffix: `/19_1.1/0/0`
    pub fn render_versioned(&self) -> String {
        match &self.version {
            None => self.render(),
            Some(ver) => {
                let mut out = format!("/{}_{}", self.object_id, ver);
                for id in self.ids().into_iter().skip(1) {
                    out.push('/');
                    out.push_str(&id.to_string());
                }
                out
            }
        }
    }

    /// True if `self` is a strict prefix of `other`'s id chain
    pub fn contains(&self, other: &ResourcePath) -> bool {
        let own = self.ids();
        let theirs = other.ids();
        own.len() < theirs.len() && own == theirs[..own.len()]
    }

    /// True if the two paths are equal or one contains the other
    pub fn overlaps(&self, other: &ResourcePath) -> bool {
        self == other || self.contains(other) || other.contains(self)
    }

    /// Check the declared version suffix against the device's object model
    pub fn validate_version(&self, profile: &DeviceProfile) -> Result<()> {
        let Some(declared) = &self.version else {
            return Ok(());
        };
        let Some(object) = profile.object(self.object_id) else {
            // Unsupported object errors are reported by the dispatcher.
            return Ok(());
        };
        if declared != &object.version {
            return Err(Lwm2mError::BadRequest(format!(
                "Specified resource id {} is not valid version! Must be version: {}",
                self.render_versioned(),
                object.version
            )));
        }
        Ok(())
    }
}

/// Equality over the id chain only; the version suffix never participates
impl PartialEq for ResourcePath {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
            && self.instance_id == other.instance_id
            && self.resource_id == other.resource_id
            && self.resource_instance_id == other.resource_instance_id
    }
}

impl Eq for ResourcePath {}

impl Hash for ResourcePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
        self.instance_id.hash(state);
        self.resource_id.hash(state);
        self.resource_instance_id.hash(state);
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::str::FromStr for ResourcePath {
    type Err = Lwm2mError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_id(segment: &str, text: &str) -> Result<u16> {
    segment
        .parse()
        .map_err(|_| Lwm2mError::BadRequest(format!("Invalid path: {}", text)))
}

fn parse_version(ver: &str, text: &str) -> Result<String> {
    let valid = matches!(ver.split_once('.'), Some((major, minor))
        if !major.is_empty() && !minor.is_empty()
            && major.bytes().all(|b| b.is_ascii_digit())
            && minor.bytes().all(|b| b.is_ascii_digit()));
    if !valid {
        return Err(Lwm2mError::BadRequest(format!("Invalid path: {}", text)));
    }
    Ok(ver.to_string())
}
