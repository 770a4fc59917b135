//! Device profile: object models and resource key names
//!
//! A device profile is loaded from a JSON document describing the objects a
//! device supports (resource types, access modes, multiplicity, version) and
//! the friendly key names mapped onto resource paths. Operations that accept
//! a `key` parameter resolve it here before dispatch.

use crate::error::{Lwm2mError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Object id of the LwM2M security object, never exposed to RPC
pub const SECURITY_OBJECT_ID: u16 = 0;

/// Data type of a resource value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    String,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Opaque,
    Time,
    Objlnk,
}

impl ResourceType {
    /// True for the numeric types that notification attributes may gate
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ResourceType::Integer
                | ResourceType::Long
                | ResourceType::Float
                | ResourceType::Double
                | ResourceType::Time
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::String => "STRING",
            ResourceType::Integer => "INTEGER",
            ResourceType::Long => "LONG",
            ResourceType::Float => "FLOAT",
            ResourceType::Double => "DOUBLE",
            ResourceType::Boolean => "BOOLEAN",
            ResourceType::Opaque => "OPAQUE",
            ResourceType::Time => "TIME",
            ResourceType::Objlnk => "OBJLNK",
        };
        f.write_str(name)
    }
}

/// Allowed operations on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ResourceAccess {
    R,
    W,
    RW,
    E,
}

impl ResourceAccess {
    pub fn is_readable(&self) -> bool {
        matches!(self, ResourceAccess::R | ResourceAccess::RW)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, ResourceAccess::W | ResourceAccess::RW)
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, ResourceAccess::E)
    }
}

/// Model of one resource within an object
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub id: u16,
    pub name: String,
    #[serde(rename = "operations")]
    pub access: ResourceAccess,
    #[serde(default)]
    pub multiple: bool,
    #[serde(rename = "type")]
    pub rtype: ResourceType,
}

/// Model of one object the device supports
#[derive(Debug, Clone)]
pub struct ObjectModel {
    pub id: u16,
    pub version: String,
    pub multiple: bool,
    pub resources: HashMap<u16, ResourceDef>,
}

impl ObjectModel {
    /// Resource model looked up by id
    pub fn resource(&self, resource_id: u16) -> Option<&ResourceDef> {
        self.resources.get(&resource_id)
    }
}

#[derive(Debug, Deserialize)]
struct RawObjectModel {
    id: u16,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    multiple: bool,
    resources: Vec<ResourceDef>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    objects: Vec<RawObjectModel>,
    #[serde(default)]
    keys: HashMap<String, String>,
}

/// Loaded device profile
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    objects: HashMap<u16, ObjectModel>,
    keys: HashMap<String, String>,
}

impl DeviceProfile {
    /// Load a profile from a JSON file on disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }

    /// Object model looked up by id
    pub fn object(&self, object_id: u16) -> Option<&ObjectModel> {
        self.objects.get(&object_id)
    }

    /// True if the device declares the object and it is not the security object
    pub fn supports_object(&self, object_id: u16) -> bool {
        object_id != SECURITY_OBJECT_ID && self.objects.contains_key(&object_id)
    }

    /// Resource model for a fully qualified resource path
    pub fn resource(&self, object_id: u16, resource_id: u16) -> Option<&ResourceDef> {
        self.object(object_id)?.resource(resource_id)
    }

    /// Resolve a friendly key name to its configured resource path text
    pub fn resolve_key(&self, key: &str) -> Result<&str> {
        self.keys.get(key).map(String::as_str).ok_or_else(|| {
            Lwm2mError::BadRequest(format!("{} is not configured in the device profile!", key))
        })
    }

    /// Reverse lookup: the key configured for a given path text, if any
    pub fn key_for_path(&self, path: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(_, target)| target.as_str() == path)
            .map(|(key, _)| key.as_str())
    }

    /// Object ids declared by the profile, excluding the security object
    pub fn object_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .objects
            .keys()
            .copied()
            .filter(|id| *id != SECURITY_OBJECT_ID)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl FromStr for DeviceProfile {
    type Err = Lwm2mError;

    fn from_str(s: &str) -> Result<Self> {
        let raw: RawProfile = serde_json::from_str(s)?;
        let mut objects = HashMap::new();
        for object in raw.objects {
            let resources = object
                .resources
                .into_iter()
                .map(|res| (res.id, res))
                .collect();
            objects.insert(
                object.id,
                ObjectModel {
                    id: object.id,
                    version: object.version,
                    multiple: object.multiple,
                    resources,
                },
            );
        }
        Ok(DeviceProfile {
            objects,
            keys: raw.keys,
        })
    }
}
