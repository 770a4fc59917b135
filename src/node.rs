//! Resource tree nodes and their canonical text rendering
//!
//! Read-family RPC responses carry a textual rendering of the node that was
//! read. The format mirrors the one notification payloads use, so clients
//! observe the same shapes everywhere:
//!
//! `LwM2mSingleResource [id=14, value=+12, type=STRING]`
//! `LwM2mObjectInstance [id=0, resources={9=..., 14=...}]`

use crate::model::ResourceType;
use std::collections::BTreeMap;
use std::fmt;

/// A concrete resource value
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Opaque(Vec<u8>),
}

impl fmt::Display for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::String(s) => f.write_str(s),
            ResourceValue::Integer(v) => write!(f, "{}", v),
            ResourceValue::Float(v) => write!(f, "{}", v),
            ResourceValue::Boolean(v) => write!(f, "{}", v),
            // Opaque payloads render as a byte count, never the raw bytes.
            ResourceValue::Opaque(bytes) => write!(f, "{}Bytes", bytes.len()),
        }
    }
}

/// A node in the device resource tree
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceNode {
    Object {
        id: u16,
        instances: BTreeMap<u16, ResourceNode>,
    },
    ObjectInstance {
        id: u16,
        resources: BTreeMap<u16, ResourceNode>,
    },
    MultipleResource {
        id: u16,
        rtype: ResourceType,
        instances: BTreeMap<u16, ResourceNode>,
    },
    SingleResource {
        id: u16,
        rtype: ResourceType,
        value: ResourceValue,
    },
    ResourceInstance {
        id: u16,
        rtype: ResourceType,
        value: ResourceValue,
    },
    /// The addressed location exists in the model but holds no value
    Absent,
}

impl ResourceNode {
    pub fn single(id: u16, rtype: ResourceType, value: ResourceValue) -> Self {
        ResourceNode::SingleResource { id, rtype, value }
    }

    pub fn instance_value(id: u16, rtype: ResourceType, value: ResourceValue) -> Self {
        ResourceNode::ResourceInstance { id, rtype, value }
    }

    pub fn id(&self) -> Option<u16> {
        match self {
            ResourceNode::Object { id, .. }
            | ResourceNode::ObjectInstance { id, .. }
            | ResourceNode::MultipleResource { id, .. }
            | ResourceNode::SingleResource { id, .. }
            | ResourceNode::ResourceInstance { id, .. } => Some(*id),
            ResourceNode::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ResourceNode::Absent)
    }
}

fn write_children(
    f: &mut fmt::Formatter<'_>,
    children: &BTreeMap<u16, ResourceNode>,
) -> fmt::Result {
    f.write_str("{")?;
    for (index, (id, node)) in children.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}={}", id, node)?;
    }
    f.write_str("}")
}

impl fmt::Display for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceNode::Object { id, instances } => {
                write!(f, "LwM2mObject [id={}, instances=", id)?;
                write_children(f, instances)?;
                f.write_str("]")
            }
            ResourceNode::ObjectInstance { id, resources } => {
                write!(f, "LwM2mObjectInstance [id={}, resources=", id)?;
                write_children(f, resources)?;
                f.write_str("]")
            }
            ResourceNode::MultipleResource {
                id,
                rtype,
                instances,
            } => {
                write!(f, "LwM2mMultipleResource [id={}, values=", id)?;
                write_children(f, instances)?;
                write!(f, ", type={}]", rtype)
            }
            ResourceNode::SingleResource { id, rtype, value } => {
                write!(
                    f,
                    "LwM2mSingleResource [id={}, value={}, type={}]",
                    id, value, rtype
                )
            }
            ResourceNode::ResourceInstance { id, rtype, value } => {
                write!(
                    f,
                    "LwM2mResourceInstance [id={}, value={}, type={}]",
                    id, value, rtype
                )
            }
            ResourceNode::Absent => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_resource_rendering() {
        let node = ResourceNode::single(
            14,
            ResourceType::String,
            ResourceValue::String("+12".to_string()),
        );
        assert_eq!(
            node.to_string(),
            "LwM2mSingleResource [id=14, value=+12, type=STRING]"
        );
    }

    #[test]
    fn test_opaque_renders_byte_count() {
        let node = ResourceNode::single(
            0,
            ResourceType::Opaque,
            ResourceValue::Opaque(vec![0, 0, 0, 1]),
        );
        assert_eq!(
            node.to_string(),
            "LwM2mSingleResource [id=0, value=4Bytes, type=OPAQUE]"
        );
    }

    #[test]
    fn test_multiple_resource_rendering() {
        let mut instances = BTreeMap::new();
        instances.insert(
            0,
            ResourceNode::instance_value(0, ResourceType::Opaque, ResourceValue::Opaque(vec![1; 4])),
        );
        instances.insert(
            5,
            ResourceNode::instance_value(5, ResourceType::Opaque, ResourceValue::Opaque(vec![2; 8])),
        );
        let node = ResourceNode::MultipleResource {
            id: 0,
            rtype: ResourceType::Opaque,
            instances,
        };
        assert_eq!(
            node.to_string(),
            "LwM2mMultipleResource [id=0, values={0=LwM2mResourceInstance [id=0, value=4Bytes, type=OPAQUE], 5=LwM2mResourceInstance [id=5, value=8Bytes, type=OPAQUE]}, type=OPAQUE]"
        );
    }

    #[test]
    fn test_object_instance_rendering() {
        let mut resources = BTreeMap::new();
        resources.insert(
            9,
            ResourceNode::single(9, ResourceType::Integer, ResourceValue::Integer(42)),
        );
        let node = ResourceNode::ObjectInstance { id: 0, resources };
        assert_eq!(
            node.to_string(),
            "LwM2mObjectInstance [id=0, resources={9=LwM2mSingleResource [id=9, value=42, type=INTEGER]}]"
        );
    }

    #[test]
    fn test_absent_renders_null() {
        assert_eq!(ResourceNode::Absent.to_string(), "null");
    }
}
