//! Wire value decoding
//!
//! RPC write values arrive as JSON: a scalar for single resources or an
//! instance-id keyed map for multiple resources. OPAQUE targets get a
//! deterministic byte encoding: 4-byte big-endian for int/float-width
//! numbers, 8-byte for long/double-width, and strings are decoded as hex
//! first, then base64 (padding optional). Plain UTF-8 bytes are never used.

use crate::error::{Lwm2mError, Result};
use crate::model::ResourceType;
use crate::node::{ResourceNode, ResourceValue};
use crate::path::ResourcePath;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::Value;
use std::collections::BTreeMap;

const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a write value for a single resource or resource instance
pub fn decode_single(
    wire: &Value,
    rtype: ResourceType,
    path: &ResourcePath,
) -> Result<ResourceValue> {
    if wire.is_object() {
        return Err(Lwm2mError::BadRequest(format!(
            "Invalid value for Single Resource {}. Value for this Single Resource must be OPAQUE!",
            path
        )));
    }
    match rtype {
        ResourceType::Opaque => Ok(ResourceValue::Opaque(encode_opaque(wire, path)?)),
        ResourceType::String | ResourceType::Objlnk => match wire {
            Value::String(s) => Ok(ResourceValue::String(s.clone())),
            Value::Number(n) => Ok(ResourceValue::String(n.to_string())),
            other => Err(bad_value(other, rtype, path)),
        },
        ResourceType::Integer | ResourceType::Long | ResourceType::Time => match wire {
            Value::Number(n) => n
                .as_i64()
                .map(ResourceValue::Integer)
                .ok_or_else(|| bad_value(wire, rtype, path)),
            Value::String(s) => s
                .trim()
                .parse()
                .map(ResourceValue::Integer)
                .map_err(|_| bad_value(wire, rtype, path)),
            other => Err(bad_value(other, rtype, path)),
        },
        ResourceType::Float | ResourceType::Double => match wire {
            Value::Number(n) => n
                .as_f64()
                .map(ResourceValue::Float)
                .ok_or_else(|| bad_value(wire, rtype, path)),
            Value::String(s) => s
                .trim()
                .parse()
                .map(ResourceValue::Float)
                .map_err(|_| bad_value(wire, rtype, path)),
            other => Err(bad_value(other, rtype, path)),
        },
        ResourceType::Boolean => match wire {
            Value::Bool(b) => Ok(ResourceValue::Boolean(*b)),
            Value::String(s) => match s.trim() {
                "true" => Ok(ResourceValue::Boolean(true)),
                "false" => Ok(ResourceValue::Boolean(false)),
                _ => Err(bad_value(wire, rtype, path)),
            },
            other => Err(bad_value(other, rtype, path)),
        },
    }
}

/// Decode a write value for a multiple resource: `{instanceId: value, ...}`
pub fn decode_multiple(
    wire: &Value,
    rtype: ResourceType,
    path: &ResourcePath,
) -> Result<BTreeMap<u16, ResourceNode>> {
    let Value::Object(entries) = wire else {
        return Err(Lwm2mError::BadRequest(format!(
            "Value for Multiple Resource {} must be in JSON format!",
            path
        )));
    };
    let mut instances = BTreeMap::new();
    for (key, value) in entries {
        let instance_id: u16 = key.trim().parse().map_err(|_| {
            Lwm2mError::BadRequest(format!(
                "Invalid resource instance id {} for Multiple Resource {}!",
                key, path
            ))
        })?;
        let decoded = decode_single(value, rtype, path)?;
        instances.insert(
            instance_id,
            ResourceNode::instance_value(instance_id, rtype, decoded),
        );
    }
    Ok(instances)
}

/// Deterministic OPAQUE encoding of a scalar wire value
pub fn encode_opaque(wire: &Value, path: &ResourcePath) -> Result<Vec<u8>> {
    match wire {
        Value::String(s) => decode_opaque_string(s),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(encode_integer(v))
            } else if let Some(v) = n.as_u64() {
                Ok(v.to_be_bytes().to_vec())
            } else {
                // as_f64 cannot fail once i64/u64 have been ruled out
                Ok(encode_float(n.as_f64().unwrap_or_default()))
            }
        }
        other => Err(Lwm2mError::BadRequest(format!(
            "Invalid value {} for OPAQUE resource {}!",
            other, path
        ))),
    }
}

fn encode_integer(value: i64) -> Vec<u8> {
    match i32::try_from(value) {
        Ok(narrow) => narrow.to_be_bytes().to_vec(),
        Err(_) => value.to_be_bytes().to_vec(),
    }
}

fn encode_float(value: f64) -> Vec<u8> {
    let narrow = value as f32;
    // Keep the 4-byte form only when narrowing neither overflows nor
    // underflows to zero.
    if narrow.is_finite() && (value == 0.0 || narrow != 0.0) {
        narrow.to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

fn decode_opaque_string(text: &str) -> Result<Vec<u8>> {
    if let Ok(bytes) = hex::decode(text) {
        return Ok(bytes);
    }
    BASE64.decode(text).map_err(|_| {
        Lwm2mError::BadRequest(format!(
            "Value {} is not a valid hex or base64 encoding!",
            text
        ))
    })
}

fn bad_value(wire: &Value, rtype: ResourceType, path: &ResourcePath) -> Lwm2mError {
    Lwm2mError::BadRequest(format!(
        "Invalid value {} for {} resource {}!",
        wire, rtype, path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> ResourcePath {
        ResourcePath::resource_instance(19, 0, 0, 0)
    }

    #[test]
    fn test_opaque_integer_widths() {
        assert_eq!(encode_opaque(&json!(4), &path()).unwrap().len(), 4);
        assert_eq!(encode_opaque(&json!(i32::MAX), &path()).unwrap().len(), 4);
        assert_eq!(encode_opaque(&json!(i32::MIN), &path()).unwrap().len(), 4);
        assert_eq!(
            encode_opaque(&json!(i64::from(i32::MAX) + 1), &path())
                .unwrap()
                .len(),
            8
        );
        assert_eq!(encode_opaque(&json!(i64::MAX), &path()).unwrap().len(), 8);
        assert_eq!(encode_opaque(&json!(i64::MIN), &path()).unwrap().len(), 8);
        assert_eq!(encode_opaque(&json!(u64::MAX), &path()).unwrap().len(), 8);
    }

    #[test]
    fn test_opaque_integer_layout() {
        assert_eq!(
            encode_opaque(&json!(1), &path()).unwrap(),
            vec![0, 0, 0, 1]
        );
        assert_eq!(
            encode_opaque(&json!(-1), &path()).unwrap(),
            vec![0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_opaque_float_widths() {
        assert_eq!(
            encode_opaque(&json!(1022.5906), &path()).unwrap().len(),
            4
        );
        assert_eq!(
            encode_opaque(&json!(f32::MAX as f64), &path()).unwrap().len(),
            4
        );
        assert_eq!(encode_opaque(&json!(f64::MAX), &path()).unwrap().len(), 8);
        assert_eq!(
            encode_opaque(&json!(f64::MIN_POSITIVE), &path())
                .unwrap()
                .len(),
            8
        );
        assert_eq!(encode_opaque(&json!(0.0), &path()).unwrap().len(), 4);
    }

    #[test]
    fn test_opaque_string_hex_first() {
        assert_eq!(
            encode_opaque(&json!("00ab01"), &path()).unwrap(),
            vec![0x00, 0xAB, 0x01]
        );
    }

    #[test]
    fn test_opaque_string_base64_fallback() {
        // Q is not a hex digit, so this lands on the base64 branch.
        assert_eq!(
            encode_opaque(&json!("AQID"), &path()).unwrap(),
            vec![1, 2, 3]
        );
        // Padding is optional.
        assert_eq!(
            encode_opaque(&json!("AQI"), &path()).unwrap(),
            encode_opaque(&json!("AQI="), &path()).unwrap()
        );
    }

    #[test]
    fn test_opaque_string_both_decoders_fail() {
        let err = encode_opaque(&json!("!!!"), &path()).unwrap_err();
        assert!(err
            .to_string()
            .contains("is not a valid hex or base64 encoding"));
    }

    #[test]
    fn test_map_rejected_for_single_resource() {
        let err = decode_single(
            &json!({"0": 1}),
            ResourceType::Integer,
            &ResourcePath::resource(3, 0, 9),
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .ends_with("Value for this Single Resource must be OPAQUE!"));
    }

    #[test]
    fn test_scalar_rejected_for_multiple_resource() {
        let err = decode_multiple(&json!(42), ResourceType::Opaque, &path()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Value for Multiple Resource /19/0/0/0 must be in JSON format!"
        );
    }

    #[test]
    fn test_multiple_resource_map() {
        let instances = decode_multiple(
            &json!({"0": "00ab", "25": 7}),
            ResourceType::Opaque,
            &path(),
        )
        .unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[&0],
            ResourceNode::instance_value(
                0,
                ResourceType::Opaque,
                ResourceValue::Opaque(vec![0x00, 0xAB])
            )
        );
        assert_eq!(
            instances[&25],
            ResourceNode::instance_value(
                25,
                ResourceType::Opaque,
                ResourceValue::Opaque(vec![0, 0, 0, 7])
            )
        );
    }

    #[test]
    fn test_typed_scalar_decoding() {
        let p = ResourcePath::resource(3, 0, 14);
        assert_eq!(
            decode_single(&json!("+12"), ResourceType::String, &p).unwrap(),
            ResourceValue::String("+12".to_string())
        );
        assert_eq!(
            decode_single(&json!(90), ResourceType::Integer, &p).unwrap(),
            ResourceValue::Integer(90)
        );
        assert_eq!(
            decode_single(&json!("90"), ResourceType::Long, &p).unwrap(),
            ResourceValue::Integer(90)
        );
        assert_eq!(
            decode_single(&json!(true), ResourceType::Boolean, &p).unwrap(),
            ResourceValue::Boolean(true)
        );
        assert!(decode_single(&json!("maybe"), ResourceType::Boolean, &p).is_err());
        assert!(decode_single(&json!([1, 2]), ResourceType::Integer, &p).is_err());
    }

    fn bad_value_message() -> String {
        decode_single(&json!(true), ResourceType::Integer, &ResourcePath::resource(3, 0, 9))
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn test_bad_value_names_path_and_type() {
        let message = bad_value_message();
        assert!(message.contains("/3/0/9"));
        assert!(message.contains("INTEGER"));
    }
}
