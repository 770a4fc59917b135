//! rust-lwm2m - LwM2M device management resource model and RPC layer
//!
//! This library implements the server-side device-management core of the
//! LwM2M (Lightweight Machine-to-Machine) protocol: a versioned resource
//! path model with friendly key names, a wire value codec with deterministic
//! OPAQUE encodings, a notification-attribute validator, a per-device
//! observation registry, and the RPC dispatcher that ties them together.
//!
//! # Example
//!
//! ```no_run
//! use rust_lwm2m::{DeviceProfile, DeviceSession, InMemoryResourceTree, RpcDispatcher, RpcRequest};
//! use serde_json::json;
//!
//! // Load the device's object models and key names
//! let profile = DeviceProfile::from_file("device_profile.json").unwrap();
//! let session = DeviceSession::new("urn:imei:123456789012345", profile);
//!
//! // Dispatch operator requests against a resource tree
//! let dispatcher = RpcDispatcher::new(InMemoryResourceTree::new());
//! let request = RpcRequest::new("Read", json!({"id": "/3/0/9"}));
//! let response = dispatcher.dispatch(&session, &request);
//! println!("{}", serde_json::to_string(&response).unwrap());
//! ```

pub mod attributes;
pub mod client;
pub mod codec;
pub mod dispatcher;
mod error;
pub mod model;
pub mod node;
pub mod observation;
pub mod path;
pub mod rpc;
pub mod tree;

pub use client::{DeviceSession, NoopSink, UpdateSink};
pub use dispatcher::RpcDispatcher;
pub use error::{Lwm2mError, Result};
pub use model::{DeviceProfile, ResourceAccess, ResourceType};
pub use node::{ResourceNode, ResourceValue};
pub use observation::{DeviceRegistry, ObserveOutcome};
pub use path::ResourcePath;
pub use rpc::{ResponseCode, RpcRequest, RpcResponse};
pub use tree::{InMemoryResourceTree, ProviderError, ResourceTreeProvider};
