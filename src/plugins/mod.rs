//! Plugins module - capability servers reached over the network
//!
//! Contains the capability registry, the wire protocol, result-schema
//! validation and the client agents invoke tools through.

pub mod client;
pub mod protocol;
pub mod registry;
pub mod schema;

pub use client::{HttpTransport, PluginClient, PluginTransport};
pub use protocol::{PluginRequest, PluginResponse, RemoteError};
pub use registry::{Capability, CapabilityRegistry};
