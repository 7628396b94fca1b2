//! Filter descriptors: static metadata for every registered filter.
//!
//! Descriptors are a separate data path from the factories themselves. They
//! are what `atrous filters` prints and what a host plugin loader would read
//! to register functions by signature.

use serde::Serialize;

use crate::node::PortDefinition;
use crate::registry::FilterRegistry;

pub const PLUGIN_IDENTIFIER: &str = "org.atrous.atwt";
pub const PLUGIN_NAMESPACE: &str = "atwt";
pub const PLUGIN_NAME: &str = "À Trous Wavelet Transform";

/// Every filter returns a single clip.
pub const RETURN_SIGNATURE: &str = "clip:vnode;";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub identifier: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl PluginInfo {
    pub fn current() -> Self {
        Self {
            identifier: PLUGIN_IDENTIFIER.to_string(),
            namespace: PLUGIN_NAMESPACE.to_string(),
            name: PLUGIN_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgDescriptor {
    pub name: String,
    /// "Clip", "Int", "Float", "Str", "Bool" or "Path".
    pub port_type: String,
    pub required: bool,
    pub default_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterDescriptor {
    pub name: String,
    /// Argument signature, e.g. `clip:vnode;radius:int:opt;`.
    pub signature: String,
    pub return_signature: String,
    pub args: Vec<ArgDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginManifest {
    pub plugin: PluginInfo,
    pub filters: Vec<FilterDescriptor>,
}

/// Render ports as `name:type[:opt];` entries.
pub fn signature(ports: &[PortDefinition]) -> String {
    ports
        .iter()
        .map(|port| {
            let opt = if port.required { "" } else { ":opt" };
            format!("{}:{}{opt};", port.name, port.port_type.signature_token())
        })
        .collect()
}

pub fn describe_filter(name: &str, ports: &[PortDefinition]) -> FilterDescriptor {
    FilterDescriptor {
        name: name.to_string(),
        signature: signature(ports),
        return_signature: RETURN_SIGNATURE.to_string(),
        args: ports
            .iter()
            .map(|port| ArgDescriptor {
                name: port.name.clone(),
                port_type: format!("{:?}", port.port_type),
                required: port.required,
                default_value: port.default_value.clone(),
            })
            .collect(),
    }
}

/// Descriptors for every filter in `registry`, sorted by name.
pub fn all_filter_descriptors(registry: &FilterRegistry) -> Vec<FilterDescriptor> {
    registry
        .list_filters()
        .into_iter()
        .filter_map(|name| registry.ports(name).map(|ports| describe_filter(name, ports)))
        .collect()
}

pub fn plugin_manifest(registry: &FilterRegistry) -> PluginManifest {
    PluginManifest {
        plugin: PluginInfo::current(),
        filters: all_filter_descriptors(registry),
    }
}
