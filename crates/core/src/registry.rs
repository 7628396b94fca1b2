use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Result};

use crate::node::{Clip, PortDefinition};
use crate::types::{PortData, PortType};

type FilterFactory = dyn Fn(&FilterArgs) -> Result<Clip> + Send + Sync;

struct FilterEntry {
    ports: Vec<PortDefinition>,
    factory: Box<FilterFactory>,
}

/// Validated arguments handed to a filter factory.
///
/// Every declared port is present: missing optional arguments have been
/// filled from their defaults before the factory runs.
#[derive(Clone)]
pub struct FilterArgs {
    filter: String,
    values: HashMap<String, PortData>,
}

impl FilterArgs {
    pub fn filter(&self) -> &str {
        &self.filter
    }

    fn get(&self, name: &str) -> Result<&PortData> {
        self.values
            .get(name)
            .ok_or_else(|| anyhow!("{}: argument '{name}' is not set", self.filter))
    }

    pub fn clip(&self, name: &str) -> Result<Clip> {
        match self.get(name)? {
            PortData::Clip(clip) => Ok(clip.clone()),
            other => bail!(self.type_error(name, "Clip", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            PortData::Int(v) => Ok(*v),
            other => bail!(self.type_error(name, "Int", other)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            PortData::Float(v) => Ok(*v),
            PortData::Int(v) => Ok(*v as f64),
            other => bail!(self.type_error(name, "Float", other)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            PortData::Str(v) => Ok(v.as_str()),
            other => bail!(self.type_error(name, "Str", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            PortData::Bool(v) => Ok(*v),
            other => bail!(self.type_error(name, "Bool", other)),
        }
    }

    pub fn path(&self, name: &str) -> Result<&Path> {
        match self.get(name)? {
            PortData::Path(v) => Ok(v.as_path()),
            PortData::Str(v) => Ok(Path::new(v)),
            other => bail!(self.type_error(name, "Path", other)),
        }
    }

    fn type_error(&self, name: &str, expected: &str, got: &PortData) -> String {
        format!(
            "{}: argument '{name}' must be {expected}, got {:?}",
            self.filter,
            got.port_type()
        )
    }
}

pub struct FilterRegistry {
    filters: HashMap<String, FilterEntry>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, ports: Vec<PortDefinition>, factory: F)
    where
        F: Fn(&FilterArgs) -> Result<Clip> + Send + Sync + 'static,
    {
        self.filters.insert(
            name.to_string(),
            FilterEntry {
                ports,
                factory: Box::new(factory),
            },
        );
    }

    pub fn ports(&self, name: &str) -> Option<&[PortDefinition]> {
        self.filters.get(name).map(|entry| entry.ports.as_slice())
    }

    /// Check `args` against the filter's ports and run its factory.
    pub fn create(&self, name: &str, mut args: HashMap<String, PortData>) -> Result<Clip> {
        let entry = self
            .filters
            .get(name)
            .ok_or_else(|| anyhow!("unknown filter: {name}"))?;

        let mut unknown: Vec<&str> = args
            .keys()
            .filter(|key| !entry.ports.iter().any(|port| &port.name == *key))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            bail!("{name}: unknown argument(s): {}", unknown.join(", "));
        }

        let mut values = HashMap::with_capacity(entry.ports.len());
        for port in &entry.ports {
            let value = match args.remove(&port.name) {
                Some(value) => coerce(name, port, value)?,
                None if port.required => {
                    bail!("{name}: missing required argument '{}'", port.name)
                }
                None => match &port.default_value {
                    Some(default) => PortData::from_json(&port.port_type, default)?,
                    None => continue,
                },
            };
            values.insert(port.name.clone(), value);
        }

        let args = FilterArgs {
            filter: name.to_string(),
            values,
        };
        (entry.factory)(&args)
    }

    pub fn list_filters(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(|v| v.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept exact matches plus the lossless widenings a JSON or CLI value
/// commonly needs (Int to Float, Str to Path).
fn coerce(filter: &str, port: &PortDefinition, value: PortData) -> Result<PortData> {
    let actual = value.port_type();
    if actual.is_compatible(&port.port_type) {
        return Ok(value);
    }

    match (port.port_type.clone(), value) {
        (PortType::Float, PortData::Int(v)) => Ok(PortData::Float(v as f64)),
        (PortType::Path, PortData::Str(v)) => Ok(PortData::Path(v.into())),
        (expected, _) => bail!(
            "{filter}: argument '{}' must be {expected:?}, got {actual:?}",
            port.name
        ),
    }
}

/// Register every filter shipped with `atrous-core`.
pub fn register_all_filters(registry: &mut FilterRegistry) {
    use crate::nodes::blank_clip::{self, BlankClip};
    use crate::nodes::extract_frequency::{self, ExtractFrequency};
    use crate::nodes::replace_frequency::{self, ReplaceFrequency};
    use crate::nodes::y4m_source::{self, Y4mSource};

    registry.register(extract_frequency::NAME, ExtractFrequency::ports(), |args| {
        Ok(std::sync::Arc::new(ExtractFrequency::from_args(args)?))
    });
    registry.register(replace_frequency::NAME, ReplaceFrequency::ports(), |args| {
        Ok(std::sync::Arc::new(ReplaceFrequency::from_args(args)?))
    });
    registry.register(blank_clip::NAME, BlankClip::ports(), |args| {
        Ok(std::sync::Arc::new(BlankClip::from_args(args)?))
    });
    registry.register(y4m_source::NAME, Y4mSource::ports(), |args| {
        Ok(std::sync::Arc::new(Y4mSource::from_args(args)?))
    });
}

pub fn build_default_registry() -> FilterRegistry {
    let mut registry = FilterRegistry::new();
    register_all_filters(&mut registry);
    registry
}
