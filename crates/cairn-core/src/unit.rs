//! Units, ports and templates
//!
//! A unit is a named, versioned computational capability with a declared
//! port signature. Units are immutable once provisioned and are shared
//! by reference (`Arc<Unit>`), never owned by the actor or the reservation.

use crate::constants::UNIT_ID_LENGTH_BYTES_MAX;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a unit
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Create a unit id with validation
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > UNIT_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidConfiguration {
                field: "unit.id".into(),
                reason: format!(
                    "length {} must be in 1..={}",
                    id.len(),
                    UNIT_ID_LENGTH_BYTES_MAX
                ),
            });
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a unit returns once or yields many times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Single result; invoked with `call`
    Function,
    /// Sequence of results; invoked with `stream`
    Generator,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Function => write!(f, "function"),
            UnitKind::Generator => write!(f, "generator"),
        }
    }
}

/// Type carried by a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortKind {
    Int,
    Float,
    Bool,
    String,
    /// Reference to a model instance, shipped as its identifier
    Model { identifier: String },
    /// Anything; no structural checks
    Any,
}

/// A single input or output port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub key: String,
    pub kind: PortKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Port {
    /// Create a required port
    pub fn new(key: impl Into<String>, kind: PortKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: true,
            description: None,
        }
    }

    /// Mark the port optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, versioned computational capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub package: String,
    pub interface: String,
    #[serde(default)]
    pub version: Option<String>,
    pub kind: UnitKind,
    #[serde(default)]
    pub args: Vec<Port>,
    #[serde(default)]
    pub kwargs: Vec<Port>,
    #[serde(default)]
    pub returns: Vec<Port>,
}

impl Unit {
    /// Start building a unit
    pub fn builder(id: UnitId, interface: impl Into<String>, kind: UnitKind) -> UnitBuilder {
        let interface = interface.into();
        UnitBuilder {
            unit: Unit {
                id,
                name: interface.clone(),
                package: String::new(),
                interface,
                version: None,
                kind,
                args: Vec::new(),
                kwargs: Vec::new(),
                returns: Vec::new(),
            },
        }
    }

    /// Fully qualified name (package/interface)
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.interface.clone()
        } else {
            format!("{}/{}", self.package, self.interface)
        }
    }

    /// Fail unless the unit is of the expected kind
    pub fn expect_kind(&self, expected: UnitKind) -> Result<()> {
        if self.kind != expected {
            return Err(Error::WrongUnitKind {
                unit: self.qualified_name(),
                expected: expected.to_string(),
                actual: self.kind.to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for units
pub struct UnitBuilder {
    unit: Unit,
}

impl UnitBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.unit.name = name.into();
        self
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.unit.package = package.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.unit.version = Some(version.into());
        self
    }

    pub fn arg(mut self, port: Port) -> Self {
        self.unit.args.push(port);
        self
    }

    pub fn kwarg(mut self, port: Port) -> Self {
        self.unit.kwargs.push(port);
        self
    }

    pub fn returns(mut self, port: Port) -> Self {
        self.unit.returns.push(port);
        self
    }

    pub fn build(self) -> Unit {
        self.unit
    }
}

/// Descriptor of a provisionable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub unit: Unit,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Template {
    /// Create a template for a unit
    pub fn new(id: impl Into<String>, unit: Unit) -> Self {
        Self {
            id: id.into(),
            unit,
            params: serde_json::Map::new(),
        }
    }
}
