//! Port codec
//!
//! Converts between caller values and wire values using a unit's port
//! signature. `shrink` runs before a value is sent, `expand` after it is
//! received. The structural codec only validates shapes and reduces model
//! instances to their identifiers; richer codecs plug in through the trait.

use crate::error::{Error, Result};
use crate::message::{Args, Kwargs};
use crate::unit::{Port, PortKind, Unit};
use async_trait::async_trait;
use serde_json::Value;

/// Shrink/expand step applied at the edges of an assignment
#[async_trait]
pub trait PortCodec: Send + Sync {
    /// Caller side: typed inputs to wire inputs
    async fn shrink_inputs(&self, unit: &Unit, args: Args, kwargs: Kwargs) -> Result<(Args, Kwargs)>;

    /// Worker side: wire inputs to typed inputs
    async fn expand_inputs(&self, unit: &Unit, args: Args, kwargs: Kwargs) -> Result<(Args, Kwargs)>;

    /// Worker side: typed outputs to wire outputs
    async fn shrink_outputs(&self, unit: &Unit, returns: Vec<Value>) -> Result<Vec<Value>>;

    /// Caller side: wire outputs to typed outputs
    async fn expand_outputs(&self, unit: &Unit, returns: Vec<Value>) -> Result<Vec<Value>>;
}

/// Codec that validates values against the port signature
#[derive(Debug, Clone, Default)]
pub struct StructuralCodec;

impl StructuralCodec {
    pub fn new() -> Self {
        Self
    }

    fn check_inputs(unit: &Unit, args: Args, mut kwargs: Kwargs) -> Result<(Args, Kwargs)> {
        if args.len() > unit.args.len() {
            return Err(Error::port_mismatch(
                unit.qualified_name(),
                format!(
                    "takes {} positional arguments but {} were given",
                    unit.args.len(),
                    args.len()
                ),
            ));
        }

        let mut checked_args = Vec::with_capacity(args.len());
        for (port, value) in unit.args.iter().zip(args) {
            checked_args.push(check_value(port, value)?);
        }
        // Missing trailing args must be optional
        if let Some(port) = unit.args[checked_args.len()..].iter().find(|p| p.required) {
            return Err(Error::port_mismatch(&port.key, "missing required argument"));
        }

        if let Some(key) = kwargs
            .keys()
            .find(|key| !unit.kwargs.iter().any(|port| &port.key == *key))
        {
            return Err(Error::port_mismatch(key.as_str(), "unexpected keyword argument"));
        }

        let mut checked_kwargs = Kwargs::new();
        for port in &unit.kwargs {
            match kwargs.remove(&port.key) {
                Some(value) => {
                    checked_kwargs.insert(port.key.clone(), check_value(port, value)?);
                }
                None if port.required => {
                    return Err(Error::port_mismatch(&port.key, "missing required keyword argument"));
                }
                None => {}
            }
        }

        Ok((checked_args, checked_kwargs))
    }

    fn check_outputs(unit: &Unit, returns: Vec<Value>) -> Result<Vec<Value>> {
        // Units without declared returns pass values through untouched
        if unit.returns.is_empty() {
            return Ok(returns);
        }
        if returns.len() != unit.returns.len() {
            return Err(Error::port_mismatch(
                unit.qualified_name(),
                format!(
                    "declares {} return ports but {} values were produced",
                    unit.returns.len(),
                    returns.len()
                ),
            ));
        }
        unit.returns
            .iter()
            .zip(returns)
            .map(|(port, value)| check_value(port, value))
            .collect()
    }
}

#[async_trait]
impl PortCodec for StructuralCodec {
    async fn shrink_inputs(&self, unit: &Unit, args: Args, kwargs: Kwargs) -> Result<(Args, Kwargs)> {
        Self::check_inputs(unit, args, kwargs)
    }

    async fn expand_inputs(&self, unit: &Unit, args: Args, kwargs: Kwargs) -> Result<(Args, Kwargs)> {
        Self::check_inputs(unit, args, kwargs)
    }

    async fn shrink_outputs(&self, unit: &Unit, returns: Vec<Value>) -> Result<Vec<Value>> {
        Self::check_outputs(unit, returns)
    }

    async fn expand_outputs(&self, unit: &Unit, returns: Vec<Value>) -> Result<Vec<Value>> {
        Self::check_outputs(unit, returns)
    }
}

/// Validate one value against its port, reducing model instances to ids
fn check_value(port: &Port, value: Value) -> Result<Value> {
    if value.is_null() {
        if port.required {
            return Err(Error::port_mismatch(&port.key, "required port received null"));
        }
        return Ok(value);
    }

    let matches = match &port.kind {
        PortKind::Int => value.is_i64() || value.is_u64(),
        PortKind::Float => value.is_number(),
        PortKind::Bool => value.is_boolean(),
        PortKind::String => value.is_string(),
        PortKind::Any => true,
        PortKind::Model { identifier } => {
            return match value {
                Value::String(_) => Ok(value),
                Value::Number(ref n) => Ok(Value::String(n.to_string())),
                Value::Object(ref object) => match object.get("id") {
                    Some(Value::String(id)) => Ok(Value::String(id.clone())),
                    Some(Value::Number(id)) => Ok(Value::String(id.to_string())),
                    _ => Err(Error::port_mismatch(
                        &port.key,
                        format!("{} instance has no id", identifier),
                    )),
                },
                _ => Err(Error::port_mismatch(
                    &port.key,
                    format!("expected {} reference", identifier),
                )),
            };
        }
    };

    if !matches {
        return Err(Error::port_mismatch(
            &port.key,
            format!("expected {:?}, got {}", port.kind, value),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{UnitId, UnitKind};
    use serde_json::json;

    fn unit() -> Unit {
        Unit::builder(UnitId::new("7").unwrap(), "threshold", UnitKind::Function)
            .arg(Port::new("image", PortKind::Model { identifier: "representation".into() }))
            .arg(Port::new("level", PortKind::Int).optional())
            .kwarg(Port::new("name", PortKind::String).optional())
            .returns(Port::new("mask", PortKind::Model { identifier: "representation".into() }))
            .build()
    }

    #[tokio::test]
    async fn test_shrink_reduces_models_to_ids() {
        let codec = StructuralCodec::new();
        let (args, kwargs) = codec
            .shrink_inputs(&unit(), vec![json!({"id": 12, "name": "x"})], Kwargs::new())
            .await
            .unwrap();
        assert_eq!(args, vec![json!("12")]);
        assert!(kwargs.is_empty());
    }

    #[tokio::test]
    async fn test_too_many_args_rejected() {
        let codec = StructuralCodec::new();
        let err = codec
            .shrink_inputs(&unit(), vec![json!("1"), json!(2), json!(3)], Kwargs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PortMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_required_arg_rejected() {
        let codec = StructuralCodec::new();
        let err = codec
            .expand_inputs(&unit(), vec![], Kwargs::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image"));
    }

    #[tokio::test]
    async fn test_type_mismatch_and_unknown_kwarg() {
        let codec = StructuralCodec::new();
        let err = codec
            .expand_inputs(&unit(), vec![json!("1"), json!("high")], Kwargs::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("level"));

        let mut kwargs = Kwargs::new();
        kwargs.insert("colour".into(), json!("red"));
        let err = codec
            .expand_inputs(&unit(), vec![json!("1")], kwargs)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[tokio::test]
    async fn test_output_arity_checked() {
        let codec = StructuralCodec::new();
        assert!(codec.shrink_outputs(&unit(), vec![json!("5")]).await.is_ok());
        assert!(codec
            .shrink_outputs(&unit(), vec![json!("5"), json!("6")])
            .await
            .is_err());
    }
}
