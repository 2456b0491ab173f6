//! Casting raw flow-run parameters to declared types.
//!
//! Flow-run parameters arrive as JSON (from the CLI, a deployment, or a
//! parent flow). Before a flow body runs, each declared parameter is coerced
//! to its type: strings holding numbers or booleans are parsed, integral
//! floats become integers, and so on. Undeclared parameters pass through.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::param::{Param, Parameters};

/// The type a flow declares for one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
  Any,
  String,
  Integer,
  Number,
  Boolean,
  Array,
  Object,
}

/// A declared parameter: its type and an optional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
  pub param_type: ParamType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<Value>,
}

impl ParamSpec {
  pub fn required(param_type: ParamType) -> Self {
    Self {
      param_type,
      default: None,
    }
  }

  pub fn with_default(param_type: ParamType, default: Value) -> Self {
    Self {
      param_type,
      default: Some(default),
    }
  }
}

/// Parameters that could not be cast to their declared types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct ParameterTypeError {
  /// `(parameter name, reason)` for every parameter that failed.
  pub errors: Vec<(String, String)>,
}

impl fmt::Display for ParameterTypeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} validation error{} for flow parameters",
      self.errors.len(),
      if self.errors.len() == 1 { "" } else { "s" }
    )?;
    for (name, reason) in &self.errors {
      write!(f, "\n{name}\n  {reason}")?;
    }
    Ok(())
  }
}

/// Cast raw parameters to the declared types.
///
/// Every failing parameter is reported, not only the first.
pub fn cast_parameters(
  specs: &BTreeMap<String, ParamSpec>,
  values: &Map<String, Value>,
) -> Result<Parameters, ParameterTypeError> {
  let mut cast = Parameters::new();
  let mut errors = Vec::new();

  for (name, spec) in specs {
    let value = match (values.get(name), &spec.default) {
      (Some(value), _) => value,
      (None, Some(default)) => default,
      (None, None) => {
        errors.push((name.clone(), "field required".to_string()));
        continue;
      }
    };

    match cast_value(value, spec.param_type) {
      Ok(value) => {
        cast.insert(name.clone(), Param::Value(value));
      }
      Err(reason) => errors.push((name.clone(), reason.to_string())),
    }
  }

  for (name, value) in values {
    if !specs.contains_key(name) {
      cast.insert(name.clone(), Param::Value(value.clone()));
    }
  }

  if errors.is_empty() {
    Ok(cast)
  } else {
    Err(ParameterTypeError { errors })
  }
}

fn cast_value(value: &Value, param_type: ParamType) -> Result<Value, &'static str> {
  match param_type {
    ParamType::Any => Ok(value.clone()),

    ParamType::String => match value {
      Value::String(_) => Ok(value.clone()),
      Value::Number(n) => Ok(Value::String(n.to_string())),
      Value::Bool(b) => Ok(Value::String(b.to_string())),
      _ => Err("str type expected"),
    },

    ParamType::Integer => {
      const INVALID: &str = "value is not a valid integer";
      match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
          // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
          Some(f) if f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f) => {
            Ok(Value::from(f as i64))
          }
          _ => Err(INVALID),
        },
        Value::String(s) => s
          .trim()
          .parse::<i64>()
          .map(Value::from)
          .map_err(|_| INVALID),
        _ => Err(INVALID),
      }
    }

    ParamType::Number => {
      const INVALID: &str = "value is not a valid float";
      match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => s
          .trim()
          .parse::<f64>()
          .ok()
          .and_then(serde_json::Number::from_f64)
          .map(Value::Number)
          .ok_or(INVALID),
        _ => Err(INVALID),
      }
    }

    ParamType::Boolean => {
      const INVALID: &str = "value could not be parsed to a boolean";
      match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => match n.as_i64() {
          Some(0) => Ok(Value::Bool(false)),
          Some(1) => Ok(Value::Bool(true)),
          _ => Err(INVALID),
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
          "true" | "1" | "yes" | "on" | "t" | "y" => Ok(Value::Bool(true)),
          "false" | "0" | "no" | "off" | "f" | "n" => Ok(Value::Bool(false)),
          _ => Err(INVALID),
        },
        _ => Err(INVALID),
      }
    }

    ParamType::Array => match value {
      Value::Array(_) => Ok(value.clone()),
      Value::String(s) => match serde_json::from_str::<Value>(s) {
        Ok(parsed @ Value::Array(_)) => Ok(parsed),
        _ => Err("value is not a valid list"),
      },
      _ => Err("value is not a valid list"),
    },

    ParamType::Object => match value {
      Value::Object(_) => Ok(value.clone()),
      Value::String(s) => match serde_json::from_str::<Value>(s) {
        Ok(parsed @ Value::Object(_)) => Ok(parsed),
        _ => Err("value is not a valid dict"),
      },
      _ => Err("value is not a valid dict"),
    },
  }
}
