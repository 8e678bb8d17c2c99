//! Tune parameters, their values, and restriction predicates over them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::{SearchSpaceError, TuneResult};

/// A concrete value a tune parameter can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Json(serde_json::Value::String(v.to_string()))
    }
}

/// Render a configuration as `[v0, v1, ...]` for logs and error messages.
pub fn format_configuration(values: &[ParameterValue]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// A single named tune parameter and its ordered domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneParam {
    pub name: String,
    /// Admissible values. Order defines neighbor distance after normalization.
    pub values: Vec<ParameterValue>,
}

/// The ordered set of tune parameters for a kernel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuneParams {
    params: Vec<TuneParam>,
}

impl TuneParams {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn add(mut self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.params.push(TuneParam {
            name: name.into(),
            values,
        });
        self
    }

    pub fn add_ints(self, name: impl Into<String>, values: &[i64]) -> Self {
        self.add(name, values.iter().copied().map(ParameterValue::Int).collect())
    }

    pub fn add_floats(self, name: impl Into<String>, values: &[f64]) -> Self {
        self.add(name, values.iter().copied().map(ParameterValue::Float).collect())
    }

    /// Reject empty domains, duplicate names, and domains whose values are
    /// not pairwise distinct.
    pub fn validate(&self) -> TuneResult<()> {
        let mut seen = HashSet::new();
        for param in &self.params {
            if param.values.is_empty() {
                return Err(SearchSpaceError::EmptyDomain {
                    parameter: param.name.clone(),
                }
                .into());
            }
            if param
                .values
                .iter()
                .any(|v| matches!(v, ParameterValue::Float(f) if f.is_nan()))
            {
                return Err(SearchSpaceError::NanValue {
                    parameter: param.name.clone(),
                }
                .into());
            }
            for (i, value) in param.values.iter().enumerate() {
                if param.values[..i].contains(value) {
                    return Err(SearchSpaceError::DuplicateValue {
                        parameter: param.name.clone(),
                        value: value.to_string(),
                    }
                    .into());
                }
            }
            if !seen.insert(param.name.as_str()) {
                return Err(SearchSpaceError::DuplicateParameter {
                    parameter: param.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TuneParam> {
        self.params.iter()
    }

    pub fn get(&self, index: usize) -> Option<&TuneParam> {
        self.params.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Named view over a configuration laid out in declaration order.
    pub fn view<'a>(&'a self, values: &'a [ParameterValue]) -> ConfigView<'a> {
        ConfigView {
            params: self,
            values,
        }
    }
}

/// Read-only, name-addressable view of one configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConfigView<'a> {
    params: &'a TuneParams,
    values: &'a [ParameterValue],
}

impl<'a> ConfigView<'a> {
    pub fn get(&self, name: &str) -> Option<&'a ParameterValue> {
        self.params.position(name).and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &'a [ParameterValue] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a ParameterValue)> {
        self.params.names().zip(self.values.iter())
    }

    pub fn to_map(&self) -> HashMap<String, ParameterValue> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

impl fmt::Display for ConfigView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(n, v)| format!("{n}={v}")).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Validity predicate over a full configuration.
#[derive(Clone)]
pub struct Restriction {
    predicate: Arc<dyn Fn(&ConfigView<'_>) -> bool + Send + Sync>,
}

impl Restriction {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ConfigView<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn check(&self, config: &ConfigView<'_>) -> bool {
        (self.predicate)(config)
    }
}

impl fmt::Debug for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Restriction(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> TuneParams {
        TuneParams::new()
            .add_ints("block_size_x", &[16, 32, 64])
            .add_ints("tile", &[1, 2])
            .add("layout", vec!["row".into(), "col".into()])
    }

    #[test]
    fn validate_rejects_empty_domain() {
        let params = TuneParams::new().add_ints("x", &[]);
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("empty domain"));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let params = TuneParams::new().add_ints("x", &[1]).add_ints("x", &[2]);
        assert!(params.validate().is_err());
        assert!(sample_params().validate().is_ok());
    }

    #[test]
    fn validate_rejects_repeated_values() {
        let params = TuneParams::new().add_ints("x", &[1, 2, 1]);
        assert_eq!(
            params.validate().unwrap_err().to_string(),
            "Search space error: Value 1 appears more than once in the domain of parameter x"
        );
        let params = TuneParams::new().add("layout", vec!["row".into(), "row".into()]);
        assert!(params.validate().is_err());
        // Same number, different representation.
        let params = TuneParams::new().add("x", vec![1i64.into(), 1.0f64.into()]);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn validate_rejects_nan() {
        let params = TuneParams::new().add_floats("ratio", &[0.5, f64::NAN]);
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn view_resolves_by_name() {
        let params = sample_params();
        let values = vec![
            ParameterValue::Int(32),
            ParameterValue::Int(2),
            ParameterValue::from("col"),
        ];
        let view = params.view(&values);
        assert_eq!(view.get("tile"), Some(&ParameterValue::Int(2)));
        assert_eq!(view.get("missing"), None);
        assert_eq!(view.to_string(), "block_size_x=32, tile=2, layout=\"col\"");
    }

    #[test]
    fn restriction_sees_named_values() {
        let params = sample_params();
        let restriction = Restriction::new(|c| {
            let bx = c.get("block_size_x").and_then(|v| v.as_i64()).unwrap_or(0);
            let tile = c.get("tile").and_then(|v| v.as_i64()).unwrap_or(0);
            bx * tile <= 64
        });
        let ok = vec![ParameterValue::Int(32), ParameterValue::Int(2), "row".into()];
        let bad = vec![ParameterValue::Int(64), ParameterValue::Int(2), "row".into()];
        assert!(restriction.check(&params.view(&ok)));
        assert!(!restriction.check(&params.view(&bad)));
    }

    #[test]
    fn untagged_values_deserialize_as_ints_first() {
        let values: Vec<ParameterValue> = serde_json::from_str(r#"[4, 0.5, "x"]"#).unwrap();
        assert_eq!(values[0], ParameterValue::Int(4));
        assert_eq!(values[1], ParameterValue::Float(0.5));
        assert_eq!(values[2], ParameterValue::from("x"));
    }

    #[test]
    fn tune_params_serialize_in_order() {
        let params = sample_params();
        let json = serde_json::to_string(&params).unwrap();
        let back: TuneParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["block_size_x", "tile", "layout"]);
    }
}
