//! Strict parameter schemas for task submissions.

use dsc_types::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    /// A string that must also pass domain validation.
    Domain,
    StringList,
    Integer,
    Boolean,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String | Self::Domain => value.is_string(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Domain => "a domain string",
            Self::StringList => "a list of strings",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Shape descriptor for a task's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    fields: Vec<FieldSpec>,
}

impl ParameterSchema {
    /// Fields every task accepts: `owner_id` (required) and `parent_id`.
    pub fn base() -> Self {
        Self {
            fields: vec![
                FieldSpec {
                    name: "owner_id".to_string(),
                    kind: FieldKind::String,
                    required: true,
                },
                FieldSpec {
                    name: "parent_id".to_string(),
                    kind: FieldKind::String,
                    required: false,
                },
            ],
        }
    }

    /// An empty schema. Only useful for describing a broken plug-in.
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add or replace a field.
    pub fn field(mut self, name: &str, kind: FieldKind, required: bool) -> Self {
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that the schema keeps `owner_id` a required string and
    /// `parent_id` an optional string.
    pub fn check_base_contract(&self) -> Result<()> {
        match self.get("owner_id") {
            Some(f) if f.kind == FieldKind::String && f.required => {}
            _ => {
                return Err(DiscoveryError::Plugin(
                    "owner_id must be a required string".to_string(),
                ))
            }
        }
        match self.get("parent_id") {
            Some(f) if f.kind == FieldKind::String && !f.required => Ok(()),
            _ => Err(DiscoveryError::Plugin(
                "parent_id must be an optional string".to_string(),
            )),
        }
    }

    /// Strictly validate `raw` and return its fields.
    ///
    /// `raw` must be an object; required fields must be present and types must
    /// match exactly. Unknown fields are dropped from the result.
    pub fn validate(&self, raw: &Value) -> Result<Map<String, Value>> {
        let object = raw.as_object().ok_or_else(|| {
            DiscoveryError::Validation("Parameters must be an object.".to_string())
        })?;

        let mut problems = Vec::new();

        for spec in &self.fields {
            match object.get(&spec.name) {
                None if spec.required => problems.push(format!("{}: field required", spec.name)),
                None => {}
                Some(value) if !spec.kind.matches(value) => problems.push(format!(
                    "{}: expected {}",
                    spec.name,
                    spec.kind.describe()
                )),
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(object
                .iter()
                .filter(|(key, _)| self.get(key).is_some())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect())
        } else {
            Err(DiscoveryError::Validation(problems.join("; ")))
        }
    }

    /// `(field, value)` of every present domain-typed field.
    pub fn domain_values<'a>(&self, params: &'a Map<String, Value>) -> Vec<(&str, &'a str)> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Domain)
            .filter_map(|f| {
                params
                    .get(&f.name)
                    .and_then(Value::as_str)
                    .map(|v| (f.name.as_str(), v))
            })
            .collect()
    }
}

/// Fields shared by every task's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseParameters {
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}
