//! The report artifact and the schema it is declared against.
//!
//! A [`ReportSchema`] is declared up front, compiled once into a JSON Schema
//! contract, handed to the AI collaborator as the required output shape, and
//! used again to validate whatever comes back.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Result, SynthesisError, WizardError};

/// Declared type of a report field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportFieldType {
    String,
    StringArray,
    Object { schema: ReportSchema },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportField {
    pub name: String,
    #[serde(flatten)]
    pub field_type: ReportFieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl ReportField {
    fn with_type(name: impl Into<String>, field_type: ReportFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            description: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::with_type(name, ReportFieldType::String)
    }

    pub fn string_array(name: impl Into<String>) -> Self {
        Self::with_type(name, ReportFieldType::StringArray)
    }

    pub fn object(name: impl Into<String>, schema: ReportSchema) -> Self {
        Self::with_type(name, ReportFieldType::Object { schema })
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Ordered set of named, typed report fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSchema {
    pub fields: Vec<ReportField>,
}

impl ReportSchema {
    pub fn new(fields: Vec<ReportField>) -> Self {
        Self { fields }
    }

    pub fn with_field(mut self, field: ReportField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&ReportField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Derive a declared schema from a Rust type.
    ///
    /// Only strings, arrays of strings and nested structs are accepted; `Option`
    /// marks a field as not required.
    pub fn from_type<T: JsonSchema>() -> Result<Self> {
        let root = serde_json::to_value(schemars::schema_for!(T))?;
        let defs = root
            .get("$defs")
            .or_else(|| root.get("definitions"))
            .cloned()
            .unwrap_or(Value::Null);
        object_from_json_schema(&root, &defs, std::any::type_name::<T>())
    }

    /// Check declaration rules: at least one field, unique non-empty names, recursively.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(WizardError::InvalidDefinition(
                "report schema declares no fields".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || !seen.insert(field.name.as_str()) {
                return Err(WizardError::InvalidDefinition(format!(
                    "report field name `{}` is empty or repeated",
                    field.name
                )));
            }
            if let ReportFieldType::Object { schema } = &field.field_type {
                schema.validate()?;
            }
        }
        Ok(())
    }

    /// JSON Schema sent to the collaborator as the output contract.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut property = match &field.field_type {
                ReportFieldType::String => json!({ "type": "string" }),
                ReportFieldType::StringArray => {
                    json!({ "type": "array", "items": { "type": "string" } })
                }
                ReportFieldType::Object { schema } => schema.to_json_schema(),
            };
            if let (Some(description), Some(obj)) = (&field.description, property.as_object_mut())
            {
                obj.insert("description".to_string(), json!(description));
            }
            properties.insert(field.name.clone(), property);
            if field.required {
                required.push(json!(field.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Keep only declared fields, recursively.
    fn prune(&self, value: &mut Value) {
        let Some(obj) = value.as_object_mut() else {
            return;
        };
        obj.retain(|key, _| self.field(key).is_some());
        for field in &self.fields {
            if let (ReportFieldType::Object { schema }, Some(child)) =
                (&field.field_type, obj.get_mut(&field.name))
            {
                schema.prune(child);
            }
        }
    }
}

fn object_from_json_schema(node: &Value, defs: &Value, context: &str) -> Result<ReportSchema> {
    let node = resolve(node, defs);
    let properties = node
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            WizardError::InvalidDefinition(format!("`{context}` is not an object with properties"))
        })?;
    let required: HashSet<&str> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields = Vec::new();
    for (name, property) in properties {
        let property = resolve(property, defs);
        let field_type = field_type_from_json_schema(property, defs, name)?;
        let mut field = ReportField::with_type(name.clone(), field_type);
        field.required = required.contains(name.as_str());
        field.description = property
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        fields.push(field);
    }
    Ok(ReportSchema::new(fields))
}

fn field_type_from_json_schema(node: &Value, defs: &Value, name: &str) -> Result<ReportFieldType> {
    match primary_type(node) {
        Some("string") => Ok(ReportFieldType::String),
        Some("array") => {
            let items = node.get("items").map(|items| resolve(items, defs));
            match items.and_then(primary_type) {
                Some("string") => Ok(ReportFieldType::StringArray),
                _ => Err(WizardError::InvalidDefinition(format!(
                    "report field `{name}` must be an array of strings"
                ))),
            }
        }
        Some("object") => Ok(ReportFieldType::Object {
            schema: object_from_json_schema(node, defs, name)?,
        }),
        _ => Err(WizardError::InvalidDefinition(format!(
            "report field `{name}` has an unsupported type"
        ))),
    }
}

/// Follow `$ref`, single-element `allOf`, and `Option<_>`-style `anyOf` with `null`.
fn resolve<'a>(node: &'a Value, defs: &'a Value) -> &'a Value {
    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or(reference);
        if let Some(target) = defs.get(name) {
            return resolve(target, defs);
        }
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(variants) = node.get(combinator).and_then(Value::as_array) {
            let non_null: Vec<&Value> = variants
                .iter()
                .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
                .collect();
            if let [only] = non_null.as_slice() {
                return resolve(only, defs);
            }
        }
    }
    node
}

fn primary_type(node: &Value) -> Option<&str> {
    match node.get("type")? {
        Value::String(ty) => Some(ty.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|ty| *ty != "null"),
        _ => None,
    }
}

/// A report schema compiled into its JSON Schema contract and validator.
#[derive(Clone)]
pub struct CompiledReportSchema {
    declared: ReportSchema,
    contract: Value,
    validator: Arc<jsonschema::Validator>,
}

impl std::fmt::Debug for CompiledReportSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledReportSchema")
            .field("declared", &self.declared)
            .finish_non_exhaustive()
    }
}

impl CompiledReportSchema {
    pub fn compile(declared: ReportSchema) -> Result<Self> {
        declared.validate()?;
        let contract = declared.to_json_schema();
        let validator = jsonschema::validator_for(&contract)
            .map_err(|e| WizardError::InvalidDefinition(format!("report schema: {e}")))?;
        Ok(Self {
            declared,
            contract,
            validator: Arc::new(validator),
        })
    }

    pub fn declared(&self) -> &ReportSchema {
        &self.declared
    }

    pub fn contract(&self) -> &Value {
        &self.contract
    }

    /// Validate a collaborator response and return the pruned payload.
    pub fn accept(&self, mut value: Value) -> std::result::Result<Map<String, Value>, SynthesisError> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(SynthesisError::SchemaMismatch { violations });
        }

        let before = value.as_object().map(Map::len).unwrap_or(0);
        self.declared.prune(&mut value);
        match value {
            Value::Object(content) => {
                if content.len() < before {
                    debug!(
                        dropped = before - content.len(),
                        "Dropped undeclared top-level report fields"
                    );
                }
                Ok(content)
            }
            other => Err(SynthesisError::SchemaMismatch {
                violations: vec![format!("expected an object, got {other}")],
            }),
        }
    }
}

/// Schema-validated output of synthesis, attached to a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub content: Map<String, Value>,
    /// SHA-256 of the prompt and contract that produced this report.
    pub prompt_digest: String,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(content: Map<String, Value>, prompt_digest: impl Into<String>) -> Self {
        Self {
            content,
            prompt_digest: prompt_digest.into(),
            generated_at: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.content.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Deserialize the payload into a typed report.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.content.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn career_schema() -> ReportSchema {
        ReportSchema::new(vec![
            ReportField::string("summary").with_description("Two sentence overview"),
            ReportField::string_array("strengths"),
            ReportField::object(
                "plan",
                ReportSchema::new(vec![
                    ReportField::string("first_step"),
                    ReportField::string_array("resources").optional(),
                ]),
            ),
        ])
    }

    #[test]
    fn test_contract_shape() {
        let contract = career_schema().to_json_schema();
        assert_eq!(contract["type"], "object");
        assert_eq!(contract["required"], json!(["summary", "strengths", "plan"]));
        assert_eq!(contract["properties"]["strengths"]["items"]["type"], "string");
        assert_eq!(contract["properties"]["plan"]["required"], json!(["first_step"]));
        assert_eq!(
            contract["properties"]["summary"]["description"],
            "Two sentence overview"
        );
    }

    #[test]
    fn test_accepts_valid_payload_and_prunes_extras() {
        let compiled = CompiledReportSchema::compile(career_schema()).unwrap();
        let content = compiled
            .accept(json!({
                "summary": "Strong systems thinker.",
                "strengths": ["debugging"],
                "plan": {"first_step": "Pick a mentor", "mood": "great"},
                "chatter": "ignored"
            }))
            .unwrap();
        assert!(content.get("chatter").is_none());
        assert_eq!(content["plan"], json!({"first_step": "Pick a mentor"}));
    }

    #[test]
    fn test_rejects_missing_array_and_wrong_types() {
        let compiled = CompiledReportSchema::compile(career_schema()).unwrap();

        let missing = compiled.accept(json!({
            "summary": "ok",
            "plan": {"first_step": "x"}
        }));
        assert!(matches!(missing, Err(SynthesisError::SchemaMismatch { .. })));

        let not_array = compiled.accept(json!({
            "summary": "ok",
            "strengths": "debugging",
            "plan": {"first_step": "x"}
        }));
        assert!(not_array.is_err());

        let bad_nested = compiled.accept(json!({
            "summary": "ok",
            "strengths": [],
            "plan": {"resources": ["book"]}
        }));
        assert!(bad_nested.is_err());
    }

    #[test]
    fn test_rejects_bad_declarations() {
        assert!(CompiledReportSchema::compile(ReportSchema::default()).is_err());
        let duplicate = ReportSchema::new(vec![
            ReportField::string("a"),
            ReportField::string_array("a"),
        ]);
        assert!(duplicate.validate().is_err());
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Roadmap {
        /// Where to start.
        first_step: String,
        milestones: Vec<String>,
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct CareerReport {
        summary: String,
        strengths: Vec<String>,
        roadmap: Roadmap,
        caveat: Option<String>,
    }

    #[test]
    fn test_from_type_and_decode() {
        let schema = ReportSchema::from_type::<CareerReport>().unwrap();
        assert!(schema.field("summary").unwrap().required);
        assert_eq!(
            schema.field("strengths").unwrap().field_type,
            ReportFieldType::StringArray
        );
        assert!(!schema.field("caveat").unwrap().required);
        match &schema.field("roadmap").unwrap().field_type {
            ReportFieldType::Object { schema } => {
                assert_eq!(
                    schema.field("first_step").unwrap().description.as_deref(),
                    Some("Where to start.")
                );
            }
            other => panic!("expected nested object, got {other:?}"),
        }

        let compiled = CompiledReportSchema::compile(schema).unwrap();
        let content = compiled
            .accept(json!({
                "summary": "s",
                "strengths": ["a"],
                "roadmap": {"first_step": "f", "milestones": []}
            }))
            .unwrap();
        let report = Report::new(content, "digest");
        let typed: CareerReport = report.decode().unwrap();
        assert_eq!(typed.roadmap.first_step, "f");
        assert_eq!(typed.caveat, None);
    }
}
