//! Declared resource shapes.
//!
//! A `ResourceSchema` is a static registry of field name -> type, built once at
//! startup and shared read-only. Request checking is explicit set difference against
//! that registry; instance construction walks the declared fields only.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Store-owned envelope keys. They are declared on every resource (so `{ref}` is a legal
/// path parameter) but never accepted from a request body.
pub const ENVELOPE_FIELDS: [&str; 2] = ["ref", "ts"];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Email,
    Url,
    Integer,
    Boolean,
    /// RFC 3339 string or integer epoch.
    Timestamp,
    List(Box<FieldType>),
    Object(ResourceSchema),
}

impl FieldType {
    pub fn list_of(inner: FieldType) -> Self { FieldType::List(Box::new(inner)) }

    fn is_scalar(&self) -> bool { !matches!(self, FieldType::List(_) | FieldType::Object(_)) }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::List(_) => "list",
            FieldType::Object(_) => "object",
        }
    }

    /// Turn a query-string value into a JSON value of this type. Only scalars qualify.
    pub fn coerce_param(&self, raw: &str) -> Option<Value> {
        match self {
            FieldType::Integer => raw.parse::<i64>().ok().map(Value::from),
            FieldType::Boolean => raw.parse::<bool>().ok().map(Value::from),
            FieldType::String | FieldType::Email | FieldType::Url | FieldType::Timestamp => Some(Value::from(raw)),
            FieldType::List(_) | FieldType::Object(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
}

/// A store index over top-level scalar fields, in term order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub terms: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema '{schema}' declares field '{field}' twice")]
    DuplicateField { schema: String, field: String },
    #[error("schema '{schema}' may not declare envelope field '{field}'")]
    ReservedField { schema: String, field: String },
    #[error("schema '{schema}' declares index '{index}' twice")]
    DuplicateIndex { schema: String, index: String },
    #[error("index '{index}' on '{schema}' uses '{term}', which is not a declared scalar field")]
    BadIndexTerm { schema: String, index: String, term: String },
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Instance construction failure, listing every offending field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(|e| format!("{}: {}", e.path, e.message)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { errors: vec![FieldError { path: path.into(), message: message.into() }] }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    name: String,
    fields: Vec<Field>,
    indexes: Vec<IndexSpec>,
}

pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    indexes: Vec<IndexSpec>,
}

impl SchemaBuilder {
    pub fn required(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push(Field { name: name.to_string(), ty, required: true });
        self
    }

    pub fn optional(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push(Field { name: name.to_string(), ty, required: false });
        self
    }

    pub fn index(mut self, name: &str, terms: &[&str]) -> Self {
        self.indexes.push(IndexSpec { name: name.to_string(), terms: terms.iter().map(|t| t.to_string()).collect() });
        self
    }

    pub fn build(self) -> Result<ResourceSchema, SchemaError> {
        let mut seen = BTreeSet::new();
        for f in &self.fields {
            if ENVELOPE_FIELDS.contains(&f.name.as_str()) {
                return Err(SchemaError::ReservedField { schema: self.name.clone(), field: f.name.clone() });
            }
            if !seen.insert(f.name.as_str()) {
                return Err(SchemaError::DuplicateField { schema: self.name.clone(), field: f.name.clone() });
            }
        }
        let mut index_names = BTreeSet::new();
        for ix in &self.indexes {
            if !index_names.insert(ix.name.as_str()) {
                return Err(SchemaError::DuplicateIndex { schema: self.name.clone(), index: ix.name.clone() });
            }
            for term in &ix.terms {
                let ok = self.fields.iter().any(|f| &f.name == term && f.ty.is_scalar());
                if !ok {
                    return Err(SchemaError::BadIndexTerm { schema: self.name.clone(), index: ix.name.clone(), term: term.clone() });
                }
            }
        }
        Ok(ResourceSchema { name: self.name, fields: self.fields, indexes: self.indexes })
    }
}

impl ResourceSchema {
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder { name: name.to_string(), fields: Vec::new(), indexes: Vec::new() }
    }

    /// Resource name; also the store collection and the route segment.
    pub fn name(&self) -> &str { &self.name }

    pub fn fields(&self) -> &[Field] { &self.fields }

    pub fn field(&self, name: &str) -> Option<&Field> { self.fields.iter().find(|f| f.name == name) }

    pub fn indexes(&self) -> &[IndexSpec] { &self.indexes }

    /// Declared data fields plus the envelope fields.
    pub fn is_declared(&self, name: &str) -> bool {
        ENVELOPE_FIELDS.contains(&name) || self.field(name).is_some()
    }

    /// Names not in the declared set, sorted and deduplicated.
    pub fn undeclared<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let given: BTreeSet<&str> = names.into_iter().collect();
        given.into_iter().filter(|n| !self.is_declared(n)).map(str::to_string).collect()
    }

    /// Index whose term set equals `names`, with the names in index term order.
    pub fn index_for(&self, names: &[&str]) -> Option<&IndexSpec> {
        let wanted: BTreeSet<&str> = names.iter().copied().collect();
        self.indexes.iter().find(|ix| {
            let have: BTreeSet<&str> = ix.terms.iter().map(String::as_str).collect();
            have == wanted && ix.terms.len() == names.len()
        })
    }

    /// Keep only declared data fields, recursing into nested objects. Envelope keys are dropped.
    pub fn project(&self, mut body: Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in &self.fields {
            let Some(value) = body.remove(&field.name) else { continue };
            let value = match (&field.ty, value) {
                (FieldType::Object(nested), Value::Object(m)) => Value::Object(nested.project(m)),
                (_, v) => v,
            };
            out.insert(field.name.clone(), value);
        }
        out
    }

    /// Build a full instance: every required field present and every value well-typed.
    pub fn construct(&self, body: Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        self.checked(body, false)
    }

    /// Build a partial instance for updates: only the fields present are checked.
    pub fn construct_partial(&self, body: Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        self.checked(body, true)
    }

    fn checked(&self, body: Map<String, Value>, partial: bool) -> Result<Map<String, Value>, ValidationError> {
        let mut errors = Vec::new();
        self.check_object(&body, "", partial, &mut errors);
        if errors.is_empty() { Ok(body) } else { Err(ValidationError { errors }) }
    }

    fn check_object(&self, obj: &Map<String, Value>, prefix: &str, partial: bool, errors: &mut Vec<FieldError>) {
        for field in &self.fields {
            let path = if prefix.is_empty() { field.name.clone() } else { format!("{prefix}.{}", field.name) };
            match obj.get(&field.name) {
                None if field.required && !partial => errors.push(FieldError { path, message: "field required".into() }),
                Some(Value::Null) if field.required => errors.push(FieldError { path, message: "must not be null".into() }),
                None | Some(Value::Null) => {}
                Some(v) => check_value(&field.ty, v, &path, partial, errors),
            }
        }
    }
}

fn check_value(ty: &FieldType, v: &Value, path: &str, partial: bool, errors: &mut Vec<FieldError>) {
    let ok = match (ty, v) {
        (FieldType::String, Value::String(_)) => true,
        (FieldType::Email, Value::String(s)) => is_email(s),
        (FieldType::Url, Value::String(s)) => is_http_url(s),
        (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Timestamp, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        (FieldType::Timestamp, Value::Number(n)) => n.is_i64(),
        (FieldType::List(inner), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_value(inner, item, &format!("{path}[{i}]"), partial, errors);
            }
            true
        }
        (FieldType::Object(nested), Value::Object(m)) => {
            nested.check_object(m, path, partial, errors);
            true
        }
        _ => false,
    };
    if !ok {
        errors.push(FieldError { path: path.to_string(), message: format!("expected {}", ty.name()) });
    }
}

/// Shape check only: one `@`, a non-empty local part, and a dotted domain of
/// non-empty labels made of alphanumerics and `-`. No RFC 5322 quoting, no IP
/// literals, no deliverability or DNS lookup.
fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else { return false };
    !local.is_empty()
        && !local.chars().any(|c| c.is_whitespace() || c.is_control() || c == '@')
        && domain.contains('.')
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && label.chars().all(|c| c.is_alphanumeric() || c == '-'))
}

fn is_http_url(s: &str) -> bool {
    match url::Url::parse(s) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host().is_some(),
        Err(_) => false,
    }
}
