//! Extraction schema and missing-field detection.
//!
//! A [`Schema`] is an ordered list of named fields, each either a leaf value
//! or a nested section. Field order is declaration order and is preserved by
//! every walk, so the gaps reported by [`detect_missing`] come out in a
//! stable, schema-defined order.

use std::fmt;

use serde_json::Value;

/// Dotted path from the record root to a leaf field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn child(&self, name: &str) -> FieldPath {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        FieldPath(segments)
    }

    /// Look this path up in a JSON record.
    pub fn lookup<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(record, |node, key| node.get(key))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(dotted: &str) -> Self {
        FieldPath(dotted.split('.').map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Value,
    Section(Schema),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str) -> Self {
        self.fields.push((name.to_string(), FieldSpec::Value));
        self
    }

    pub fn section(mut self, name: &str, schema: Schema) -> Self {
        self.fields.push((name.to_string(), FieldSpec::Section(schema)));
        self
    }

    /// Build a schema from an example record: object values become
    /// sections, everything else a leaf. Non-object templates yield an
    /// empty schema.
    pub fn from_template(template: &Value) -> Self {
        let Some(map) = template.as_object() else {
            return Self::default();
        };
        let fields = map
            .iter()
            .map(|(k, v)| {
                let spec = match v {
                    Value::Object(_) => FieldSpec::Section(Schema::from_template(v)),
                    _ => FieldSpec::Value,
                };
                (k.clone(), spec)
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every leaf path, in declaration order.
    pub fn leaf_paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        collect_leaves(self, &FieldPath(Vec::new()), &mut out);
        out
    }

    /// JSON template with `null` leaves, the shape handed to extraction backends.
    pub fn to_template(&self) -> Value {
        let map = self
            .fields
            .iter()
            .map(|(k, spec)| {
                let v = match spec {
                    FieldSpec::Value => Value::Null,
                    FieldSpec::Section(inner) => inner.to_template(),
                };
                (k.clone(), v)
            })
            .collect();
        Value::Object(map)
    }
}

fn collect_leaves(schema: &Schema, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
    for (name, spec) in &schema.fields {
        let path = prefix.child(name);
        match spec {
            FieldSpec::Value => out.push(path),
            FieldSpec::Section(inner) => collect_leaves(inner, &path, out),
        }
    }
}

/// Absent, `null`, blank string, `[]` and `{}` all count as missing.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(m)) => m.is_empty(),
        Some(_) => false,
    }
}

/// Leaf paths of `schema` that are missing or empty in `record`.
pub fn detect_missing(record: &Value, schema: &Schema) -> Vec<FieldPath> {
    let mut out = Vec::new();
    walk(Some(record), schema, &FieldPath(Vec::new()), &mut out);
    out
}

fn walk(node: Option<&Value>, schema: &Schema, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
    for (name, spec) in &schema.fields {
        let path = prefix.child(name);
        let value = node.and_then(|n| n.get(name));
        match spec {
            FieldSpec::Value => {
                if is_empty_value(value) {
                    out.push(path);
                }
            }
            FieldSpec::Section(inner) => match value {
                Some(v @ Value::Object(m)) if !m.is_empty() => walk(Some(v), inner, &path, out),
                _ => collect_leaves(inner, &path, out),
            },
        }
    }
}
