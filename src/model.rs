//! Schema-driven validation and serialization of wire payloads.
//!
//! A model describes its fields once, in [`Model::read_fields`] and
//! [`Model::write_fields`]. Reading goes through a [`FieldReader`], which keeps
//! going after a bad field so that a [`ValidationError`] lists every violation
//! in the payload. [`Tracked`] fields remember whether the caller set them,
//! which lets partial-update payloads leave untouched fields out.
//!
//! # Example
//! ```rust
//! use sdkcore::model::{FieldReader, FieldWriter, Model, Tracked};
//! use serde_json::json;
//!
//! #[derive(Debug, PartialEq)]
//! struct User {
//!     id: String,
//!     email: String,
//!     role: Tracked<String>,
//! }
//!
//! impl Model for User {
//!     fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
//!         let id = f.required("id");
//!         let email = f.required_with("email", |e: &String| {
//!             if e.contains('@') { Ok(()) } else { Err("not an email address".to_string()) }
//!         });
//!         let role = f.tracked("role", "member".to_string());
//!         Some(Self { id: id?, email: email?, role: role? })
//!     }
//!
//!     fn write_fields(&self, w: &mut FieldWriter) {
//!         w.field("id", &self.id);
//!         w.field("email", &self.email);
//!         w.tracked("role", &self.role);
//!     }
//! }
//!
//! let user = User::validate(&json!({"id": "1", "email": "a@b.c"})).unwrap();
//! assert_eq!(user.role.get(), "member");
//! assert_eq!(user.serialize(true).unwrap(), json!({"id": "1", "email": "a@b.c"}));
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::ops::Deref;

use crate::error::{FieldViolation, ValidationError, ROOT_FIELD};

/// What to do with keys in the payload that the model does not read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFields {
    /// Drop them, so newer servers can add fields.
    #[default]
    Ignore,
    /// Report each one as a violation.
    Reject,
}

/// A validated structured record.
pub trait Model: Sized {
    const UNKNOWN_FIELDS: UnknownFields = UnknownFields::Ignore;

    /// Read every field through `fields` and assemble the model.
    ///
    /// Read all fields before combining them with `?`, so that each bad field
    /// is reported. Returning `None` without recording a violation is treated
    /// as an internal error.
    fn read_fields(fields: &mut FieldReader<'_>) -> Option<Self>;

    /// Write every field through `fields`.
    fn write_fields(&self, fields: &mut FieldWriter);

    /// Validate a JSON object into the model.
    fn validate(raw: &Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = raw else {
            return Err(ValidationError::single(
                ROOT_FIELD,
                format!("expected object, got {}", json_type(raw)),
            ));
        };
        let mut reader = FieldReader::new(map);
        let model = Self::read_fields(&mut reader);
        reader.finish(Self::UNKNOWN_FIELDS, model)
    }

    /// Validate a JSON array, element by element.
    ///
    /// Any invalid element fails the whole list; violations are prefixed with
    /// the element index.
    fn validate_list(raw: &Value) -> Result<Vec<Self>, ValidationError> {
        let Value::Array(items) = raw else {
            return Err(ValidationError::single(
                ROOT_FIELD,
                format!("expected array, got {}", json_type(raw)),
            ));
        };

        let mut models = Vec::with_capacity(items.len());
        let mut violations = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match Self::validate(item) {
                Ok(model) => models.push(model),
                Err(e) => {
                    let prefix = format!("[{}]", index);
                    violations.extend(e.violations.into_iter().map(|v| v.nested_in(&prefix)));
                }
            }
        }

        match ValidationError::from_violations(violations) {
            Some(error) => Err(error),
            None => Ok(models),
        }
    }

    /// Serialize to a JSON object.
    ///
    /// With `exclude_unset`, [`Tracked`] fields the caller never set are left out.
    fn serialize(&self, exclude_unset: bool) -> Result<Value, ValidationError> {
        let mut writer = FieldWriter::new(exclude_unset);
        self.write_fields(&mut writer);
        writer.finish()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads fields out of a JSON object, collecting violations as it goes.
#[derive(Debug)]
pub struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    seen: HashSet<String>,
    violations: Vec<FieldViolation>,
}

impl<'a> FieldReader<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        Self {
            map,
            seen: HashSet::new(),
            violations: Vec::new(),
        }
    }

    fn take(&mut self, name: &str) -> Option<&'a Value> {
        self.seen.insert(name.to_string());
        self.map.get(name)
    }

    fn decode<T: DeserializeOwned>(&mut self, name: &str, value: &Value) -> Option<T> {
        match T::deserialize(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                self.violate(name, e.to_string());
                None
            }
        }
    }

    /// Record a violation for `name`.
    pub fn violate(&mut self, name: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(name, message));
    }

    /// A field that must be present and non-null.
    pub fn required<T: DeserializeOwned>(&mut self, name: &str) -> Option<T> {
        match self.take(name) {
            None | Some(Value::Null) => {
                self.violate(name, "field required");
                None
            }
            Some(value) => self.decode(name, value),
        }
    }

    /// A required field with an extra constraint.
    pub fn required_with<T, F>(&mut self, name: &str, rule: F) -> Option<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), String>,
    {
        let value = self.required(name)?;
        self.constrain(name, value, rule)
    }

    /// A field that may be missing or null.
    ///
    /// Returns `Some(None)` when absent and `None` only on a violation.
    pub fn optional<T: DeserializeOwned>(&mut self, name: &str) -> Option<Option<T>> {
        match self.take(name) {
            None | Some(Value::Null) => Some(None),
            Some(value) => self.decode(name, value).map(Some),
        }
    }

    /// An optional field with an extra constraint applied when present.
    pub fn optional_with<T, F>(&mut self, name: &str, rule: F) -> Option<Option<T>>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), String>,
    {
        match self.optional(name)? {
            Some(value) => self.constrain(name, value, rule).map(Some),
            None => Some(None),
        }
    }

    /// A field with a default, remembering whether the payload set it.
    pub fn tracked<T: DeserializeOwned>(&mut self, name: &str, default: T) -> Option<Tracked<T>> {
        match self.take(name) {
            None => Some(Tracked::unset(default)),
            Some(value) => self.decode(name, value).map(Tracked::set),
        }
    }

    /// A nested model; its violations are reported under `name`.
    pub fn nested<M: Model>(&mut self, name: &str) -> Option<M> {
        let Some(value) = self.take(name).filter(|v| !v.is_null()) else {
            self.violate(name, "field required");
            return None;
        };
        self.absorb(name, M::validate(value))
    }

    /// A list of nested models; element violations are reported under `name[i]`.
    pub fn list<M: Model>(&mut self, name: &str) -> Option<Vec<M>> {
        let Some(value) = self.take(name).filter(|v| !v.is_null()) else {
            self.violate(name, "field required");
            return None;
        };
        self.absorb(name, M::validate_list(value))
    }

    /// A nested model that may be missing or null.
    pub fn optional_nested<M: Model>(&mut self, name: &str) -> Option<Option<M>> {
        match self.take(name).filter(|v| !v.is_null()) {
            None => Some(None),
            Some(value) => self.absorb(name, M::validate(value)).map(Some),
        }
    }

    /// Read the fields of `M` from this same object.
    ///
    /// Used to embed shared shapes such as [`Identity`] or [`Timestamps`].
    pub fn flatten<M: Model>(&mut self) -> Option<M> {
        M::read_fields(self)
    }

    fn absorb<T>(&mut self, name: &str, result: Result<T, ValidationError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.violations
                    .extend(e.violations.into_iter().map(|v| v.nested_in(name)));
                None
            }
        }
    }

    fn constrain<T, F>(&mut self, name: &str, value: T, rule: F) -> Option<T>
    where
        F: FnOnce(&T) -> Result<(), String>,
    {
        match rule(&value) {
            Ok(()) => Some(value),
            Err(message) => {
                self.violate(name, message);
                None
            }
        }
    }

    fn finish<M>(mut self, policy: UnknownFields, model: Option<M>) -> Result<M, ValidationError> {
        if policy == UnknownFields::Reject {
            for key in self.map.keys() {
                if !self.seen.contains(key) {
                    self.violations.push(FieldViolation::new(key.as_str(), "unknown field"));
                }
            }
        }

        match (ValidationError::from_violations(self.violations), model) {
            (Some(error), _) => Err(error),
            (None, Some(model)) => Ok(model),
            (None, None) => Err(ValidationError::single(ROOT_FIELD, "model could not be assembled")),
        }
    }
}

/// Writes fields into a JSON object.
#[derive(Debug)]
pub struct FieldWriter {
    map: Map<String, Value>,
    exclude_unset: bool,
    violations: Vec<FieldViolation>,
}

impl FieldWriter {
    fn new(exclude_unset: bool) -> Self {
        Self {
            map: Map::new(),
            exclude_unset,
            violations: Vec::new(),
        }
    }

    /// Always written.
    pub fn field<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.map.insert(name.to_string(), value);
            }
            Err(e) => self.violations.push(FieldViolation::new(name, e.to_string())),
        }
    }

    /// Written only when `Some`.
    pub fn optional<T: Serialize>(&mut self, name: &str, value: &Option<T>) {
        if let Some(value) = value {
            self.field(name, value);
        }
    }

    /// Skipped when excluding unset fields and the caller never set it.
    pub fn tracked<T: Serialize>(&mut self, name: &str, value: &Tracked<T>) {
        if self.exclude_unset && !value.is_set() {
            return;
        }
        self.field(name, value.get());
    }

    pub fn nested<M: Model>(&mut self, name: &str, model: &M) {
        match model.serialize(self.exclude_unset) {
            Ok(value) => {
                self.map.insert(name.to_string(), value);
            }
            Err(e) => self
                .violations
                .extend(e.violations.into_iter().map(|v| v.nested_in(name))),
        }
    }

    /// Written only when `Some`.
    pub fn optional_nested<M: Model>(&mut self, name: &str, model: &Option<M>) {
        if let Some(model) = model {
            self.nested(name, model);
        }
    }

    /// Write the fields of `model` into this same object.
    pub fn flatten<M: Model>(&mut self, model: &M) {
        model.write_fields(self);
    }

    pub fn list<M: Model>(&mut self, name: &str, models: &[M]) {
        let mut items = Vec::with_capacity(models.len());
        for (index, model) in models.iter().enumerate() {
            match model.serialize(self.exclude_unset) {
                Ok(value) => items.push(value),
                Err(e) => {
                    let prefix = format!("{}[{}]", name, index);
                    self.violations
                        .extend(e.violations.into_iter().map(|v| v.nested_in(&prefix)));
                }
            }
        }
        self.map.insert(name.to_string(), Value::Array(items));
    }

    fn finish(self) -> Result<Value, ValidationError> {
        match ValidationError::from_violations(self.violations) {
            Some(error) => Err(error),
            None => Ok(Value::Object(self.map)),
        }
    }
}

/// A field value that remembers whether it was set explicitly.
///
/// Equality compares values only.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    value: T,
    explicit: bool,
}

impl<T> Tracked<T> {
    /// A default that was not chosen by the caller.
    pub fn unset(default: T) -> Self {
        Self {
            value: default,
            explicit: false,
        }
    }

    /// An explicitly chosen value.
    pub fn set(value: T) -> Self {
        Self { value, explicit: true }
    }

    /// Replace the value and mark it as set.
    pub fn assign(&mut self, value: T) {
        self.value = value;
        self.explicit = true;
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn is_set(&self) -> bool {
        self.explicit
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Default> Default for Tracked<T> {
    fn default() -> Self {
        Self::unset(T::default())
    }
}

impl<T> From<T> for Tracked<T> {
    fn from(value: T) -> Self {
        Self::set(value)
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Tracked<T> {}

/// An `id` field shared by most resources.
///
/// Embed with [`FieldReader::flatten`] and [`FieldWriter::flatten`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
}

impl Model for Identity {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let id = f.required_with("id", |id: &String| {
            if id.is_empty() {
                Err("must not be empty".to_string())
            } else {
                Ok(())
            }
        });
        Some(Self { id: id? })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("id", &self.id);
    }
}

/// Optional RFC 3339 `created_at`/`updated_at` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model for Timestamps {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let created_at = f.optional("created_at");
        let updated_at = f.optional("updated_at");
        Some(Self {
            created_at: created_at?,
            updated_at: updated_at?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.optional("created_at", &self.created_at);
        w.optional("updated_at", &self.updated_at);
    }
}

/// A free-form `metadata` object; empty when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub metadata: Map<String, Value>,
}

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

impl Model for Metadata {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let metadata = f.optional("metadata");
        Some(Self {
            metadata: metadata?.unwrap_or_default(),
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("metadata", &self.metadata);
    }
}
