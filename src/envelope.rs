//! Response envelopes that many services wrap their payloads in.
//!
//! [`PaginatedResponse`], [`ApiResponse`] and [`ValidationErrorResponse`] are
//! strict [`Model`]s. [`ErrorResponse`] is a model too, but the transport reads
//! error bodies through [`ErrorResponse::from_body`], which accepts whatever
//! shape the server sends and picks out what it can.

use serde_json::{Map, Value};

use crate::model::{FieldReader, FieldWriter, Model};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    pub total_count: Option<u64>,
    pub next_cursor: Option<String>,
    pub previous_cursor: Option<String>,
}

impl<T: Model> Model for PaginatedResponse<T> {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let data = f.list("data");
        let has_more = f.optional("has_more");
        let total_count = f.optional("total_count");
        let next_cursor = f.optional("next_cursor");
        let previous_cursor = f.optional("previous_cursor");
        Some(Self {
            data: data?,
            has_more: has_more?.unwrap_or(false),
            total_count: total_count?,
            next_cursor: next_cursor?,
            previous_cursor: previous_cursor?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.list("data", &self.data);
        w.field("has_more", &self.has_more);
        w.optional("total_count", &self.total_count);
        w.optional("next_cursor", &self.next_cursor);
        w.optional("previous_cursor", &self.previous_cursor);
    }
}

/// `{"success": .., "data": .., "error": ..}` wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub request_id: Option<String>,
}

impl<T: Model> Model for ApiResponse<T> {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let success = f.required("success");
        let data = f.optional_nested("data");
        let error = f.optional("error");
        let error_code = f.optional("error_code");
        let request_id = f.optional("request_id");
        Some(Self {
            success: success?,
            data: data?,
            error: error?,
            error_code: error_code?,
            request_id: request_id?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("success", &self.success);
        w.optional_nested("data", &self.data);
        w.optional("error", &self.error);
        w.optional("error_code", &self.error_code);
        w.optional("request_id", &self.request_id);
    }
}

impl<T> ApiResponse<T> {
    /// The payload of a successful response.
    pub fn into_data(self) -> Option<T> {
        if self.success {
            self.data
        } else {
            None
        }
    }
}

/// Error body in its canonical shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorResponse {
    /// Human-readable message; empty when the body carried none.
    pub error: String,
    pub error_code: Option<String>,
    pub error_details: Option<Value>,
    pub request_id: Option<String>,
}

impl Model for ErrorResponse {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let error = f.required("error");
        let error_code = f.optional("error_code");
        let error_details = f.optional("error_details");
        let request_id = f.optional("request_id");
        Some(Self {
            error: error?,
            error_code: error_code?,
            error_details: error_details?,
            request_id: request_id?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("error", &self.error);
        w.optional("error_code", &self.error_code);
        w.optional("error_details", &self.error_details);
        w.optional("request_id", &self.request_id);
    }
}

impl ErrorResponse {
    /// Read an error body of any common shape, one field at a time.
    ///
    /// The message comes from `error` (a string, or an object with
    /// `message`), `message`, `detail`, or the `msg` entries of a `detail`
    /// list. Codes and request ids may be strings or numbers. Returns `None`
    /// for bodies that are not JSON objects.
    pub fn from_body(body: &Value) -> Option<Self> {
        let Value::Object(map) = body else {
            return None;
        };
        let nested = match map.get("error") {
            Some(Value::Object(error)) => Some(error),
            _ => None,
        };

        let error = message_of(map, nested).unwrap_or_default();
        let error_code = ["error_code", "code"]
            .iter()
            .find_map(|key| map.get(*key).and_then(scalar))
            .or_else(|| {
                nested.and_then(|e| ["code", "type"].iter().find_map(|key| e.get(*key).and_then(scalar)))
            });
        let request_id = map.get("request_id").and_then(scalar);
        let error_details = map
            .get("error_details")
            .or_else(|| map.get("detail").filter(|d| d.is_array()))
            .or_else(|| nested.and_then(|e| e.get("details")))
            .filter(|d| !d.is_null())
            .cloned();

        Some(Self {
            error,
            error_code,
            error_details,
            request_id,
        })
    }

    /// The message, if the body carried one.
    pub fn message(&self) -> Option<&str> {
        Some(self.error.as_str()).filter(|m| !m.is_empty())
    }
}

fn message_of(map: &Map<String, Value>, nested: Option<&Map<String, Value>>) -> Option<String> {
    if let Some(Value::String(error)) = map.get("error") {
        return Some(error.clone());
    }
    if let Some(message) = nested.and_then(|e| e.get("message")).and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(Value::String(message)) = map.get("message") {
        return Some(message.clone());
    }
    match map.get("detail") {
        Some(Value::String(detail)) => Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(msg) => Some(msg.as_str()),
                    Value::Object(item) => item.get("msg").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            Some(messages.join("; ")).filter(|m| !m.is_empty())
        }
        _ => None,
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One rejected field in a [`ValidationErrorResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
    pub code: Option<String>,
    /// The rejected value as the server echoed it.
    pub value: Option<Value>,
}

impl Model for ValidationErrorDetail {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let field = f.required("field");
        let message = f.required("message");
        let code = f.optional("code");
        let value = f.optional("value");
        Some(Self {
            field: field?,
            message: message?,
            code: code?,
            value: value?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("field", &self.field);
        w.field("message", &self.message);
        w.optional("code", &self.code);
        w.optional("value", &self.value);
    }
}

/// Error body listing every field the server rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub error_code: Option<String>,
    pub request_id: Option<String>,
    pub validation_errors: Vec<ValidationErrorDetail>,
}

impl Model for ValidationErrorResponse {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let error = f.required("error");
        let error_code = f.optional("error_code");
        let request_id = f.optional("request_id");
        let validation_errors = f.list("validation_errors");
        Some(Self {
            error: error?,
            error_code: error_code?,
            request_id: request_id?,
            validation_errors: validation_errors?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("error", &self.error);
        w.optional("error_code", &self.error_code);
        w.optional("request_id", &self.request_id);
        w.list("validation_errors", &self.validation_errors);
    }
}

impl ValidationErrorResponse {
    pub fn fields(&self) -> Vec<&str> {
        self.validation_errors.iter().map(|e| e.field.as_str()).collect()
    }
}
