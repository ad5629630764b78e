use regie_types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name to value mapping. Keys iterate in sorted order.
pub type Fields = serde_json::Map<String, Value>;

/// A document read from or written to the store.
///
/// The data layer never assumes a schema: `fields` holds whatever the
/// collection stores. Serialized flat, the way document stores hand records
/// out: `{"id": "...", "createdAt": 1700000000000, "name": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Creates a record without write stamps.
    pub fn new(id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            fields,
        }
    }

    /// Builds a record from stored fields, lifting `createdAt`/`updatedAt`
    /// out of the field map into the write stamps.
    pub fn from_stored(id: impl Into<RecordId>, mut fields: Fields) -> Self {
        let created_at = take_stamp(&mut fields, "createdAt");
        let updated_at = take_stamp(&mut fields, "updatedAt");
        Self {
            id: id.into(),
            created_at,
            updated_at,
            fields,
        }
    }

    /// Builds a record from a JSON object. Non-object values yield an empty record.
    pub fn from_value(id: impl Into<RecordId>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        Self::new(id, fields)
    }

    /// Returns a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Extract a string value from a top-level field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Extract a numeric value from a top-level field.
    pub fn get_number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(|v| v.as_f64())
    }

    /// Extract a boolean value from a top-level field.
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(|v| v.as_bool())
    }

    /// Resolves a dotted path (`"address.city"`) into nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Sets a top-level field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    /// Returns the record as a flat JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".into(), Value::String(self.id.to_string()));
        if let Some(ts) = self.created_at {
            map.insert("createdAt".into(), Value::from(ts.as_millis()));
        }
        if let Some(ts) = self.updated_at {
            map.insert("updatedAt".into(), Value::from(ts.as_millis()));
        }
        Value::Object(map)
    }
}

fn take_stamp(fields: &mut Fields, key: &str) -> Option<Timestamp> {
    match fields.remove(key) {
        Some(Value::Number(n)) => n.as_u64().map(Timestamp::from_millis),
        Some(other) => {
            fields.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}
