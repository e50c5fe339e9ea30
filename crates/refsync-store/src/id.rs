//! Document identifiers.

use crate::StoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Key of the native identifier wrapper object.
pub const NATIVE_ID_KEY: &str = "$oid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| StoreError::InvalidId(raw.to_string()))
    }

    /// Read an identifier stored in either form. Anything else is not an id.
    ///
    /// Stored ids must use the lowercase hyphenated text, the only one
    /// [`to_native`](Self::to_native) and filters produce.
    pub fn from_value(value: &Value) -> Option<Self> {
        let raw = match value {
            Value::String(raw) => raw.as_str(),
            Value::Object(map) if map.len() == 1 => map.get(NATIVE_ID_KEY)?.as_str()?,
            _ => return None,
        };
        let uuid = Uuid::parse_str(raw).ok()?;
        (uuid.hyphenated().to_string() == raw).then_some(Self(uuid))
    }

    /// `{"$oid": "<uuid>"}`
    pub fn to_native(&self) -> Value {
        serde_json::json!({ NATIVE_ID_KEY: self.0.to_string() })
    }

    /// `"<uuid>"`
    pub fn to_string_form(&self) -> Value {
        Value::String(self.0.to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_native().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("not a document id: {value}")))
    }
}
