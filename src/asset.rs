use bytes::Bytes;
use mime::Mime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The metadata field every record carries a copy of its file name in.
pub const FILE_NAME_FIELD: &str = "fileName";

/// An opaque binary payload along with the MIME type it was uploaded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryAsset {
    mime: Mime,
    data: Bytes,
}

impl BinaryAsset {
    pub fn new(mime: Mime, data: impl Into<Bytes>) -> Self {
        Self {
            mime,
            data: data.into(),
        }
    }

    #[inline]
    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The size of the payload in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The crc32 checksum of the payload.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.data)
    }
}

/// A consumer defined JSON record describing a single asset.
///
/// The cache only ever looks at two kinds of fields:
/// `fileName`, and whichever ownership fields (`cardId`, `sectionId`, ...)
/// are configured or queried. Everything else is carried as-is.
///
/// Records are only ever replaced whole, there is no partial update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetMetadata(Map<String, Value>);

impl AssetMetadata {
    /// Creates a new record with the `fileName` field already set.
    pub fn new(file_name: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(FILE_NAME_FIELD.to_string(), Value::String(file_name.into()));
        Self(fields)
    }

    /// Sets a field, replacing any existing value.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.get(FILE_NAME_FIELD).and_then(Value::as_str)
    }

    /// The normalised owner id held in `field`, if any.
    pub fn owner(&self, field: &str) -> Option<String> {
        self.0.get(field).and_then(owner_id)
    }
}

impl From<Map<String, Value>> for AssetMetadata {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Normalises an ownership value so `42` and `"42"` refer to the same owner.
///
/// Only strings and numbers can identify an owner.
pub fn owner_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
