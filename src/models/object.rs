// Stored objects and associations - the typed-object store behind layouts
// and the records they relate to

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A typed record in the object store. Layouts are stored objects whose
/// `object_type` is the layout key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: i64,
    pub object_type: String,
    pub data: Map<String, Value>,
    pub created: i64,
    pub updated: i64,
}

impl StoredObject {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Data plus the id, as handed to templates and API clients.
    pub fn to_json(&self) -> Value {
        let mut map = self.data.clone();
        map.insert("id".to_string(), Value::from(self.id));
        Value::Object(map)
    }
}

/// Ordered edge from a page or object to another object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub source_id: i64,
    pub association_type: String,
    pub target_id: i64,
    pub position: i64,
    pub created: i64,
}
