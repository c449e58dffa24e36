//! Firestore REST API types and value encoding.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(GeoPoint),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

impl Value {
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Value::TimestampValue(at.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Encode arbitrary JSON. Integers that fit `i64` become integer values;
    /// other numbers become doubles.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::NullValue(()),
            Json::Bool(b) => Value::BooleanValue(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::IntegerValue(i.to_string()),
                None => Value::DoubleValue(n.as_f64().unwrap_or(0.0)),
            },
            Json::String(s) => Value::StringValue(s.clone()),
            Json::Array(items) => Value::ArrayValue(ArrayValue {
                values: Some(items.iter().map(Value::from_json).collect()),
            }),
            Json::Object(map) => Value::MapValue(MapValue {
                fields: Some(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
            }),
        }
    }

    /// Decode into JSON. Timestamps, bytes and references become strings.
    pub fn to_json(&self) -> Json {
        match self {
            Value::NullValue(()) => Json::Null,
            Value::BooleanValue(b) => Json::Bool(*b),
            Value::IntegerValue(s) => s
                .parse::<i64>()
                .map(|i| Json::Number(i.into()))
                .unwrap_or_else(|_| Json::String(s.clone())),
            Value::DoubleValue(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::TimestampValue(s) | Value::StringValue(s) | Value::BytesValue(s) | Value::ReferenceValue(s) => {
                Json::String(s.clone())
            }
            Value::GeoPointValue(p) => serde_json::json!({ "latitude": p.latitude, "longitude": p.longitude }),
            Value::ArrayValue(array) => Json::Array(
                array
                    .values
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(Value::to_json)
                    .collect(),
            ),
            Value::MapValue(map) => Json::Object(
                map.fields
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Used as the optimistic-concurrency precondition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(name))
    }

    /// Document fields as a JSON object.
    pub fn to_json_object(&self) -> Map<String, Json> {
        self.fields
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    /// Last path segment of the resource name.
    pub fn doc_id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }
}

/// Encode a JSON object as document fields.
pub fn fields_from_json(object: &Map<String, Json>) -> HashMap<String, Value> {
    object.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()
}

// ============================================================================
// Structured queries
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub document: Option<Document>,
    pub read_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

impl StructuredQuery {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection_id.into(),
            }],
            filter: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field_path: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(Order {
            field: FieldReference {
                field_path: field_path.into(),
            },
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_filter: Option<FieldFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_filter: Option<CompositeFilter>,
}

impl Filter {
    pub fn field(field_path: impl Into<String>, op: FieldOperator, value: Value) -> Self {
        Self {
            field_filter: Some(FieldFilter {
                field: FieldReference {
                    field_path: field_path.into(),
                },
                op,
                value,
            }),
            composite_filter: None,
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self {
            field_filter: None,
            composite_filter: Some(CompositeFilter {
                op: "AND".to_string(),
                filters,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: FieldOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeFilter {
    pub op: String,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    In,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub field: FieldReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Ascending,
    Descending,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_encoding_preserves_structure() {
        let original = json!({
            "status": "ready",
            "file_size": 1048576,
            "duration_seconds": 12.5,
            "transcript": [{"start_ms": 0, "end_ms": 900, "text": "hi"}],
            "publish_target": null,
            "flags": {"nested": true}
        });
        let Json::Object(object) = &original else { unreachable!() };
        let doc = Document::new(fields_from_json(object));

        assert_eq!(doc.field("file_size"), Some(&Value::IntegerValue("1048576".into())));
        assert_eq!(Json::Object(doc.to_json_object()), original);
    }

    #[test]
    fn test_value_wire_format() {
        let encoded = serde_json::to_value(Value::from_json(&json!([1, "a", null]))).unwrap();
        assert_eq!(
            encoded,
            json!({"arrayValue": {"values": [
                {"integerValue": "1"}, {"stringValue": "a"}, {"nullValue": null}
            ]}})
        );
    }

    #[test]
    fn test_empty_containers_decode() {
        let empty_map: Value = serde_json::from_value(json!({"mapValue": {}})).unwrap();
        let empty_array: Value = serde_json::from_value(json!({"arrayValue": {}})).unwrap();
        assert_eq!(empty_map.to_json(), json!({}));
        assert_eq!(empty_array.to_json(), json!([]));
    }

    #[test]
    fn test_query_serialization() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let query = StructuredQuery::collection("videos")
            .filter(Filter::field("cleanup_due_at", FieldOperator::LessThanOrEqual, Value::timestamp(at)))
            .limit(50);
        let encoded = serde_json::to_value(RunQueryRequest { structured_query: query }).unwrap();

        assert_eq!(encoded["structuredQuery"]["from"][0]["collectionId"], "videos");
        assert_eq!(encoded["structuredQuery"]["where"]["fieldFilter"]["op"], "LESS_THAN_OR_EQUAL");
        assert_eq!(encoded["structuredQuery"]["limit"], 50);
        assert!(encoded["structuredQuery"].get("orderBy").is_none());
    }
}
