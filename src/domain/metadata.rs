//! Typed projection of user metadata
//!
//! Every key/value of a reference's `user_metadata` JSON object is rewritten
//! into typed rows so listing queries can filter on indexed columns instead
//! of parsing JSON. Scalars take one row; lists take one row per element
//! with the element index as the ordinal; anything else is carried as raw
//! JSON.

use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

/// One typed metadata value. Maps onto the four nullable columns of the
/// projection table; `Null` encodes an explicit JSON null (all columns null).
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Num(Decimal),
    Str(String),
    Json(JsonValue),
}

/// A projection row before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaRow {
    pub key: String,
    pub ordinal: i32,
    pub value: MetaValue,
}

fn is_scalar(value: &JsonValue) -> bool {
    matches!(
        value,
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_)
    )
}

/// Convert a scalar JSON value into its typed variant. Numbers that do not
/// fit the decimal column are carried as raw JSON so nothing is lost.
fn scalar_to_value(value: &JsonValue) -> MetaValue {
    match value {
        JsonValue::Null => MetaValue::Null,
        JsonValue::Bool(b) => MetaValue::Bool(*b),
        JsonValue::Number(n) => match Decimal::from_str(&n.to_string()) {
            Ok(d) => MetaValue::Num(d),
            Err(_) => MetaValue::Json(value.clone()),
        },
        JsonValue::String(s) => MetaValue::Str(s.clone()),
        other => MetaValue::Json(other.clone()),
    }
}

/// Rows for a single metadata key.
pub fn rows_for_value(key: &str, value: &JsonValue) -> Vec<MetaRow> {
    if is_scalar(value) {
        return vec![MetaRow {
            key: key.to_string(),
            ordinal: 0,
            value: scalar_to_value(value),
        }];
    }

    if let JsonValue::Array(items) = value {
        let all_scalars = items.iter().all(is_scalar);
        return items
            .iter()
            .enumerate()
            .map(|(i, item)| MetaRow {
                key: key.to_string(),
                ordinal: i as i32,
                value: if all_scalars {
                    scalar_to_value(item)
                } else {
                    MetaValue::Json(item.clone())
                },
            })
            .collect();
    }

    vec![MetaRow {
        key: key.to_string(),
        ordinal: 0,
        value: MetaValue::Json(value.clone()),
    }]
}

/// Project a whole metadata object into rows, key order preserved.
pub fn project_metadata(metadata: &Map<String, JsonValue>) -> Vec<MetaRow> {
    metadata
        .iter()
        .flat_map(|(key, value)| rows_for_value(key, value))
        .collect()
}

/// Convert a filter value into the typed variant used by listing predicates.
pub fn filter_value(value: &JsonValue) -> MetaValue {
    scalar_to_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn scalars_take_one_row() {
        let rows = rows_for_value("epoch", &json!(5));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ordinal, 0);
        assert_eq!(rows[0].value, MetaValue::Num(Decimal::from(5)));

        let rows = rows_for_value("enabled", &json!(false));
        assert_eq!(rows[0].value, MetaValue::Bool(false));

        let rows = rows_for_value("category", &json!("models"));
        assert_eq!(rows[0].value, MetaValue::Str("models".into()));
    }

    #[test]
    fn explicit_null_is_all_columns_null() {
        let rows = rows_for_value("nullable", &JsonValue::Null);
        assert_eq!(rows, vec![MetaRow { key: "nullable".into(), ordinal: 0, value: MetaValue::Null }]);
    }

    #[test]
    fn scalar_lists_get_ordinals() {
        let rows = rows_for_value("steps", &json!([10, 20, 30]));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].ordinal, 1);
        assert_eq!(rows[2].value, MetaValue::Num(Decimal::from(30)));
    }

    #[test]
    fn mixed_lists_fall_back_to_json_per_element() {
        let rows = rows_for_value("shapes", &json!([1, {"w": 2}]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, MetaValue::Json(json!(1)));
        assert_eq!(rows[1].value, MetaValue::Json(json!({"w": 2})));
    }

    #[test]
    fn objects_are_raw_json() {
        let rows = rows_for_value("nested", &json!({"a": 1}));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, MetaValue::Json(json!({"a": 1})));
    }

    #[test]
    fn float_precision_goes_through_decimal() {
        let rows = rows_for_value("score", &json!(0.95));
        assert_eq!(rows[0].value, MetaValue::Num(Decimal::from_str("0.95").unwrap()));
    }

    #[test]
    fn whole_object_projection_preserves_key_order() {
        let mut map = Map::new();
        map.insert("b".into(), json!(1));
        map.insert("a".into(), json!(["x", "y"]));
        let rows = project_metadata(&map);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].key, "b");
        assert_eq!(rows[1].key, "a");
        assert_eq!(rows[2].ordinal, 1);
    }
}
