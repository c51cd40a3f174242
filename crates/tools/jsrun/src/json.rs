//! Conversion between bridge values and JSON

use jsbridge::{DynamicObject, Value};
use serde_json::{Map, Number};

/// Convert a bridge value to JSON.
///
/// Undefined becomes null and functions are dropped from objects, mirroring
/// `JSON.stringify`. Integral floats are written as integers.
pub fn from_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null | Value::Undefined | Value::Function(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Int64(i) => serde_json::Value::from(*i),
        Value::Float(f) => float(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(from_value).collect()),
        Value::Object(object) => {
            let mut map = Map::new();
            for (name, property) in object.properties() {
                if !property.is_function() {
                    map.insert(name, from_value(&property));
                }
            }
            serde_json::Value::Object(map)
        }
    }
}

fn float(f: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(f as i64);
    }
    Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Convert JSON to a bridge value
pub fn to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => match i32::try_from(i) {
                Ok(small) => Value::Int(small),
                Err(_) => Value::Int64(i),
            },
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(to_value).collect()),
        serde_json::Value::Object(map) => {
            let object = DynamicObject::new();
            for (name, property) in map {
                object.set_property(name.clone(), to_value(property));
            }
            Value::Object(object)
        }
    }
}
