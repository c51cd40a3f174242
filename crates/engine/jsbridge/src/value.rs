//! Host-side dynamic values
//!
//! [`Value`] is the tagged union that crosses the script boundary. Arrays are
//! plain value containers; [`DynamicObject`] and [`NativeFunction`] are shared
//! references so that host objects keep their identity when a script hands
//! them back.

use crate::marshal::EngineScope;
use crate::{Error, Result};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A dynamic host value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Void value, maps to script `null`
    Null,
    /// Script `undefined`
    #[default]
    Undefined,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Int64(i64),
    /// Double precision float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered array of values
    Array(Vec<Value>),
    /// Shared host object
    Object(DynamicObject),
    /// Host callable
    Function(NativeFunction),
}

impl Value {
    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    fn type_error(&self, expected: &str) -> Error {
        Error::TypeError {
            expected: expected.to_string(),
            actual: self.type_name().to_string(),
        }
    }

    /// Numeric view of the value, if it is any of the number variants
    fn number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Int64(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Check if value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value is one of the number variants
    pub fn is_number(&self) -> bool {
        self.number().is_some()
    }

    /// Check if value is an array
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Check if value is a host object
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Check if value is callable
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(self.type_error("bool")),
        }
    }

    /// Try to get as i32, truncating floats
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Int64(i) => i32::try_from(*i)
                .map_err(|_| Error::InvalidValue(format!("value {} out of i32 range", i))),
            Value::Float(f) => Ok(*f as i32),
            _ => Err(self.type_error("int")),
        }
    }

    /// Try to get as i64, truncating floats
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(i64::from(*i)),
            Value::Int64(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            _ => Err(self.type_error("int")),
        }
    }

    /// Try to get as u32
    pub fn as_u32(&self) -> Result<u32> {
        let i = self.as_i64()?;
        u32::try_from(i).map_err(|_| Error::InvalidValue(format!("value {} out of u32 range", i)))
    }

    /// Try to get as f64
    pub fn as_f64(&self) -> Result<f64> {
        self.number().ok_or_else(|| self.type_error("float"))
    }

    /// Try to get as string
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s.as_str()),
            _ => Err(self.type_error("string")),
        }
    }

    /// Try to get as array
    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Value::Array(arr) => Ok(arr.as_slice()),
            _ => Err(self.type_error("array")),
        }
    }

    /// Try to get as host object
    pub fn as_object(&self) -> Result<&DynamicObject> {
        match self {
            Value::Object(obj) => Ok(obj),
            _ => Err(self.type_error("object")),
        }
    }

    /// Try to get as callable
    pub fn as_function(&self) -> Result<&NativeFunction> {
        match self {
            Value::Function(f) => Ok(f),
            _ => Err(self.type_error("function")),
        }
    }

    /// Call this value with `this` set to undefined.
    ///
    /// Non-callable values return undefined. Must not be used from inside a
    /// native callback; use [`NativeFunctionArgs::call`] there instead.
    pub fn call(&self, arguments: &[Value]) -> Value {
        match self {
            Value::Function(f) => f.call(&NativeFunctionArgs::new(Value::Undefined, arguments.to_vec())),
            _ => Value::Undefined,
        }
    }
}

impl PartialEq for Value {
    /// Structural equality. Numbers compare by value across variants,
    /// functions by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => match (self.number(), other.number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(_) => write!(f, "[native function]"),
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int64(i64::from(i))
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<DynamicObject> for Value {
    fn from(obj: DynamicObject) -> Self {
        Value::Object(obj)
    }
}

impl From<NativeFunction> for Value {
    fn from(f: NativeFunction) -> Self {
        Value::Function(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// How a host object property is exposed to scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Plain value, exposed through a getter/setter pair
    Value,
    /// Callable, exposed as a script function
    Method,
    /// Nested host object, registered as a child object
    Object,
}

impl PropertyKind {
    /// Classify a property value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Function(_) => PropertyKind::Method,
            Value::Object(_) => PropertyKind::Object,
            _ => PropertyKind::Value,
        }
    }
}

/// A shared host object with insertion-ordered named properties.
///
/// Cloning produces another reference to the same object; use
/// [`DynamicObject::ptr_eq`] to test identity.
#[derive(Clone, Default)]
pub struct DynamicObject {
    properties: Rc<RefCell<Vec<(String, Value)>>>,
}

impl DynamicObject {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property insertion
    pub fn with_property(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Builder-style method insertion
    pub fn with_method<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&NativeFunctionArgs<'_>) -> Value + 'static,
    {
        self.set_method(name, method);
        self
    }

    /// Set a property, replacing an existing one in place
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let mut properties = self.properties.borrow_mut();
        match properties.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => properties.push((name, value)),
        }
    }

    /// Set a method
    pub fn set_method<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(&NativeFunctionArgs<'_>) -> Value + 'static,
    {
        self.set_property(name, NativeFunction::new(method));
    }

    /// Get a property value, undefined when absent
    pub fn get_property(&self, name: &str) -> Value {
        self.properties
            .borrow()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    /// Check if a property exists
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.borrow().iter().any(|(key, _)| key == name)
    }

    /// Remove a property, returning its value
    pub fn remove_property(&self, name: &str) -> Option<Value> {
        let mut properties = self.properties.borrow_mut();
        let index = properties.iter().position(|(key, _)| key == name)?;
        Some(properties.remove(index).1)
    }

    /// Invoke the method stored under `name`.
    ///
    /// Returns undefined if there is no such property or it is not callable.
    pub fn invoke_method(&self, name: &str, args: &NativeFunctionArgs<'_>) -> Value {
        match self.get_property(name) {
            Value::Function(method) => method.call(args),
            _ => Value::Undefined,
        }
    }

    /// Snapshot of all properties in insertion order
    pub fn properties(&self) -> Vec<(String, Value)> {
        self.properties.borrow().clone()
    }

    /// Property names in insertion order
    pub fn property_names(&self) -> Vec<String> {
        self.properties
            .borrow()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.properties.borrow().len()
    }

    /// Check if the object has no properties
    pub fn is_empty(&self) -> bool {
        self.properties.borrow().is_empty()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &DynamicObject) -> bool {
        Rc::ptr_eq(&self.properties, &other.properties)
    }
}

impl PartialEq for DynamicObject {
    /// Identical objects are equal; otherwise the same names must map to
    /// equal values, regardless of order.
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let ours = self.properties.borrow();
        let theirs = other.properties.borrow();
        ours.len() == theirs.len()
            && ours.iter().all(|(key, value)| {
                theirs
                    .iter()
                    .any(|(other_key, other_value)| key == other_key && value == other_value)
            })
    }
}

impl fmt::Debug for DynamicObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.properties.borrow().iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// Arguments passed to a [`NativeFunction`]
pub struct NativeFunctionArgs<'a> {
    /// The receiver of the call
    pub this: Value,
    /// Positional arguments
    pub arguments: Vec<Value>,
    scope: Option<&'a dyn EngineScope>,
}

impl NativeFunctionArgs<'static> {
    /// Arguments for a call made from host code
    pub fn new(this: Value, arguments: Vec<Value>) -> Self {
        Self {
            this,
            arguments,
            scope: None,
        }
    }
}

impl<'a> NativeFunctionArgs<'a> {
    /// Arguments for a call made from inside the engine
    pub(crate) fn with_scope(this: Value, arguments: Vec<Value>, scope: &'a dyn EngineScope) -> Self {
        Self {
            this,
            arguments,
            scope: Some(scope),
        }
    }

    pub(crate) fn scope(&self) -> Option<&'a dyn EngineScope> {
        self.scope
    }

    /// Argument at `index`, undefined when out of range
    pub fn arg(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or_default()
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Check if there are no arguments
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Call `function` from inside this call, reusing the active engine scope.
    ///
    /// This is the way to invoke script callbacks received as arguments: the
    /// nested call runs in the engine context that is already executing.
    pub fn call(&self, function: &Value, arguments: Vec<Value>) -> Value {
        match function {
            Value::Function(f) => f.call(&NativeFunctionArgs {
                this: Value::Undefined,
                arguments,
                scope: self.scope,
            }),
            _ => Value::Undefined,
        }
    }
}

impl fmt::Debug for NativeFunctionArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunctionArgs")
            .field("this", &self.this)
            .field("arguments", &self.arguments)
            .field("in_engine", &self.scope.is_some())
            .finish()
    }
}

type NativeFn = dyn Fn(&NativeFunctionArgs<'_>) -> Value;

/// A reference-counted host callable
#[derive(Clone)]
pub struct NativeFunction(Rc<NativeFn>);

impl NativeFunction {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&NativeFunctionArgs<'_>) -> Value + 'static,
    {
        Self(Rc::new(f))
    }

    /// Invoke the callable
    pub fn call(&self, args: &NativeFunctionArgs<'_>) -> Value {
        (self.0)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &NativeFunction) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({:p})", Rc::as_ptr(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let v = Value::from(42i32);
        assert_eq!(v.as_i64().unwrap(), 42);
        assert_eq!(v.as_u32().unwrap(), 42);
        assert_eq!(v.as_f64().unwrap(), 42.0);

        let v = Value::from(3.14f64);
        assert!((v.as_f64().unwrap() - 3.14).abs() < 0.001);

        let v = Value::from("hello");
        assert_eq!(v.as_str().unwrap(), "hello");

        let v = Value::from(true);
        assert!(v.as_bool().unwrap());

        assert!(Value::from(None::<i32>).is_null());
        assert!(Value::default().is_undefined());
    }

    #[test]
    fn test_type_errors() {
        let v = Value::from("string");
        assert!(v.as_i64().is_err());
        assert!(v.as_bool().is_err());
        assert!(Value::Int64(i64::MAX).as_i32().is_err());
    }

    #[test]
    fn test_numeric_equality_across_variants() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Int64(1 << 40), Value::Float((1u64 << 40) as f64));
        assert_ne!(Value::Int(1), Value::from("1"));
        assert_ne!(Value::Null, Value::Undefined);
    }

    #[test]
    fn test_object_identity_and_structure() {
        let a = DynamicObject::new().with_property("x", 1).with_property("y", "two");
        let b = DynamicObject::new().with_property("y", "two").with_property("x", 1.0);
        let alias = a.clone();

        assert!(a.ptr_eq(&alias));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);

        alias.set_property("x", 5);
        assert_eq!(a.get_property("x"), Value::from(5));
        assert_eq!(a.property_names(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_object_methods() {
        let obj = DynamicObject::new().with_method("add", |args| {
            let a = args.arg(0).as_f64().unwrap_or_default();
            let b = args.arg(1).as_f64().unwrap_or_default();
            Value::from(a + b)
        });

        assert_eq!(PropertyKind::of(&obj.get_property("add")), PropertyKind::Method);
        let args = NativeFunctionArgs::new(Value::Object(obj.clone()), vec![2.into(), 3.into()]);
        assert_eq!(obj.invoke_method("add", &args), Value::from(5));
        assert!(obj.invoke_method("missing", &args).is_undefined());
        assert!(obj.remove_property("add").is_some());
        assert!(obj.is_empty());
    }

    #[test]
    fn test_function_identity() {
        let f = NativeFunction::new(|args| Value::from(args.len() as i32));
        let g = NativeFunction::new(|_| Value::Undefined);
        assert_eq!(Value::from(f.clone()), Value::from(f.clone()));
        assert_ne!(Value::from(f.clone()), Value::from(g));
        assert_eq!(Value::from(f).call(&[1.into(), 2.into()]), Value::from(2));
    }

    #[test]
    fn test_display() {
        let v = Value::from(vec![Value::from(1), Value::from("a"), Value::Null]);
        assert_eq!(v.to_string(), "1,a,null");
        assert_eq!(Value::from(DynamicObject::new()).to_string(), "[object Object]");
    }
}
