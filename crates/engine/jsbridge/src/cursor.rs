//! Lazy paths into the engine's object graph
//!
//! A [`Cursor`] stores a root handle and a list of name/index steps. It holds
//! no intermediate engine values: every operation walks the path again from
//! the root, so a cursor stays safe when scripts replace objects along the
//! way. A step that cannot be satisfied makes the cursor unresolved.
//!
//! # Example
//!
//! ```rust,ignore
//! use jsbridge::{Cursor, ScriptEngine};
//!
//! let engine = ScriptEngine::new()?;
//! engine.execute("var app = { scene: { items: [ { name: 'a' } ] } }")?;
//!
//! let name = Cursor::parse(engine.root_object(), "app.scene.items[0].name")?;
//! assert_eq!(name.get().as_str()?, "a");
//! ```

use crate::{Error, ObjectHandle, Result, Value};
use std::fmt;

/// One step of a cursor path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Named property
    Name(String),
    /// Array element
    Index(usize),
}

impl From<&str> for PathStep {
    fn from(name: &str) -> Self {
        PathStep::Name(name.to_string())
    }
}

impl From<String> for PathStep {
    fn from(name: String) -> Self {
        PathStep::Name(name)
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Name(name) => write!(f, "{}", name),
            PathStep::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// A path from a root object, re-resolved on every access
#[derive(Clone)]
pub struct Cursor {
    root: ObjectHandle,
    path: Vec<PathStep>,
}

impl Cursor {
    /// Cursor at the root itself
    pub fn new(root: ObjectHandle) -> Self {
        Self {
            root,
            path: Vec::new(),
        }
    }

    /// Cursor for a dotted path with bracketed indices (e.g. "a.b[0].c")
    pub fn parse(root: ObjectHandle, path: &str) -> Result<Self> {
        Ok(Self {
            root,
            path: parse_path(path)?,
        })
    }

    /// The steps of this cursor
    pub fn path(&self) -> &[PathStep] {
        &self.path
    }

    /// Cursor one step further down
    pub fn child(&self, step: impl Into<PathStep>) -> Cursor {
        let mut path = self.path.clone();
        path.push(step.into());
        Cursor {
            root: self.root.clone(),
            path,
        }
    }

    /// Convert the value at this path; undefined when unresolved
    pub fn get(&self) -> Value {
        match self.full_resolution() {
            Some(handle) => handle.get().unwrap_or_else(|e| {
                tracing::warn!("Value at '{}' could not be converted: {}", self, e);
                Value::Undefined
            }),
            None => Value::Undefined,
        }
    }

    /// Assign the value at this path.
    ///
    /// Only the parent of the last step has to exist.
    ///
    /// # Panics
    /// Panics on the root cursor or when the parent cannot be resolved.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let (parent, step) = self.resolved_parent("set");
        match step {
            PathStep::Name(name) => parent.set_property(name, value),
            PathStep::Index(index) => parent.set_index(*index, value),
        }
    }

    /// Call the method named by the last step on its parent.
    ///
    /// # Panics
    /// Panics on the root cursor, when the parent cannot be resolved, or when
    /// the last step is an index.
    pub fn invoke(&self, args: &[Value]) -> Result<Value> {
        let (parent, step) = self.resolved_parent("invoke");
        match step {
            PathStep::Name(name) => parent.invoke_method(name, args),
            PathStep::Index(index) => panic!("cannot invoke array element [{}] at '{}'", index, self),
        }
    }

    /// Check if the parent of the last step resolves, so that [`set`](Self::set)
    /// can succeed. The last step itself may be missing.
    pub fn is_valid(&self) -> bool {
        self.partial_resolution().is_some()
    }

    /// Check if the path resolves to an array
    pub fn is_array(&self) -> bool {
        self.full_resolution()
            .is_some_and(|handle| handle.is_array())
    }

    /// Handle at this path, creating an empty object for a missing last name.
    ///
    /// # Panics
    /// Panics when the parent cannot be resolved.
    pub fn get_or_create_object(&self) -> Result<ObjectHandle> {
        let Some((parent, step)) = self.partial_resolution() else {
            panic!("cannot resolve the parent of '{}'", self);
        };
        match step {
            None => Ok(parent),
            Some(PathStep::Name(name)) => parent.child(name),
            Some(PathStep::Index(index)) => {
                if parent.is_array() && *index < parent.size() {
                    parent.index(*index)
                } else {
                    Err(Error::PropertyNotFound(self.to_string()))
                }
            }
        }
    }

    /// Resolve every step except the last.
    ///
    /// Returns the parent handle and the last step (`None` for the root
    /// cursor), or `None` when an intermediate step cannot be satisfied.
    pub fn partial_resolution(&self) -> Option<(ObjectHandle, Option<&PathStep>)> {
        let Some((last, parents)) = self.path.split_last() else {
            return Some((self.root.clone(), None));
        };
        let mut handle = self.root.clone();
        for step in parents {
            handle = resolve(&handle, step)?;
        }
        Some((handle, Some(last)))
    }

    /// Resolve the whole path
    pub fn full_resolution(&self) -> Option<ObjectHandle> {
        match self.partial_resolution()? {
            (handle, None) => Some(handle),
            (parent, Some(last)) => resolve(&parent, last),
        }
    }

    fn resolved_parent(&self, operation: &str) -> (ObjectHandle, &PathStep) {
        match self.partial_resolution() {
            Some((parent, Some(step))) => (parent, step),
            Some((_, None)) => panic!("cannot {} the root of a cursor", operation),
            None => panic!("cannot {} '{}': path does not resolve", operation, self),
        }
    }
}

/// Take one step from `handle`, if the step exists
fn resolve(handle: &ObjectHandle, step: &PathStep) -> Option<ObjectHandle> {
    match step {
        PathStep::Name(name) => {
            if handle.has_property(name) {
                handle.child(name).ok()
            } else {
                None
            }
        }
        PathStep::Index(index) => {
            if handle.is_array() && *index < handle.size() {
                handle.index(*index).ok()
            } else {
                None
            }
        }
    }
}

fn parse_path(path: &str) -> Result<Vec<PathStep>> {
    let invalid = || Error::InvalidValue(format!("malformed path '{}'", path));
    let mut steps = Vec::new();
    if path.is_empty() {
        return Ok(steps);
    }

    for part in path.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(open) => part.split_at(open),
            None => (part, ""),
        };
        if name.is_empty() {
            return Err(invalid());
        }
        steps.push(PathStep::Name(name.to_string()));

        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(invalid());
            }
            let close = rest.find(']').ok_or_else(invalid)?;
            let index = rest[1..close].parse::<usize>().map_err(|_| invalid())?;
            steps.push(PathStep::Index(index));
            rest = &rest[close + 1..];
        }
    }
    Ok(steps)
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.path.iter().enumerate() {
            if i > 0 && matches!(step, PathStep::Name(_)) {
                write!(f, ".")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptEngine;

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("a.b[0].c").unwrap(),
            vec![
                PathStep::from("a"),
                PathStep::from("b"),
                PathStep::from(0usize),
                PathStep::from("c"),
            ]
        );
        assert_eq!(
            parse_path("grid[1][2]").unwrap(),
            vec![PathStep::from("grid"), PathStep::Index(1), PathStep::Index(2)]
        );
        assert!(parse_path("").unwrap().is_empty());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1").is_err());
    }

    #[test]
    fn test_display_round_trips_path() {
        let engine = ScriptEngine::new().unwrap();
        let cursor = Cursor::parse(engine.root_object(), "a.b[0].c").unwrap();
        assert_eq!(cursor.to_string(), "a.b[0].c");
    }

    #[test]
    fn test_cursor_follows_replacement() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("var a = { b: 1 }").unwrap();
        let cursor = Cursor::new(engine.root_object()).child("a").child("b");

        assert_eq!(cursor.get(), Value::from(1));
        engine.execute("a = {}").unwrap();
        assert!(cursor.get().is_undefined());
        assert!(cursor.is_valid());
        assert!(cursor.full_resolution().is_none());
    }

    #[test]
    fn test_valid_when_parent_resolves() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("var a = {}").unwrap();
        let missing = Cursor::parse(engine.root_object(), "a.missing").unwrap();
        let deeper = missing.child("deeper");

        assert!(missing.is_valid());
        assert!(!deeper.is_valid());

        missing.set(3).unwrap();
        assert_eq!(missing.get(), Value::from(3));
    }

    #[test]
    fn test_set_creates_last_step_only() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("var config = {}").unwrap();
        let root = Cursor::new(engine.root_object());

        root.child("config").child("depth").set(4).unwrap();
        assert_eq!(engine.evaluate("config.depth").unwrap(), Value::from(4));
    }

    #[test]
    #[should_panic(expected = "path does not resolve")]
    fn test_set_through_missing_parent_panics() {
        let engine = ScriptEngine::new().unwrap();
        let cursor = Cursor::parse(engine.root_object(), "missing.value").unwrap();
        let _ = cursor.set(1);
    }

    #[test]
    #[should_panic(expected = "root of a cursor")]
    fn test_set_root_panics() {
        let engine = ScriptEngine::new().unwrap();
        let _ = Cursor::new(engine.root_object()).set(1);
    }

    #[test]
    fn test_array_steps() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("var items = [ { name: 'first' }, { name: 'second' } ]").unwrap();
        let items = Cursor::new(engine.root_object()).child("items");

        assert!(items.is_array());
        assert_eq!(items.child(1usize).child("name").get(), Value::from("second"));
        assert!(items.child(2usize).full_resolution().is_none());
        assert!(!items.child(5usize).child("name").is_valid());

        items.child(0usize).child("name").set("renamed").unwrap();
        assert_eq!(engine.evaluate("items[0].name").unwrap(), Value::from("renamed"));
    }

    #[test]
    fn test_invoke() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .execute("var math = { twice: function (x) { return x * 2; } }")
            .unwrap();
        let twice = Cursor::parse(engine.root_object(), "math.twice").unwrap();
        assert_eq!(twice.invoke(&[Value::from(21)]).unwrap(), Value::from(42));
    }

    #[test]
    #[should_panic(expected = "cannot invoke array element")]
    fn test_invoke_index_panics() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("var fns = [function () {}]").unwrap();
        let _ = Cursor::parse(engine.root_object(), "fns[0]").unwrap().invoke(&[]);
    }

    #[test]
    fn test_get_or_create_object() {
        let engine = ScriptEngine::new().unwrap();
        let cursor = Cursor::parse(engine.root_object(), "created").unwrap();
        assert!(cursor.full_resolution().is_none());

        let handle = cursor.get_or_create_object().unwrap();
        handle.set_property("ok", true).unwrap();
        assert!(cursor.full_resolution().is_some());
        assert_eq!(engine.evaluate("created.ok").unwrap(), Value::Bool(true));
    }
}
