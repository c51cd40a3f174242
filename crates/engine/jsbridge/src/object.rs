//! Live handles onto engine values

use crate::binding::OBJECT_ID_PROPERTY;
use crate::engine::EngineState;
use crate::marshal;
use crate::{DynamicObject, Error, Result, Value};
use rquickjs::function::{Rest, This};
use rquickjs::{CatchResultExt, Ctx, Object, Persistent, Value as JsValue};
use std::rc::Rc;

/// A reference-counted handle onto one engine value.
///
/// Cloning the handle duplicates the engine reference; dropping it releases
/// the reference. The handle keeps its engine alive, so it never dangles.
///
/// Handles enter the engine on every call and must not be used from inside
/// a native function invoked by a script.
#[derive(Clone)]
pub struct ObjectHandle {
    value: Persistent<JsValue<'static>>,
    state: Rc<EngineState>,
}

impl ObjectHandle {
    pub(crate) fn new<'js>(ctx: &Ctx<'js>, state: &Rc<EngineState>, value: JsValue<'js>) -> Self {
        Self {
            value: Persistent::save(ctx, value),
            state: state.clone(),
        }
    }

    pub(crate) fn restore<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        self.value.clone().restore(ctx)
    }

    fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Ctx<'js>, JsValue<'js>) -> Result<R>,
    {
        self.state.enter(|ctx| -> Result<R> {
            let value = self.restore(&ctx)?;
            f(&ctx, value)
        })
    }

    /// Child object `name`, created as an empty object when absent
    pub fn child(&self, name: &str) -> Result<ObjectHandle> {
        self.with(|ctx, value| {
            let object = expect_object(&value)?;
            if !object.contains_key(name)? {
                object.set(name, Object::new(ctx.clone())?)?;
            }
            let child: JsValue = object.get(name)?;
            Ok(ObjectHandle::new(ctx, &self.state, child))
        })
    }

    /// Element `index` of an array.
    ///
    /// # Panics
    /// Panics if the handle does not refer to an array.
    pub fn index(&self, index: usize) -> Result<ObjectHandle> {
        self.with(|ctx, value| {
            let array = value
                .as_array()
                .unwrap_or_else(|| panic!("index {} on a non-array engine value", index));
            let element: JsValue = array.get(index)?;
            Ok(ObjectHandle::new(ctx, &self.state, element))
        })
    }

    /// Convert the referenced value.
    ///
    /// Bound native objects come back as the original host object.
    pub fn get(&self) -> Result<Value> {
        self.with(|ctx, value| Ok(marshal::from_engine(ctx, &self.state, value, None)?))
    }

    /// Convert property `name`
    pub fn get_property(&self, name: &str) -> Result<Value> {
        self.with(|ctx, value| {
            let property: JsValue = expect_object(&value)?.get(name).catch(ctx)?;
            Ok(marshal::from_engine(ctx, &self.state, property, Some(&value))?)
        })
    }

    /// Assign property `name`
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with(|ctx, target| {
            let converted = marshal::to_engine(ctx, &self.state, &value)?;
            expect_object(&target)?.set(name, converted).catch(ctx)?;
            Ok(())
        })
    }

    /// Assign element `index`
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let index = u32::try_from(index)
            .map_err(|_| Error::InvalidValue(format!("index {} out of range", index)))?;
        self.with(|ctx, target| {
            let converted = marshal::to_engine(ctx, &self.state, &value)?;
            expect_object(&target)?.set(index, converted).catch(ctx)?;
            Ok(())
        })
    }

    /// Call method `name` with this object as the receiver
    pub fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        tracing::trace!("Invoking method '{}' with {} argument(s)", name, args.len());
        self.with(|ctx, value| {
            let object = expect_object(&value)?;
            if !object.contains_key(name)? {
                return Err(Error::PropertyNotFound(name.to_string()));
            }
            let target: JsValue = object.get(name).catch(ctx)?;
            let function = target
                .into_function()
                .ok_or_else(|| Error::NotAFunction(name.to_string()))?;
            let arguments = marshal::arguments_to_engine(ctx, &self.state, args)?;
            let result: JsValue = function
                .call((This(value.clone()), Rest(arguments)))
                .catch(ctx)?;
            Ok(marshal::from_engine(ctx, &self.state, result, None)?)
        })
    }

    /// Check for property `name`, including inherited ones
    pub fn has_property(&self, name: &str) -> bool {
        self.with(|_, value| match value.as_object() {
            Some(object) => Ok(object.contains_key(name)?),
            None => Ok(false),
        })
        .unwrap_or(false)
    }

    /// Check if the handle refers to an array
    pub fn is_array(&self) -> bool {
        self.with(|_, value| Ok(value.is_array())).unwrap_or(false)
    }

    /// Check if the handle refers to an object (arrays and functions included)
    pub fn is_object(&self) -> bool {
        self.with(|_, value| Ok(value.is_object())).unwrap_or(false)
    }

    /// Length of the referenced array.
    ///
    /// # Panics
    /// Panics if the handle does not refer to an array.
    pub fn size(&self) -> usize {
        self.with(|_, value| {
            let array = value
                .as_array()
                .unwrap_or_else(|| panic!("size of a non-array engine value"));
            Ok(array.len())
        })
        .unwrap_or_default()
    }

    /// Snapshot of the object's own enumerable properties
    pub fn properties(&self) -> Result<DynamicObject> {
        self.with(|ctx, value| {
            let object = expect_object(&value)?;
            let snapshot = DynamicObject::new();
            for key in object.keys::<String>() {
                let key = key?;
                if key == OBJECT_ID_PROPERTY {
                    continue;
                }
                let property: JsValue = object.get(key.as_str()).catch(ctx)?;
                let converted = marshal::from_engine(ctx, &self.state, property, Some(&value))?;
                snapshot.set_property(key, converted);
            }
            Ok(snapshot)
        })
    }
}

fn expect_object<'a, 'js>(value: &'a JsValue<'js>) -> Result<&'a Object<'js>> {
    value.as_object().ok_or_else(|| Error::TypeError {
        expected: "object".to_string(),
        actual: format!("{:?}", value.type_of()),
    })
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle").finish_non_exhaustive()
    }
}
