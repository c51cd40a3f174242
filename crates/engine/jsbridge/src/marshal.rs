//! Value conversion between host values and engine values
//!
//! Host to engine conversion is total. Engine to host conversion can fail
//! (string decoding, property access on exotic objects), in which case the
//! caller decides whether to surface the error or degrade to undefined.

use crate::binding::{self, OBJECT_ID_PROPERTY};
use crate::engine::EngineState;
use crate::value::{DynamicObject, NativeFunction, NativeFunctionArgs, Value};
use crate::{Error, Result};
use rquickjs::function::{Rest, This};
use rquickjs::{Array, CatchResultExt, Ctx, Function, Object, Persistent, Value as JsValue};
use std::rc::Rc;

/// Convert a host value into a fresh engine value
pub(crate) fn to_engine<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    value: &Value,
) -> rquickjs::Result<JsValue<'js>> {
    let converted = match value {
        Value::Null => JsValue::new_null(ctx.clone()),
        Value::Undefined => JsValue::new_undefined(ctx.clone()),
        Value::Bool(b) => JsValue::new_bool(ctx.clone(), *b),
        Value::Int(i) => JsValue::new_int(ctx.clone(), *i),
        Value::Int64(i) => match i32::try_from(*i) {
            Ok(small) => JsValue::new_int(ctx.clone(), small),
            Err(_) => JsValue::new_float(ctx.clone(), *i as f64),
        },
        Value::Float(f) => JsValue::new_float(ctx.clone(), *f),
        Value::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, to_engine(ctx, state, item)?)?;
            }
            array.into_value()
        }
        Value::Object(object) => {
            let target = Object::new(ctx.clone())?;
            for (name, property) in object.properties() {
                target.set(name.as_str(), to_engine(ctx, state, &property)?)?;
            }
            target.into_value()
        }
        Value::Function(function) => native_function(ctx, state, function.clone())?.into_value(),
    };
    Ok(converted)
}

/// Wrap a host callable in an engine function that owns it
fn native_function<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    function: NativeFunction,
) -> rquickjs::Result<Function<'js>> {
    let state = Rc::downgrade(state);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>,
              this: This<JsValue<'js>>,
              args: Rest<JsValue<'js>>|
              -> rquickjs::Result<JsValue<'js>> {
            // The engine is being torn down
            let Some(state) = state.upgrade() else {
                return Ok(JsValue::new_undefined(ctx));
            };

            let this = receiver_from_engine(&ctx, &state, this.0);
            let arguments = arguments_from_engine(&ctx, &state, args.0);

            tracing::trace!("Native call with {} argument(s)", arguments.len());
            let scope = Scope::new(ctx.clone());
            let result = function.call(&NativeFunctionArgs::with_scope(this, arguments, &scope));
            to_engine(&ctx, &state, &result)
        },
    )
}

/// Convert the receiver of a native call.
///
/// Bound host objects map back to themselves and the global object maps to
/// undefined, so that plain function calls do not snapshot the whole global
/// scope.
fn receiver_from_engine<'js>(ctx: &Ctx<'js>, state: &Rc<EngineState>, this: JsValue<'js>) -> Value {
    if this == ctx.globals().into_value() {
        return Value::Undefined;
    }
    from_engine(ctx, state, this, None).unwrap_or_else(|e| {
        tracing::warn!("Receiver could not be converted: {}", e);
        Value::Undefined
    })
}

/// Convert an engine value into a host value.
///
/// `parent` is the object the value was read from; engine functions use it
/// as their receiver when called from the host (the global object otherwise).
///
/// Exceptions thrown while reading properties are caught and reported as
/// [`Error::Script`], leaving no exception pending in the context.
pub(crate) fn from_engine<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    value: JsValue<'js>,
    parent: Option<&JsValue<'js>>,
) -> Result<Value> {
    let mut visiting = Vec::new();
    Ok(convert(ctx, state, value, parent, &mut visiting).catch(ctx)?)
}

fn convert<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    value: JsValue<'js>,
    parent: Option<&JsValue<'js>>,
    visiting: &mut Vec<JsValue<'js>>,
) -> rquickjs::Result<Value> {
    if value.is_undefined() {
        return Ok(Value::Undefined);
    }
    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Some(number) = value.as_number() {
        return Ok(Value::Float(number));
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_string()?));
    }
    if value.is_function() {
        let Some(function) = value.clone().into_function() else {
            return Ok(Value::Undefined);
        };
        let this = match parent {
            Some(parent) => parent.clone(),
            None => ctx.globals().into_value(),
        };
        return Ok(Value::Function(proxy(ctx, state, function, this)));
    }
    // Reference cycles are cut at the second visit
    if visiting.iter().any(|seen| *seen == value) {
        tracing::warn!("Cyclic engine value converted to undefined");
        return Ok(Value::Undefined);
    }
    if let Some(array) = value.as_array() {
        visiting.push(value.clone());
        let mut items = Vec::with_capacity(array.len());
        for i in 0..array.len() {
            let item: JsValue = array.get(i)?;
            items.push(convert(ctx, state, item, Some(&value), visiting)?);
        }
        visiting.pop();
        return Ok(Value::Array(items));
    }
    if let Some(object) = value.as_object() {
        if let Some(bound) = binding::bound_object(ctx, state, object) {
            return Ok(Value::Object(bound));
        }
        visiting.push(value.clone());
        let snapshot = DynamicObject::new();
        for name in collect_property_names(object)? {
            let property: JsValue = object.get(name.as_str())?;
            let converted = convert(ctx, state, property, Some(&value), visiting)?;
            snapshot.set_property(name, converted);
        }
        visiting.pop();
        return Ok(Value::Object(snapshot));
    }

    tracing::trace!("Unsupported engine type {:?} converted to undefined", value.type_of());
    Ok(Value::Undefined)
}

/// Enumerable string keys of an object and its prototype chain.
///
/// Own properties come first; a shadowed name keeps its first position.
pub(crate) fn collect_property_names(object: &Object<'_>) -> rquickjs::Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    let mut current = Some(object.clone());
    while let Some(level) = current {
        for key in level.keys::<String>() {
            let key = key?;
            if key != OBJECT_ID_PROPERTY && !names.contains(&key) {
                names.push(key);
            }
        }
        current = level.get_prototype();
    }
    Ok(names)
}

/// Convert the arguments of a native call; failures become undefined
pub(crate) fn arguments_from_engine<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    arguments: Vec<JsValue<'js>>,
) -> Vec<Value> {
    arguments
        .into_iter()
        .enumerate()
        .map(|(i, arg)| {
            from_engine(ctx, state, arg, None).unwrap_or_else(|e| {
                tracing::warn!("Argument {} could not be converted: {}", i, e);
                Value::Undefined
            })
        })
        .collect()
}

/// Convert host arguments for an engine call
pub(crate) fn arguments_to_engine<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    arguments: &[Value],
) -> rquickjs::Result<Vec<JsValue<'js>>> {
    arguments
        .iter()
        .map(|arg| to_engine(ctx, state, arg))
        .collect()
}

/// Build a host callable that forwards to an engine function
fn proxy<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    function: Function<'js>,
    this: JsValue<'js>,
) -> NativeFunction {
    let callable = EngineCallable {
        function: Persistent::save(ctx, function),
        this: Persistent::save(ctx, this),
        state: state.clone(),
    };
    NativeFunction::new(move |args| callable.invoke(args))
}

/// An engine function held from the host side.
///
/// Field order matters: the persisted values are released before the
/// engine state they belong to.
pub(crate) struct EngineCallable {
    function: Persistent<Function<'static>>,
    this: Persistent<JsValue<'static>>,
    state: Rc<EngineState>,
}

impl EngineCallable {
    fn invoke(&self, args: &NativeFunctionArgs<'_>) -> Value {
        // Inside a native callback the engine is already entered
        if let Some(scope) = args.scope() {
            if let Some(result) = scope.call(self, args) {
                return result;
            }
        }

        self.state.enter(|ctx| match self.restore(&ctx) {
            Ok((function, this)) => self.call_restored(&ctx, function, this, args),
            Err(e) => {
                tracing::warn!("Engine function could not be restored: {}", e);
                Value::Undefined
            }
        })
    }

    fn restore<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<(Function<'js>, JsValue<'js>)> {
        let function = self.function.clone().restore(ctx)?;
        let this = self.this.clone().restore(ctx)?;
        Ok((function, this))
    }

    fn call_restored<'js>(
        &self,
        ctx: &Ctx<'js>,
        function: Function<'js>,
        this: JsValue<'js>,
        args: &NativeFunctionArgs<'_>,
    ) -> Value {
        let result = arguments_to_engine(ctx, &self.state, &args.arguments)
            .and_then(|arguments| function.call::<_, JsValue>((This(this), Rest(arguments))))
            .catch(ctx)
            .map_err(Error::from)
            .and_then(|result| from_engine(ctx, &self.state, result, None));

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Engine function call failed: {}", e);
                Value::Undefined
            }
        }
    }
}

/// Access to an engine context that is already entered
pub(crate) trait EngineScope {
    /// Call an engine function within this scope.
    ///
    /// Returns `None` when the function belongs to a different engine.
    fn call(&self, callable: &EngineCallable, args: &NativeFunctionArgs<'_>) -> Option<Value>;
}

/// The context of a native call in progress
pub(crate) struct Scope<'js> {
    ctx: Ctx<'js>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>) -> Self {
        Self { ctx }
    }
}

impl EngineScope for Scope<'_> {
    fn call(&self, callable: &EngineCallable, args: &NativeFunctionArgs<'_>) -> Option<Value> {
        let (function, this) = callable.restore(&self.ctx).ok()?;
        Some(callable.call_restored(&self.ctx, function, this, args))
    }
}
