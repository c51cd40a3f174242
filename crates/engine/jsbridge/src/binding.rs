//! Exposes host objects to scripts
//!
//! A registered [`DynamicObject`] becomes an engine object whose properties
//! forward to the host object:
//! - methods become engine functions
//! - nested objects are registered recursively
//! - plain values become getter/setter accessors
//!
//! Every callback captures only a binding id, a property ordinal and a shared
//! lease. The binding is looked up in the per-engine registry on each call
//! and unregistered when the engine finalizes the last callback holding the
//! lease.
//!
//! Bound engine objects are recognised by identity through a `WeakMap` that
//! scripts cannot reach. The visible id property is informational only.

use crate::engine::EngineState;
use crate::marshal::{self, Scope};
use crate::value::{DynamicObject, NativeFunctionArgs, PropertyKind, Value};
use rquickjs::function::{Rest, This};
use rquickjs::object::Accessor;
use rquickjs::function::Constructor;
use rquickjs::{Ctx, Function, Object, Persistent, Value as JsValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Reserved, non-enumerable property carrying the binding id
pub(crate) const OBJECT_ID_PROPERTY: &str = "__native_object_id";

pub(crate) type BindingId = u32;

/// One host object and its interned property names
struct Binding {
    object: DynamicObject,
    ordinals: HashMap<String, u16>,
    names: Vec<String>,
}

impl Binding {
    fn new(object: DynamicObject) -> Self {
        Self {
            object,
            ordinals: HashMap::new(),
            names: Vec::new(),
        }
    }

    fn intern(&mut self, name: &str) -> u16 {
        if let Some(&ordinal) = self.ordinals.get(name) {
            return ordinal;
        }
        assert!(
            self.names.len() < usize::from(u16::MAX),
            "too many properties on one native object"
        );
        let ordinal = self.names.len() as u16;
        self.ordinals.insert(name.to_string(), ordinal);
        self.names.push(name.to_string());
        ordinal
    }

    fn name(&self, ordinal: u16) -> &str {
        &self.names[usize::from(ordinal)]
    }
}

#[derive(Default)]
struct BindingRegistry {
    next_id: BindingId,
    live: HashMap<BindingId, Binding>,
}

impl BindingRegistry {
    fn insert(&mut self, binding: Binding) -> BindingId {
        self.next_id = self.next_id.wrapping_add(1);
        while self.live.contains_key(&self.next_id) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        self.live.insert(self.next_id, binding);
        self.next_id
    }
}

/// Live bindings of one engine.
///
/// Releases that arrive while the registry is borrowed (finalizers running
/// inside a dispatch) are queued and applied on the next mutable access.
#[derive(Default)]
pub(crate) struct BindingTable {
    registry: RefCell<BindingRegistry>,
    released: RefCell<Vec<BindingId>>,
}

impl BindingTable {
    fn insert(&self, binding: Binding) -> BindingId {
        self.flush_released();
        self.registry.borrow_mut().insert(binding)
    }

    fn release(&self, id: BindingId) {
        let removed = match self.registry.try_borrow_mut() {
            Ok(mut registry) => registry.live.remove(&id),
            Err(_) => {
                self.released.borrow_mut().push(id);
                None
            }
        };
        if removed.is_some() {
            tracing::trace!("Native object binding {} released", id);
        }
        // Dropped outside the borrow: host values may own engine values
        drop(removed);
    }

    fn flush_released(&self) {
        let pending = std::mem::take(&mut *self.released.borrow_mut());
        for id in pending {
            self.release(id);
        }
    }

    /// The host object and property name behind a dispatch.
    ///
    /// # Panics
    /// Panics if the binding is not live.
    fn resolve(&self, id: BindingId, ordinal: u16) -> (DynamicObject, String) {
        let registry = self.registry.borrow();
        let binding = registry
            .live
            .get(&id)
            .unwrap_or_else(|| panic!("dispatch through unknown native object binding {}", id));
        (binding.object.clone(), binding.name(ordinal).to_string())
    }

    fn object(&self, id: BindingId) -> Option<DynamicObject> {
        self.registry
            .borrow()
            .live
            .get(&id)
            .map(|binding| binding.object.clone())
    }

    /// Number of live bindings
    pub(crate) fn len(&self) -> usize {
        self.flush_released();
        self.registry.borrow().live.len()
    }
}

/// Engine objects created by [`register`], keyed weakly by identity.
///
/// The map and its methods are captured before any script runs, so scripts
/// can neither see the map nor patch `WeakMap.prototype`.
pub(crate) struct BoundObjects {
    map: Persistent<Object<'static>>,
    get: Persistent<Function<'static>>,
    set: Persistent<Function<'static>>,
}

impl BoundObjects {
    pub(crate) fn new(ctx: &Ctx<'_>) -> rquickjs::Result<Self> {
        let constructor: Constructor = ctx.globals().get("WeakMap")?;
        let map: Object = constructor.construct(())?;
        let get: Function = map.get("get")?;
        let set: Function = map.get("set")?;
        Ok(Self {
            map: Persistent::save(ctx, map),
            get: Persistent::save(ctx, get),
            set: Persistent::save(ctx, set),
        })
    }

    fn insert<'js>(&self, ctx: &Ctx<'js>, object: &Object<'js>, id: BindingId) -> rquickjs::Result<()> {
        let map = self.map.clone().restore(ctx)?;
        let set = self.set.clone().restore(ctx)?;
        set.call::<_, JsValue>((This(map), object.clone(), id))?;
        Ok(())
    }

    fn id<'js>(&self, ctx: &Ctx<'js>, object: &Object<'js>) -> Option<BindingId> {
        let map = self.map.clone().restore(ctx).ok()?;
        let get = self.get.clone().restore(ctx).ok()?;
        let id: JsValue = get.call((This(map), object.clone())).ok()?;
        let id = id.as_number()?;
        if id < 0.0 || id > f64::from(BindingId::MAX) || id.fract() != 0.0 {
            return None;
        }
        Some(id as BindingId)
    }
}

/// Keeps a binding registered while engine callbacks can reach it
struct BindingLease {
    id: BindingId,
    state: Weak<EngineState>,
}

impl Drop for BindingLease {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.bindings.release(self.id);
        }
    }
}

/// Register `object` as property `name` of `parent`, returning its binding id
pub(crate) fn register<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<EngineState>,
    name: &str,
    object: &DynamicObject,
    parent: &Object<'js>,
) -> rquickjs::Result<BindingId> {
    let mut binding = Binding::new(object.clone());
    let plan: Vec<(String, u16, Value)> = object
        .properties()
        .into_iter()
        .map(|(property, value)| {
            let ordinal = binding.intern(&property);
            (property, ordinal, value)
        })
        .collect();

    let id = state.bindings.insert(binding);
    let lease = Rc::new(BindingLease {
        id,
        state: Rc::downgrade(state),
    });
    tracing::debug!(
        "Registering native object '{}' as binding {} ({} properties)",
        name,
        id,
        plan.len()
    );

    let target = Object::new(ctx.clone())?;
    let identity = lease.clone();
    target.prop(
        OBJECT_ID_PROPERTY,
        Accessor::new_get(move || identity.id).configurable(),
    )?;

    for (property, ordinal, value) in plan {
        match PropertyKind::of(&value) {
            PropertyKind::Method => {
                let lease = lease.clone();
                let method = Function::new(
                    ctx.clone(),
                    move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
                        dispatch_call(&ctx, &lease, ordinal, args.0)
                    },
                )?;
                target.set(property.as_str(), method)?;
            }
            PropertyKind::Object => {
                if let Value::Object(child) = value {
                    register(ctx, state, &property, &child, &target)?;
                }
            }
            PropertyKind::Value => {
                let getter = lease.clone();
                let setter = lease.clone();
                target.prop(
                    property.as_str(),
                    Accessor::new(
                        move |ctx: Ctx<'js>| -> rquickjs::Result<JsValue<'js>> {
                            dispatch_get(&ctx, &getter, ordinal)
                        },
                        move |ctx: Ctx<'js>, value: JsValue<'js>| -> rquickjs::Result<()> {
                            dispatch_set(&ctx, &setter, ordinal, value)
                        },
                    )
                    .enumerable()
                    .configurable(),
                )?;
            }
        }
    }

    state.bound.insert(ctx, &target, id)?;
    parent.set(name, target)?;
    Ok(id)
}

fn dispatch_call<'js>(
    ctx: &Ctx<'js>,
    lease: &BindingLease,
    ordinal: u16,
    args: Vec<JsValue<'js>>,
) -> rquickjs::Result<JsValue<'js>> {
    let Some(state) = lease.state.upgrade() else {
        return Ok(JsValue::new_undefined(ctx.clone()));
    };
    let (object, name) = state.bindings.resolve(lease.id, ordinal);
    tracing::trace!("Dispatch call {}.{}", lease.id, name);

    let arguments = marshal::arguments_from_engine(ctx, &state, args);
    let scope = Scope::new(ctx.clone());
    let args = NativeFunctionArgs::with_scope(Value::Object(object.clone()), arguments, &scope);
    let result = object.invoke_method(&name, &args);
    marshal::to_engine(ctx, &state, &result)
}

fn dispatch_get<'js>(
    ctx: &Ctx<'js>,
    lease: &BindingLease,
    ordinal: u16,
) -> rquickjs::Result<JsValue<'js>> {
    let Some(state) = lease.state.upgrade() else {
        return Ok(JsValue::new_undefined(ctx.clone()));
    };
    let (object, name) = state.bindings.resolve(lease.id, ordinal);
    tracing::trace!("Dispatch get {}.{}", lease.id, name);
    marshal::to_engine(ctx, &state, &object.get_property(&name))
}

fn dispatch_set<'js>(
    ctx: &Ctx<'js>,
    lease: &BindingLease,
    ordinal: u16,
    value: JsValue<'js>,
) -> rquickjs::Result<()> {
    let Some(state) = lease.state.upgrade() else {
        return Ok(());
    };
    let (object, name) = state.bindings.resolve(lease.id, ordinal);
    tracing::trace!("Dispatch set {}.{}", lease.id, name);
    let value = marshal::from_engine(ctx, &state, value, None).unwrap_or_else(|e| {
        tracing::warn!("Value assigned to '{}' could not be converted: {}", name, e);
        Value::Undefined
    });
    object.set_property(name, value);
    Ok(())
}

/// The live host object behind an engine object created by [`register`].
///
/// Objects inheriting from a bound object, or carrying their own id
/// property, are not bindings.
pub(crate) fn bound_object<'js>(
    ctx: &Ctx<'js>,
    state: &EngineState,
    object: &Object<'js>,
) -> Option<DynamicObject> {
    let id = state.bound.id(ctx, object)?;
    state.bindings.object(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_interned_once() {
        let mut binding = Binding::new(DynamicObject::new());
        assert_eq!(binding.intern("a"), 0);
        assert_eq!(binding.intern("b"), 1);
        assert_eq!(binding.intern("a"), 0);
        assert_eq!(binding.name(1), "b");
    }

    #[test]
    fn test_release_while_borrowed_is_deferred() {
        let table = BindingTable::default();
        let id = table.insert(Binding::new(DynamicObject::new()));
        {
            let _borrowed = table.registry.borrow();
            table.release(id);
            assert_eq!(table.released.borrow().len(), 1);
        }
        assert_eq!(table.len(), 0);
    }

    #[test]
    #[should_panic(expected = "unknown native object binding")]
    fn test_dispatch_to_unknown_binding_panics() {
        let table = BindingTable::default();
        table.resolve(42, 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let table = BindingTable::default();
        let a = table.insert(Binding::new(DynamicObject::new()));
        let b = table.insert(Binding::new(DynamicObject::new()));
        assert_ne!(a, b);
        table.release(a);
        assert!(table.object(a).is_none());
        assert!(table.object(b).is_some());
    }
}
