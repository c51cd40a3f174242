//! End-to-end tests for the script bridge

use jsbridge::{Cursor, DynamicObject, EngineConfig, Error, NativeFunction, ScriptEngine, Value};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

fn calculator() -> DynamicObject {
    DynamicObject::new()
        .with_property("x", 1)
        .with_method("add", |args| {
            let a = args.arg(0).as_f64().unwrap_or_default();
            let b = args.arg(1).as_f64().unwrap_or_default();
            Value::from(a + b)
        })
}

#[test]
fn test_round_trip_through_script() {
    let engine = ScriptEngine::new().unwrap();
    engine
        .execute("function identity(v) { return v; }")
        .unwrap();

    let object = DynamicObject::new()
        .with_property("name", "box")
        .with_property("size", 2.5);
    for value in [
        Value::Undefined,
        Value::Null,
        Value::Bool(false),
        Value::Int(42),
        Value::Int64(-(1 << 35)),
        Value::Float(0.125),
        Value::from("text"),
        Value::from(vec![Value::from(1), Value::from("two"), Value::Null]),
        Value::from(object),
    ] {
        let back = engine.call_function("identity", &[value.clone()]).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn test_native_function_arguments() {
    let engine = ScriptEngine::new().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let record = seen.clone();
    let host = DynamicObject::new().with_method("echo", move |args| {
        record.borrow_mut().extend(args.arguments.iter().cloned());
        Value::from(args.len() as i32)
    });
    engine.register_native_object("host", host).unwrap();

    let result = engine.evaluate("host.echo(1, 'a', true)").unwrap();
    assert_eq!(result, Value::from(3));
    assert_eq!(
        *seen.borrow(),
        vec![Value::from(1), Value::from("a"), Value::from(true)]
    );
}

#[test]
fn test_native_function_as_global() {
    let engine = ScriptEngine::new().unwrap();
    let double = NativeFunction::new(|args| {
        Value::from(args.arg(0).as_f64().unwrap_or_default() * 2.0)
    });
    engine.set_global("double", double).unwrap();

    assert_eq!(engine.evaluate("double(21)").unwrap(), Value::from(42));
    assert_eq!(engine.evaluate("typeof double").unwrap(), Value::from("function"));
}

#[test]
fn test_timeout_interrupts_loop() {
    let engine = ScriptEngine::new().unwrap();
    let start = Instant::now();

    let result = engine.evaluate_with_timeout("while (true) {}", Duration::from_millis(50));
    assert!(matches!(result, Err(Error::Script(_))));
    assert!(start.elapsed() < Duration::from_secs(5));

    // The next call gets a fresh budget
    assert_eq!(engine.evaluate("1 + 2").unwrap(), Value::from(3));
}

#[test]
fn test_stop_from_another_thread() {
    let engine = ScriptEngine::new().unwrap();
    let handle = engine.stop_handle();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.stop();
    });

    let start = Instant::now();
    let result = engine.execute("while (true) {}");
    stopper.join().unwrap();

    assert!(matches!(result, Err(Error::Script(_))));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_cursor_survives_replacement() {
    let engine = ScriptEngine::new().unwrap();
    engine.execute("var a = { b: 1 }").unwrap();
    let cursor = Cursor::parse(engine.root_object(), "a.b").unwrap();

    assert_eq!(cursor.get(), Value::from(1));
    engine.execute("a = {}").unwrap();
    assert!(cursor.get().is_undefined());

    engine.execute("a.b = 'back'").unwrap();
    assert_eq!(cursor.get(), Value::from("back"));
}

#[test]
fn test_registered_object_identity() {
    let engine = ScriptEngine::new().unwrap();
    let object = calculator();
    engine.register_native_object("O", object.clone()).unwrap();

    let back = engine.root_object().child("O").unwrap().get().unwrap();
    assert!(back.as_object().unwrap().ptr_eq(&object));

    // Passing the object back into host code keeps its identity too
    let received = Rc::new(RefCell::new(None));
    let slot = received.clone();
    let sink = DynamicObject::new().with_method("take", move |args| {
        *slot.borrow_mut() = Some(args.arg(0));
        Value::Undefined
    });
    engine.register_native_object("sink", sink).unwrap();
    engine.execute("sink.take(O)").unwrap();

    let taken = received.borrow_mut().take().unwrap();
    assert!(taken.as_object().unwrap().ptr_eq(&object));
}

#[test]
fn test_property_dispatch() {
    let engine = ScriptEngine::new().unwrap();
    let object = calculator();
    engine.register_native_object("O", object.clone()).unwrap();

    assert_eq!(engine.evaluate("O.add(2, 3)").unwrap(), Value::from(5));

    engine.execute("O.x = 9").unwrap();
    assert_eq!(object.get_property("x"), Value::from(9));
    assert_eq!(engine.evaluate("O.x").unwrap(), Value::from(9));

    object.set_property("x", 11);
    assert_eq!(engine.evaluate("O.x").unwrap(), Value::from(11));
}

#[test]
fn test_identity_property_is_hidden() {
    let engine = ScriptEngine::new().unwrap();
    engine.register_native_object("O", calculator()).unwrap();

    let keys = engine.evaluate("Object.keys(O).join(',')").unwrap();
    assert_eq!(keys, Value::from("x,add"));
    assert_eq!(
        engine.evaluate("'__native_object_id' in O").unwrap(),
        Value::Bool(true)
    );

    let snapshot = engine.root_object().child("O").unwrap().properties().unwrap();
    assert_eq!(snapshot.property_names(), vec!["x".to_string(), "add".to_string()]);
}

#[test]
fn test_script_objects_are_not_bindings() {
    let engine = ScriptEngine::new().unwrap();
    let object = calculator();
    engine.register_native_object("O", object.clone()).unwrap();

    // Inherits the id property from a bound object
    engine.execute("var d = Object.create(O); d.extra = 5;").unwrap();
    let derived = engine.root_object().child("d").unwrap().get().unwrap();
    let derived = derived.as_object().unwrap();
    assert!(!derived.ptr_eq(&object));
    assert_eq!(derived.get_property("extra"), Value::from(5));

    // Carries its own id property
    let forged = engine
        .evaluate("({ __native_object_id: 1, mine: true })")
        .unwrap();
    let forged = forged.as_object().unwrap();
    assert!(!forged.ptr_eq(&object));
    assert_eq!(forged.get_property("mine"), Value::Bool(true));

    let received = Rc::new(RefCell::new(None));
    let slot = received.clone();
    let host = DynamicObject::new().with_method("take", move |args| {
        *slot.borrow_mut() = Some(args.arg(0));
        Value::Undefined
    });
    engine.register_native_object("host", host).unwrap();
    engine.execute("host.take({ __native_object_id: 1 })").unwrap();

    let taken = received.borrow_mut().take().unwrap();
    assert!(!taken.as_object().unwrap().ptr_eq(&object));
}

#[test]
fn test_nested_native_objects() {
    let engine = ScriptEngine::new().unwrap();
    let audio = DynamicObject::new().with_property("volume", 5);
    let app = DynamicObject::new()
        .with_property("title", "demo")
        .with_property("audio", audio.clone());
    engine.register_native_object("app", app).unwrap();
    assert_eq!(engine.live_bindings(), 2);

    engine.execute("app.audio.volume = app.audio.volume * 2").unwrap();
    assert_eq!(audio.get_property("volume"), Value::from(10));
}

#[test]
fn test_register_under_handle() {
    let engine = ScriptEngine::new().unwrap();
    let tools = engine.root_object().child("tools").unwrap();
    engine
        .register_native_object_under("calc", calculator(), &tools)
        .unwrap();

    assert_eq!(engine.evaluate("tools.calc.add(1, 1)").unwrap(), Value::from(2));
}

#[test]
fn test_reregistration_maps_to_same_host_object() {
    let engine = ScriptEngine::new().unwrap();
    let object = calculator();
    engine.register_native_object("A", object.clone()).unwrap();
    engine.register_native_object("B", object.clone()).unwrap();

    assert_eq!(engine.evaluate("A === B").unwrap(), Value::Bool(false));
    engine.execute("A.x = 3").unwrap();
    assert_eq!(engine.evaluate("B.x").unwrap(), Value::from(3));

    let root = engine.root_object();
    for name in ["A", "B"] {
        let back = root.child(name).unwrap().get().unwrap();
        assert!(back.as_object().unwrap().ptr_eq(&object));
    }
}

#[test]
fn test_script_callback_reentry() {
    let engine = ScriptEngine::new().unwrap();
    let host = DynamicObject::new().with_method("each", |args| {
        let callback = args.arg(1);
        if let Value::Array(items) = args.arg(0) {
            for item in items {
                args.call(&callback, vec![item]);
            }
        }
        Value::Undefined
    });
    engine.register_native_object("host", host).unwrap();

    let total = engine
        .evaluate("var total = 0; host.each([1, 2, 3], function (x) { total += x; }); total")
        .unwrap();
    assert_eq!(total, Value::from(6));
}

#[test]
fn test_kept_script_function_called_later() {
    let engine = ScriptEngine::new().unwrap();
    let kept = Rc::new(RefCell::new(Value::Undefined));

    let slot = kept.clone();
    let host = DynamicObject::new().with_method("keep", move |args| {
        *slot.borrow_mut() = args.arg(0);
        Value::Undefined
    });
    engine.register_native_object("host", host).unwrap();
    engine
        .execute("var base = 40; host.keep(function (n) { return base + n; })")
        .unwrap();

    let callback = kept.borrow().clone();
    assert!(callback.is_function());
    assert_eq!(callback.call(&[Value::from(2)]), Value::from(42));

    // The proxy keeps the engine alive; break the cycle through the host object
    drop(callback);
    *kept.borrow_mut() = Value::Undefined;
}

#[test]
fn test_syntax_error_surfaces() {
    let engine = ScriptEngine::new().unwrap();
    match engine.execute("syntax (((") {
        Err(Error::Script(message)) => assert!(!message.is_empty()),
        other => panic!("expected a script error, got {:?}", other),
    }
}

#[test]
fn test_throwing_getter_surfaces_script_error() {
    let engine = ScriptEngine::new().unwrap();
    match engine.evaluate("({ get x() { throw new Error('boom in getter'); } })") {
        Err(Error::Script(message)) => assert!(message.contains("boom in getter")),
        other => panic!("expected a script error, got {:?}", other),
    }

    // Nothing is left pending for the next call
    assert_eq!(engine.evaluate("1 + 1").unwrap(), Value::from(2));

    engine
        .execute("var thrower = { get x() { throw new Error('boom again'); } }")
        .unwrap();
    let handle = engine.root_object().child("thrower").unwrap();
    match handle.get_property("x") {
        Err(Error::Script(message)) => assert!(message.contains("boom again")),
        other => panic!("expected a script error, got {:?}", other),
    }
}

#[test]
fn test_bindings_released_after_collection() {
    let engine = ScriptEngine::new().unwrap();
    engine.register_native_object("O", calculator()).unwrap();
    assert_eq!(engine.live_bindings(), 1);

    engine.execute("delete globalThis.O").unwrap();
    engine.run_gc();
    assert_eq!(engine.live_bindings(), 0);
}

#[test]
fn test_root_object_properties() {
    let engine = ScriptEngine::new().unwrap();
    engine.execute("var answer = 42; var label = 'x'").unwrap();

    let globals = engine.root_object_properties().unwrap();
    assert_eq!(globals.get_property("answer"), Value::from(42));
    assert_eq!(globals.get_property("label"), Value::from("x"));
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "engine {{\n    max-execution-time-ms 30\n}}").unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_execution_time, Duration::from_millis(30));

    let engine = ScriptEngine::with_config(config).unwrap();
    assert_eq!(engine.max_execution_time(), Duration::from_millis(30));
    assert!(matches!(
        engine.execute("for (;;) {}"),
        Err(Error::Script(_))
    ));
}
