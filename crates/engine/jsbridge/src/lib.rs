//! JavaScript bridge for host applications
//!
//! This crate provides:
//! - **Value**: A dynamic host value with shared objects and native functions
//! - **ScriptEngine**: An embedded QuickJS engine with time budgets and interruption
//! - **Native objects**: Host objects exposed to scripts with live property access
//! - **ObjectHandle / Cursor**: Safe handles and lazy paths into script state
//!
//! # Example
//!
//! ```rust,ignore
//! use jsbridge::{Cursor, DynamicObject, ScriptEngine, Value};
//!
//! let engine = ScriptEngine::new()?;
//!
//! // Expose a host object
//! let app = DynamicObject::new()
//!     .with_property("volume", 3)
//!     .with_method("log", |args| {
//!         println!("{}", args.arg(0));
//!         Value::Undefined
//!     });
//! engine.register_native_object("app", app.clone())?;
//!
//! // Scripts read and write it
//! engine.execute("app.volume = app.volume + 1; app.log('ready')")?;
//! assert_eq!(app.get_property("volume"), Value::from(4));
//!
//! // Host code reads script state
//! engine.execute("var scene = { items: [1, 2, 3] }")?;
//! let items = Cursor::parse(engine.root_object(), "scene.items")?;
//! assert!(items.is_array());
//! ```

mod binding;
mod config;
mod cursor;
mod engine;
mod error;
mod marshal;
mod object;
mod value;

pub use config::EngineConfig;
pub use cursor::{Cursor, PathStep};
pub use engine::{ScriptEngine, StopHandle, DEFAULT_MAX_EXECUTION_TIME};
pub use error::{Error, Result};
pub use object::ObjectHandle;
pub use value::{DynamicObject, NativeFunction, NativeFunctionArgs, PropertyKind, Value};

// Re-export rquickjs for downstream crates
pub use rquickjs;
