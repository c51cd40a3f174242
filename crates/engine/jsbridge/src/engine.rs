//! JavaScript engine host
//!
//! Owns one QuickJS runtime and one context and provides:
//! - Evaluation with an execution time budget and cooperative interruption
//! - Global function calls with host value conversion
//! - Native object registration
//! - Handles onto the engine's object graph

use crate::binding::{self, BindingTable, BoundObjects};
use crate::config::EngineConfig;
use crate::marshal;
use crate::object::ObjectHandle;
use crate::{DynamicObject, Error, Result, Value};
use rquickjs::function::{Rest, This};
use rquickjs::{CatchResultExt, Context, Ctx, Runtime, Value as JsValue};
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Execution time budget used when none is configured
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(15);

/// Point in time after which the interrupt handler aborts execution
struct Deadline {
    epoch: Instant,
    at_ms: AtomicU64,
}

impl Deadline {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            at_ms: AtomicU64::new(u64::MAX),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn reset(&self, budget: Duration) {
        let budget = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self.at_ms
            .store(self.elapsed_ms().saturating_add(budget), Ordering::SeqCst);
    }

    fn expire(&self) {
        self.at_ms.store(0, Ordering::SeqCst);
    }

    fn is_expired(&self) -> bool {
        self.elapsed_ms() >= self.at_ms.load(Ordering::SeqCst)
    }
}

/// Stops a running script from any thread.
///
/// Interruption takes effect at the engine's next interrupt poll.
#[derive(Clone)]
pub struct StopHandle(Arc<Deadline>);

impl StopHandle {
    /// Abort the current execution
    pub fn stop(&self) {
        self.0.expire();
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("expired", &self.0.is_expired())
            .finish()
    }
}

/// State shared by the engine, its handles and engine function proxies.
///
/// Persisted engine values are declared before the context that owns them.
pub(crate) struct EngineState {
    pub(crate) bound: BoundObjects,
    context: Context,
    pub(crate) bindings: BindingTable,
    deadline: Arc<Deadline>,
    max_execution_time: Cell<Duration>,
}

impl EngineState {
    /// Enter the context with a fresh default budget
    pub(crate) fn enter<R>(&self, f: impl FnOnce(Ctx<'_>) -> R) -> R {
        self.enter_with_timeout(self.max_execution_time.get(), f)
    }

    /// Enter the context with a fresh deadline of `budget` from now
    pub(crate) fn enter_with_timeout<R>(&self, budget: Duration, f: impl FnOnce(Ctx<'_>) -> R) -> R {
        self.deadline.reset(budget);
        self.context.with(f)
    }
}

/// JavaScript engine with host value bridging
pub struct ScriptEngine {
    state: Rc<EngineState>,
    runtime: Runtime,
    config: EngineConfig,
}

impl ScriptEngine {
    /// Create an engine with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with limits taken from `config`
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }

        let deadline = Arc::new(Deadline::new());
        let poll = deadline.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || poll.is_expired())));

        let context = Context::full(&runtime)?;
        let bound = context.with(|ctx| BoundObjects::new(&ctx))?;
        tracing::debug!(
            "Script engine created (budget {:?}, memory limit {:?})",
            config.max_execution_time,
            config.memory_limit
        );

        let state = Rc::new(EngineState {
            bound,
            context,
            bindings: BindingTable::default(),
            deadline,
            max_execution_time: Cell::new(config.max_execution_time),
        });

        Ok(Self {
            state,
            runtime,
            config,
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Rc<EngineState> {
        &self.state
    }

    /// The configuration the engine was created with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current execution time budget
    pub fn max_execution_time(&self) -> Duration {
        self.state.max_execution_time.get()
    }

    /// Change the execution time budget for subsequent calls
    pub fn set_max_execution_time(&self, budget: Duration) {
        self.state.max_execution_time.set(budget);
    }

    /// Evaluate source text and convert its completion value
    pub fn evaluate(&self, source: &str) -> Result<Value> {
        self.evaluate_with_timeout(source, self.max_execution_time())
    }

    /// Evaluate source text within `budget`
    pub fn evaluate_with_timeout(&self, source: &str, budget: Duration) -> Result<Value> {
        tracing::debug!("Evaluating {} bytes (budget {:?})", source.len(), budget);
        let state = &self.state;
        let result = state.enter_with_timeout(budget, |ctx| -> Result<Value> {
            let value: JsValue = ctx.eval(source).catch(&ctx)?;
            Ok(marshal::from_engine(&ctx, state, value, None)?)
        });
        self.log_failure(&result);
        result
    }

    /// Run source text, discarding its completion value
    pub fn execute(&self, source: &str) -> Result<()> {
        self.execute_with_timeout(source, self.max_execution_time())
    }

    /// Run source text within `budget`
    pub fn execute_with_timeout(&self, source: &str, budget: Duration) -> Result<()> {
        tracing::debug!("Executing {} bytes (budget {:?})", source.len(), budget);
        let result = self.state.enter_with_timeout(budget, |ctx| -> Result<()> {
            ctx.eval::<(), _>(source).catch(&ctx)?;
            Ok(())
        });
        self.log_failure(&result);
        result
    }

    /// Run a script file
    pub fn execute_file(&self, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path)?;
        self.execute(&source)
    }

    /// Evaluate a script file and convert its completion value
    pub fn evaluate_file(&self, path: &Path) -> Result<Value> {
        let source = std::fs::read_to_string(path)?;
        self.evaluate(&source)
    }

    /// Call a global function with `this` set to the global object
    pub fn call_function(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.call_function_with_timeout(name, args, self.max_execution_time())
    }

    /// Call a global function within `budget`
    pub fn call_function_with_timeout(
        &self,
        name: &str,
        args: &[Value],
        budget: Duration,
    ) -> Result<Value> {
        tracing::debug!("Calling '{}' with {} argument(s)", name, args.len());
        let state = &self.state;
        let result = state.enter_with_timeout(budget, |ctx| -> Result<Value> {
            let globals = ctx.globals();
            let target: JsValue = globals.get(name).catch(&ctx)?;
            let function = target
                .into_function()
                .ok_or_else(|| Error::NotAFunction(name.to_string()))?;
            let arguments = marshal::arguments_to_engine(&ctx, state, args)?;
            let value: JsValue = function
                .call((This(globals), Rest(arguments)))
                .catch(&ctx)?;
            Ok(marshal::from_engine(&ctx, state, value, None)?)
        });
        self.log_failure(&result);
        result
    }

    /// Read a global variable
    pub fn get_global(&self, name: &str) -> Result<Value> {
        self.root_object().get_property(name)
    }

    /// Assign a global variable
    pub fn set_global(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.root_object().set_property(name, value)
    }

    fn log_failure<T>(&self, result: &Result<T>) {
        if let Err(Error::Script(message)) = result {
            if self.state.deadline.is_expired() {
                tracing::warn!("Script interrupted: {}", message);
            } else {
                tracing::debug!("Script failed: {}", message);
            }
        }
    }

    /// Abort the current execution at the next interrupt poll
    pub fn stop(&self) {
        self.state.deadline.expire();
    }

    /// A thread-safe handle that can stop this engine
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.state.deadline.clone())
    }

    /// Expose `object` to scripts as the global `name`.
    ///
    /// Registering under an existing name replaces the previous binding.
    pub fn register_native_object(&self, name: &str, object: DynamicObject) -> Result<()> {
        let state = &self.state;
        state.enter(|ctx| -> Result<()> {
            binding::register(&ctx, state, name, &object, &ctx.globals())?;
            Ok(())
        })
    }

    /// Expose `object` to scripts as property `name` of `parent`
    pub fn register_native_object_under(
        &self,
        name: &str,
        object: DynamicObject,
        parent: &ObjectHandle,
    ) -> Result<()> {
        let state = &self.state;
        state.enter(|ctx| -> Result<()> {
            let target = parent
                .restore(&ctx)?
                .into_object()
                .ok_or_else(|| Error::InvalidValue(format!("cannot register '{}' under a non-object", name)))?;
            binding::register(&ctx, state, name, &object, &target)?;
            Ok(())
        })
    }

    /// Handle onto the global object
    pub fn root_object(&self) -> ObjectHandle {
        let state = &self.state;
        state.enter(|ctx| ObjectHandle::new(&ctx, state, ctx.globals().into_value()))
    }

    /// Snapshot of the global object's enumerable properties
    pub fn root_object_properties(&self) -> Result<DynamicObject> {
        self.root_object().properties()
    }

    /// Number of native object bindings still reachable from scripts
    pub fn live_bindings(&self) -> usize {
        self.state.bindings.len()
    }

    /// Run a full garbage collection cycle
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("config", &self.config)
            .field("max_execution_time", &self.max_execution_time())
            .finish()
    }
}
