//! Engine configuration
//!
//! Limits can be given in code or read from a KDL file:
//!
//! ```kdl
//! engine {
//!     max-execution-time-ms 250
//!     memory-limit 67108864
//!     max-stack-size 1048576
//!     gc-threshold 4194304
//! }
//! ```
//!
//! The same keys are accepted as properties of the `engine` node
//! (`engine max-execution-time-ms=250`).

use crate::engine::DEFAULT_MAX_EXECUTION_TIME;
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Keys accepted inside the `engine` node
const SETTINGS: &[&str] = &[
    "max-execution-time-ms",
    "memory-limit",
    "max-stack-size",
    "gc-threshold",
];

/// Limits applied to a [`ScriptEngine`](crate::ScriptEngine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time budget for each evaluate / execute / call
    pub max_execution_time: Duration,
    /// Heap limit in bytes
    pub memory_limit: Option<usize>,
    /// Native stack limit in bytes
    pub max_stack_size: Option<usize>,
    /// Allocation volume that triggers a collection
    pub gc_threshold: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from a KDL file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_kdl_str(&content)
    }

    /// Parse the configuration from KDL text.
    ///
    /// Missing keys keep their defaults; a document without an `engine` node
    /// yields the default configuration.
    pub fn from_kdl_str(content: &str) -> Result<Self> {
        let doc: kdl::KdlDocument = content.parse()?;
        let mut config = Self::default();

        for node in doc.nodes() {
            if node.name().value() != "engine" {
                tracing::warn!("Ignoring unknown configuration node '{}'", node.name().value());
                continue;
            }

            // Property form
            for entry in node.entries() {
                if let Some(name) = entry.name() {
                    config.apply(name.value(), entry.value())?;
                }
            }

            // Child node form
            if let Some(children) = node.children() {
                for child in children.nodes() {
                    let key = child.name().value();
                    if !SETTINGS.contains(&key) {
                        tracing::warn!("Ignoring unknown engine setting '{}'", key);
                        continue;
                    }
                    match child.entries().iter().find(|e| e.name().is_none()) {
                        Some(entry) => config.apply(key, entry.value())?,
                        None => {
                            return Err(Error::InvalidValue(format!("'{}' needs a value", key)));
                        }
                    }
                }
            }
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &kdl::KdlValue) -> Result<()> {
        match key {
            "max-execution-time-ms" => {
                self.max_execution_time = Duration::from_millis(Self::integer(key, value)?);
            }
            "memory-limit" => self.memory_limit = Some(Self::size(key, value)?),
            "max-stack-size" => self.max_stack_size = Some(Self::size(key, value)?),
            "gc-threshold" => self.gc_threshold = Some(Self::size(key, value)?),
            _ => tracing::warn!("Ignoring unknown engine setting '{}'", key),
        }
        Ok(())
    }

    fn integer(key: &str, value: &kdl::KdlValue) -> Result<u64> {
        match value {
            kdl::KdlValue::Integer(i) => u64::try_from(*i)
                .map_err(|_| Error::InvalidValue(format!("'{}' out of range: {}", key, i))),
            other => Err(Error::InvalidValue(format!(
                "'{}' expects a non-negative integer, got {:?}",
                key, other
            ))),
        }
    }

    fn size(key: &str, value: &kdl::KdlValue) -> Result<usize> {
        let bytes = Self::integer(key, value)?;
        usize::try_from(bytes)
            .map_err(|_| Error::InvalidValue(format!("'{}' out of range: {}", key, bytes)))
    }
}
