//! Function registry.
//!
//! Maps function names to callables. The registry is filled at startup through
//! `&mut self` registration calls and then frozen behind an `Arc`, so serving
//! only ever reads it.

use futures::future::{self, BoxFuture, FutureExt};
use linerpc_protocol::json_kind;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Result of invoking a registered function.
pub type CallResult = Result<Value, CallError>;

/// A function that may block its calling thread.
pub type BlockingFn = dyn Fn(Args) -> CallResult + Send + Sync;

/// A function that yields to the scheduler instead of blocking.
pub type AsyncFn = dyn Fn(Args) -> BoxFuture<'static, CallResult> + Send + Sync;

/// Errors raised by a function while binding its arguments or running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("{func}() takes {expected} positional argument(s) but {given} were given")]
    TooManyArguments {
        func: String,
        expected: usize,
        given: usize,
    },

    #[error("{func}() missing required argument '{name}'")]
    MissingArgument { func: String, name: String },

    #[error("{func}() got an unexpected keyword argument '{name}'")]
    UnexpectedKeyword { func: String, name: String },

    #[error("{func}() got multiple values for argument '{name}'")]
    DuplicateArgument { func: String, name: String },

    #[error("{func}() argument '{name}' must be {expected}, not {got}")]
    InvalidType {
        func: String,
        name: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("{func}(): {message}")]
    InvalidValue { func: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl CallError {
    /// Creates a generic failure for user-defined functions.
    pub fn failed(message: impl Into<String>) -> Self {
        CallError::Failed(message.into())
    }

    pub fn invalid_value(func: &str, message: impl Into<String>) -> Self {
        CallError::InvalidValue {
            func: func.to_string(),
            message: message.into(),
        }
    }
}

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    named: Map<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>, named: Map<String, Value>) -> Self {
        Self { positional, named }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> &Map<String, Value> {
        &self.named
    }

    /// Binds the arguments to declared parameter names.
    ///
    /// Positional values fill parameters left to right, then keywords fill
    /// the rest by name. Every parameter must end up bound exactly once. The
    /// returned vector has one value per parameter, in declaration order.
    pub fn bind(self, func: &str, params: &[&str]) -> Result<Vec<Value>, CallError> {
        if self.positional.len() > params.len() {
            return Err(CallError::TooManyArguments {
                func: func.to_string(),
                expected: params.len(),
                given: self.positional.len(),
            });
        }

        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }

        for (name, value) in self.named {
            let idx = params.iter().position(|p| *p == name).ok_or_else(|| {
                CallError::UnexpectedKeyword {
                    func: func.to_string(),
                    name: name.clone(),
                }
            })?;
            if slots[idx].is_some() {
                return Err(CallError::DuplicateArgument {
                    func: func.to_string(),
                    name,
                });
            }
            slots[idx] = Some(value);
        }

        slots
            .into_iter()
            .zip(params)
            .map(|(slot, name)| {
                slot.ok_or_else(|| CallError::MissingArgument {
                    func: func.to_string(),
                    name: name.to_string(),
                })
            })
            .collect()
    }
}

/// Extracts a number argument.
pub fn expect_number<'a>(
    func: &str,
    name: &str,
    value: &'a Value,
) -> Result<&'a Number, CallError> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(invalid_type(func, name, "a number", other)),
    }
}

/// Extracts a string argument.
pub fn expect_str<'a>(func: &str, name: &str, value: &'a Value) -> Result<&'a str, CallError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(invalid_type(func, name, "a string", other)),
    }
}

fn invalid_type(func: &str, name: &str, expected: &'static str, got: &Value) -> CallError {
    CallError::InvalidType {
        func: func.to_string(),
        name: name.to_string(),
        expected,
        got: json_kind(got),
    }
}

/// How a registered function is invoked.
///
/// Decided at registration time: blocking callables are offloaded to the
/// blocking thread pool, non-blocking ones are awaited on the calling task.
#[derive(Clone)]
pub enum Callable {
    Blocking(Arc<BlockingFn>),
    NonBlocking(Arc<AsyncFn>),
}

impl Callable {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Callable::Blocking(_))
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Blocking(_) => f.write_str("Callable::Blocking"),
            Callable::NonBlocking(_) => f.write_str("Callable::NonBlocking"),
        }
    }
}

/// A registered function.
#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    callable: Callable,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn is_blocking(&self) -> bool {
        self.callable.is_blocking()
    }
}

/// Name-to-function table.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, Entry>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_all(&mut registry);
        registry
    }

    /// Registers a callable under `name`.
    ///
    /// An existing entry with the same name is replaced and returned.
    pub fn register(&mut self, name: impl Into<String>, callable: Callable) -> Option<Entry> {
        let name = name.into();
        let entry = Entry {
            name: name.clone(),
            callable,
        };
        let previous = self.entries.insert(name, entry);
        if let Some(ref prev) = previous {
            tracing::debug!("Replaced registry entry '{}'", prev.name);
        }
        previous
    }

    /// Registers a function that may block; it will run on a worker thread.
    pub fn register_blocking<F>(&mut self, name: impl Into<String>, f: F) -> Option<Entry>
    where
        F: Fn(Args) -> CallResult + Send + Sync + 'static,
    {
        self.register(name, Callable::Blocking(Arc::new(f)))
    }

    /// Registers an async function, awaited directly on the connection's task.
    pub fn register_async<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Option<Entry>
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.register(
            name,
            Callable::NonBlocking(Arc::new(move |args| f(args).boxed())),
        )
    }

    /// Registers a synchronous function that never blocks, run inline.
    pub fn register_inline<F>(&mut self, name: impl Into<String>, f: F) -> Option<Entry>
    where
        F: Fn(Args) -> CallResult + Send + Sync + 'static,
    {
        self.register(
            name,
            Callable::NonBlocking(Arc::new(move |args| future::ready(f(args)).boxed())),
        )
    }

    /// Looks up an entry by exact, case-sensitive name.
    pub fn resolve(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(positional: Value, named: Value) -> Args {
        let positional = positional.as_array().cloned().unwrap_or_default();
        let named = named.as_object().cloned().unwrap_or_default();
        Args::new(positional, named)
    }

    #[test]
    fn test_bind_positional() {
        let bound = args(json!([1, 2]), json!({})).bind("f", &["a", "b"]).unwrap();
        assert_eq!(bound, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_bind_mixed() {
        let bound = args(json!([1]), json!({"b": 2}))
            .bind("f", &["a", "b"])
            .unwrap();
        assert_eq!(bound, vec![json!(1), json!(2)]);

        let bound = args(json!([]), json!({"b": "y", "a": "x"}))
            .bind("f", &["a", "b"])
            .unwrap();
        assert_eq!(bound, vec![json!("x"), json!("y")]);
    }

    #[test]
    fn test_bind_too_many() {
        let err = args(json!([1, 2, 3]), json!({}))
            .bind("add", &["a", "b"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "add() takes 2 positional argument(s) but 3 were given"
        );
    }

    #[test]
    fn test_bind_missing() {
        let err = args(json!([1]), json!({})).bind("add", &["a", "b"]).unwrap_err();
        assert_eq!(
            err,
            CallError::MissingArgument {
                func: "add".to_string(),
                name: "b".to_string()
            }
        );
    }

    #[test]
    fn test_bind_unexpected_keyword() {
        let err = args(json!([]), json!({"c": 1}))
            .bind("add", &["a", "b"])
            .unwrap_err();
        assert!(matches!(err, CallError::UnexpectedKeyword { ref name, .. } if name == "c"));
    }

    #[test]
    fn test_bind_duplicate() {
        let err = args(json!([1]), json!({"a": 2}))
            .bind("add", &["a", "b"])
            .unwrap_err();
        assert!(matches!(err, CallError::DuplicateArgument { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_expect_helpers() {
        assert_eq!(expect_str("f", "s", &json!("x")).unwrap(), "x");
        let err = expect_str("upper", "s", &json!(5)).unwrap_err();
        assert_eq!(err.to_string(), "upper() argument 's' must be a string, not number");

        assert!(expect_number("f", "n", &json!(1.5)).is_ok());
        assert!(expect_number("f", "n", &json!(null)).is_err());
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.is_empty());

        registry.register_blocking("slow", |_| Ok(Value::Null));
        registry.register_inline("fast", |_| Ok(json!(1)));
        registry.register_async("later", |_| async { Ok(json!(2)) });

        assert_eq!(registry.len(), 3);
        assert!(registry.resolve("slow").unwrap().is_blocking());
        assert!(!registry.resolve("fast").unwrap().is_blocking());
        assert!(!registry.resolve("later").unwrap().is_blocking());
        assert_eq!(registry.names(), vec!["fast", "later", "slow"]);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let mut registry = FunctionRegistry::new();
        registry.register_inline("upper", |_| Ok(Value::Null));
        assert!(registry.resolve("upper").is_some());
        assert!(registry.resolve("UPPER").is_none());
        assert!(registry.resolve("upper ").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.register_inline("f", |_| Ok(json!(1))).is_none());

        let previous = registry.register_blocking("f", |_| Ok(json!(2)));
        assert!(!previous.unwrap().is_blocking());
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("f").unwrap().is_blocking());
    }

    #[test]
    fn test_with_builtins() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["add", "sleep", "upper"]);
        assert!(registry.resolve("sleep").unwrap().is_blocking());
    }
}
