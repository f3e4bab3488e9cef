//! Request dispatch.
//!
//! Turns one decoded frame into exactly one [`Response`]. Every failure on
//! the way (bad JSON, unknown function, argument mismatch, a panicking
//! function) is converted into an `error` response here, so nothing a peer
//! sends can take down the connection handler.

use crate::metrics::{Metrics, UNKNOWN_FUNCTION_LABEL};
use crate::registry::{Args, CallError, Callable, FunctionRegistry};
use futures::FutureExt;
use linerpc_protocol::{ProtocolError, Request, Response};
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

/// Request-level failures, each reported to the peer as an `error` response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("bad request: {0}")]
    BadRequest(#[from] ProtocolError),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{0}")]
    Invocation(#[from] CallError),

    #[error("{func}() panicked: {message}")]
    Panicked { func: String, message: String },

    #[error("{func}() worker failed: {message}")]
    WorkerFailed { func: String, message: String },
}

impl DispatchError {
    /// Short label used for the errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(e) if e.is_framing() => "framing",
            DispatchError::BadRequest(_) => "validation",
            DispatchError::UnknownFunction(_) => "unknown_function",
            DispatchError::Invocation(_) => "invocation",
            DispatchError::Panicked { .. } => "panic",
            DispatchError::WorkerFailed { .. } => "worker",
        }
    }
}

impl From<DispatchError> for Response {
    fn from(err: DispatchError) -> Self {
        Response::error(err.to_string())
    }
}

/// Resolves requests against a registry and executes them.
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    /// Creates a dispatcher over a frozen registry.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parses a decoded frame and executes it.
    pub async fn dispatch_line(&self, line: &str) -> Response {
        match Request::parse(line) {
            Ok(request) => self.execute_request(request).await,
            Err(e) => self.reject(e),
        }
    }

    /// Builds the response for a frame that could not be parsed.
    pub fn reject(&self, err: ProtocolError) -> Response {
        let err = DispatchError::BadRequest(err);
        tracing::debug!("Rejecting frame: {}", err);
        self.record(UNKNOWN_FUNCTION_LABEL, Some(&err));
        err.into()
    }

    pub async fn execute_request(&self, request: Request) -> Response {
        self.execute(&request.func_name, request.args, request.kwargs)
            .await
    }

    /// Executes `func_name` with the given arguments.
    pub async fn execute(
        &self,
        func_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Response {
        let label = if self.registry.resolve(func_name).is_some() {
            func_name
        } else {
            UNKNOWN_FUNCTION_LABEL
        };
        let timer = self.metrics.as_ref().map(|m| {
            m.request_duration
                .with_label_values(&[label])
                .start_timer()
        });

        let result = self.invoke(func_name, Args::new(args, kwargs)).await;
        drop(timer); // Observation happens on drop

        self.record(label, result.as_ref().err());
        match result {
            Ok(value) => Response::Result(value),
            Err(e) => {
                tracing::debug!("{} failed: {}", func_name, e);
                e.into()
            }
        }
    }

    async fn invoke(&self, func_name: &str, args: Args) -> Result<Value, DispatchError> {
        let entry = self
            .registry
            .resolve(func_name)
            .ok_or_else(|| DispatchError::UnknownFunction(func_name.to_string()))?;

        match entry.callable() {
            Callable::NonBlocking(f) => {
                // Calling `f` may itself panic before returning a future.
                let call = AssertUnwindSafe(async move { f(args).await });
                match call.catch_unwind().await {
                    Ok(result) => Ok(result?),
                    Err(panic) => Err(DispatchError::Panicked {
                        func: func_name.to_string(),
                        message: panic_message(panic.as_ref()),
                    }),
                }
            }
            Callable::Blocking(f) => {
                let f = f.clone();
                match tokio::task::spawn_blocking(move || f(args)).await {
                    Ok(result) => Ok(result?),
                    Err(e) if e.is_panic() => Err(DispatchError::Panicked {
                        func: func_name.to_string(),
                        message: panic_message(e.into_panic().as_ref()),
                    }),
                    Err(e) => Err(DispatchError::WorkerFailed {
                        func: func_name.to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    fn record(&self, label: &str, err: Option<&DispatchError>) {
        if let Some(ref metrics) = self.metrics {
            metrics.requests_total.with_label_values(&[label]).inc();
            if let Some(e) = err {
                metrics.errors_total.with_label_values(&[e.kind()]).inc();
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
