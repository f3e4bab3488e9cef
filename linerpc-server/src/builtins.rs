//! Built-in functions.
//!
//! - `add(a, b)`: numeric sum, integer when both operands are integers
//! - `upper(s)`: uppercase a string
//! - `sleep(seconds)`: block the calling thread, used to check that blocking
//!   work does not stall other connections

use crate::registry::{expect_number, expect_str, Args, CallError, CallResult, FunctionRegistry};
use serde_json::{Number, Value};
use std::time::Duration;

/// Registers every built-in function.
pub fn register_all(registry: &mut FunctionRegistry) {
    registry.register_inline("add", add);
    registry.register_inline("upper", upper);
    registry.register_blocking("sleep", sleep);
}

pub fn add(args: Args) -> CallResult {
    let bound = args.bind("add", &["a", "b"])?;
    let a = expect_number("add", "a", &bound[0])?;
    let b = expect_number("add", "b", &bound[1])?;

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::from(sum));
        }
    }

    // as_f64 is always Some for serde_json numbers without arbitrary precision
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    Number::from_f64(x + y)
        .map(Value::Number)
        .ok_or_else(|| CallError::invalid_value("add", "result is not a finite number"))
}

pub fn upper(args: Args) -> CallResult {
    let bound = args.bind("upper", &["s"])?;
    let s = expect_str("upper", "s", &bound[0])?;
    Ok(Value::String(s.to_uppercase()))
}

pub fn sleep(args: Args) -> CallResult {
    let bound = args.bind("sleep", &["seconds"])?;
    let seconds = expect_number("sleep", "seconds", &bound[0])?
        .as_f64()
        .unwrap_or(f64::NAN);

    if seconds < 0.0 {
        return Err(CallError::invalid_value(
            "sleep",
            "sleep length must be non-negative",
        ));
    }
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| CallError::invalid_value("sleep", e.to_string()))?;

    tracing::debug!("sleep: blocking for {:?}", duration);
    std::thread::sleep(duration);
    Ok(Value::Null)
}
