//! Demo hosted objects: `echo` (a single-response method) and `counter`
//! (a pipe-mode generator method), used by both `listen` and `connect` to
//! exercise the engine end-to-end.

use linerpc::object::{Context, MethodOutcome, Params, SimpleObject};
use linerpc::RpcValue;

/// Build the root handler exposed by the `listen` side: `echo(x) -> x`,
/// `add(a, b) -> a + b`, `boom()` (always fails, for exercising the error
/// path), and `count(n)` (a pipe-mode method yielding `1..=n`).
pub fn root_handler() -> SimpleObject {
    SimpleObject::new()
        .with_method("echo", |_ctx: &dyn Context, params: Params| {
            let value = params
                .arg(0)
                .cloned()
                .unwrap_or_else(|| RpcValue::from_json(serde_json::Value::Null));
            Ok(MethodOutcome::Value(value))
        })
        .with_method("add", |_ctx: &dyn Context, params: Params| {
            let a = as_i64(&params, 0, "a")?;
            let b = as_i64(&params, 1, "b")?;
            Ok(MethodOutcome::Value(RpcValue::from_json(serde_json::Value::from(a + b))))
        })
        .with_method("boom", |_ctx: &dyn Context, _params: Params| {
            Err("RuntimeError: x".to_owned())
        })
        .with_method("count", |_ctx: &dyn Context, params: Params| {
            let n = as_i64(&params, 0, "n")?;
            if n < 0 {
                return Err("ValueError: n must be non-negative".to_owned());
            }
            let values = (1..=n).map(|v| Ok(RpcValue::from_json(serde_json::Value::from(v))));
            Ok(MethodOutcome::Pipe(Box::new(values)))
        })
}

fn as_i64(params: &Params, index: usize, kwname: &str) -> Result<i64, String> {
    let value = params
        .arg(index)
        .or_else(|| params.kwarg(kwname))
        .ok_or_else(|| format!("TypeError: missing argument {kwname:?}"))?;
    match value {
        RpcValue::Json(serde_json::Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("TypeError: {kwname} is not an integer")),
        _ => Err(format!("TypeError: {kwname} is not a number")),
    }
}
