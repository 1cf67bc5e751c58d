//! Helpers meant to be called from a debugger or log lines.
use crate::{HostRuntime, Symbol, Value};

/// Name of `id`, or a placeholder when the host does not know it.
pub fn symbol_name(host: &dyn HostRuntime, id: Symbol) -> String {
    match host.symbol_name(id) {
        Some(name) => name.to_string(),
        None => format!("<unknown symbol {}>", id.raw()),
    }
}

/// `inspect` output of `value`.
///
/// Runs user code. If that raises, the raw word is shown instead.
pub fn describe_value(host: &mut dyn HostRuntime, value: Value) -> String {
    host.inspect(value).unwrap_or_else(|_| format!("{value:?}"))
}
