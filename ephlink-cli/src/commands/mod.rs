//! Command implementations.
//!
//! Each subcommand family is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod monitor;
pub(crate) mod raw;
pub(crate) mod settings;

use {
    crate::{CliError, was_interrupted},
    anyhow::Result,
};

/// Fail with a cancellation if Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Wrap a JSON payload in the `{ "ok": true, "data": ... }` envelope.
pub(crate) fn json_ok(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": data,
    })
}
