//! Jinja prompt rendering for the judge scorer.
//!
//! Templates use Jinja2 syntax (`{{ metadata.change_log | trim }}`,
//! `{% for a in approvals %}...{% endfor %}`, `{# comments #}`) via minijinja. Undefined
//! values, including attributes of undefined values, render as empty text. Strings render
//! verbatim, `none` renders empty, lists and maps render as compact JSON. `tojson` pretty
//! prints with a 2-space indent.

use std::fmt::Write;
use std::sync::OnceLock;

use minijinja::value::ValueKind;
use minijinja::{Environment, ErrorKind, Output, State, UndefinedBehavior, Value as JinjaValue};
use serde_json::Value;

use crate::error::TemplateError;

fn environment() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_formatter(format_value);
        env.add_filter("tojson", tojson);
        env
    })
}

/// Render `template` against `context`.
pub fn render(template: &str, context: &Value) -> Result<String, TemplateError> {
    Ok(environment().render_str(template, context)?)
}

fn format_value(
    out: &mut Output<'_>,
    state: &State<'_, '_>,
    value: &JinjaValue,
) -> Result<(), minijinja::Error> {
    match value.kind() {
        ValueKind::None | ValueKind::Undefined => Ok(()),
        ValueKind::Seq | ValueKind::Map => {
            let json = serde_json::to_string(value).map_err(json_error)?;
            out.write_str(&json)
                .map_err(|_| minijinja::Error::new(ErrorKind::WriteFailure, "failed to write value"))
        }
        _ => minijinja::escape_formatter(out, state, value),
    }
}

fn tojson(value: JinjaValue) -> Result<String, minijinja::Error> {
    serde_json::to_string_pretty(&value).map_err(json_error)
}

fn json_error(err: serde_json::Error) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, "value is not JSON serializable")
        .with_source(err)
}
