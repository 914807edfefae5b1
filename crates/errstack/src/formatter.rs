//! The formatting engine: renders accumulated chain state into diagnostic
//! text under a pluggable policy.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::code::code_of;
use crate::error::{chain, root_cause, Annotated};
use crate::kv::{Key, KeyValuer, Value};
use crate::op::op_stack;
use crate::severity::{severity_of, Severity};
use crate::value::{context_entries, value_as};

#[derive(PartialEq, Eq, Hash, Debug)]
pub(crate) struct FormatterKey;

/// Substituted when a degenerate chain carries nothing renderable.
const NO_CAUSE: &str = "<no cause>";

type RenderPolicy = dyn Fn(&(dyn StdError + 'static)) -> String + Send + Sync;

/// A rendering policy. Attach one to a chain to override how everything
/// below it is rendered; newest attachment wins.
#[derive(Clone)]
pub struct Formatter(Arc<RenderPolicy>);

impl Formatter {
    /// A caller-defined policy. It receives the whole chain and fully
    /// replaces the default grammar.
    pub fn new(
        render: impl Fn(&(dyn StdError + 'static)) -> String + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(render))
    }

    /// Built-in alternate: render only the deepest root cause's message.
    pub fn root_cause() -> Self {
        Self::new(|err| root_cause(err).to_string())
    }

    /// Built-in alternate: root cause plus context entries, without the
    /// operation trail, severity, or code.
    pub fn root_with_kv() -> Self {
        Self::new(|err| {
            let mut out = root_cause(err).to_string();
            push_context(&mut out, err);
            out
        })
    }

    /// Render `err` under this policy.
    pub fn render(&self, err: &(dyn StdError + 'static)) -> String {
        (self.0)(err)
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(render_default)
    }
}

impl fmt::Display for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ErrorFormatter>")
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ErrorFormatter>")
    }
}

impl KeyValuer for Formatter {
    fn key(&self) -> Key {
        formatter_key()
    }

    fn value(&self) -> Value {
        Value::new(self.clone())
    }
}

pub(crate) fn formatter_key() -> Key {
    Key::new(FormatterKey)
}

/// The current formatter of `err`; the default policy when none was attached.
pub fn formatter_of(err: &(dyn StdError + 'static)) -> Formatter {
    value_as::<Formatter>(err, &formatter_key()).unwrap_or_default()
}

/// Render `err` under its current formatter.
pub fn format(err: &(dyn StdError + 'static)) -> String {
    formatter_of(err).render(err)
}

/// Render an optional error; absence renders as the empty string.
pub fn format_opt(err: Option<&(dyn StdError + 'static)>) -> String {
    err.map(format).unwrap_or_default()
}

// ── Default policy ────────────────────────────────────────────────
//
// "<op trail>: [<severity>] (<code>) <cause> {k=v, ...}"
// with each segment omitted when empty or unset.

fn render_default(err: &(dyn StdError + 'static)) -> String {
    let mut out = String::with_capacity(64);

    let ops = op_stack(err);
    if !ops.is_empty() {
        out.push_str(&ops);
        out.push_str(": ");
    }

    let severity = severity_of(err);
    if severity != Severity::Unset {
        out.push('[');
        out.push_str(severity.as_str());
        out.push_str("] ");
    }

    let code = code_of(err);
    if !code.is_unset() {
        out.push('(');
        out.push_str(code.as_str());
        out.push_str(") ");
    }

    out.push_str(&native_cause(err));
    push_context(&mut out, err);
    out
}

/// The `Display` of the nearest non-annotation link: the native chain
/// renders its own message. Falls back to a placeholder rather than failing
/// on a degenerate chain.
fn native_cause(err: &(dyn StdError + 'static)) -> String {
    for link in chain(err) {
        if link.downcast_ref::<Annotated>().is_none() {
            return link.to_string();
        }
    }
    NO_CAUSE.to_string()
}

fn push_context(out: &mut String, err: &(dyn StdError + 'static)) {
    let entries = context_entries(err);
    if entries.is_empty() {
        return;
    }
    out.push_str(" {");
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&key_text(key));
        out.push('=');
        out.push_str(&value.stringify());
    }
    out.push('}');
}

/// String keys render bare; anything else falls back to its `Debug` form.
fn key_text(key: &Key) -> String {
    if let Some(s) = key.downcast_ref::<String>() {
        return s.clone();
    }
    if let Some(s) = key.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    format!("{:?}", key)
}
