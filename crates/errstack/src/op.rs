//! The Op kind: a labeled step in a call trail, plus the symbol-name
//! machinery that turns backtrace frames into readable operation labels.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::path::Path;

use crate::kv::{Key, KeyValuer, Value};
use crate::value::values_as;

#[derive(PartialEq, Eq, Hash, Debug)]
pub(crate) struct OpKey;

/// An operation in the error chain: a function call, a method, a step of a
/// pipeline. Ops accumulate — attaching a second one never overwrites the
/// first — and render as a most-recent-first trail.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Op(Cow<'static, str>);

impl Op {
    /// Used when the call stack cannot be resolved.
    pub const UNKNOWN: Op = Op(Cow::Borrowed("<unknown function>"));

    /// Sentinel that suppresses automatic call-site attribution for one
    /// attachment call. It is filtered out, never stored in the chain.
    pub const NO_OP: Op = Op(Cow::Borrowed("no-op"));

    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Shorthand for [`Op::new`].
pub fn op(label: impl Into<Cow<'static, str>>) -> Op {
    Op::new(label)
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl KeyValuer for Op {
    fn key(&self) -> Key {
        op_key()
    }

    fn value(&self) -> Value {
        Value::new(self.clone())
    }
}

pub(crate) fn op_key() -> Key {
    Key::new(OpKey)
}

/// The operation trail, most recent first, joined with `": "`.
/// Empty string when the chain carries no operations.
pub fn op_stack(err: &(dyn StdError + 'static)) -> String {
    let ops = values_as::<Op>(err, &op_key());
    let mut out = String::with_capacity(32);
    for (i, op) in ops.iter().enumerate() {
        if i > 0 {
            out.push_str(": ");
        }
        out.push_str(op.as_str());
    }
    out
}

// ── Symbol-name derivation ────────────────────────────────────────
//
// Rust symbol names arrive as fully qualified, hash-suffixed paths like
// `myapp::fetch::{{closure}}::h1f00ba5ecafef00d`. An operation label keeps
// the short function name, qualified by its enclosing type when one is
// recognizable, the way `gerror` keeps GlobalId names human-first.

/// Build an Op from one resolved backtrace symbol.
///
/// `always_location` forces a ` (file:line)` suffix (panic origins);
/// otherwise only anonymous functions get one, and only when
/// `verbose_closures` is set.
pub(crate) fn frame_op(
    raw: &str,
    file: Option<&Path>,
    line: Option<u32>,
    always_location: bool,
    verbose_closures: bool,
) -> Op {
    let label = short_label(raw);
    let want_location =
        always_location || (verbose_closures && label.contains("{{closure}}"));
    if want_location {
        if let (Some(file), Some(line)) = (file, line) {
            let base = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Op::new(format!("{} ({}:{})", label, base, line));
        }
    }
    Op::new(label)
}

/// Strip the trailing symbol hash and the module path, keeping the short
/// function name qualified by its enclosing type where recognizable.
pub(crate) fn short_label(raw: &str) -> String {
    let mut segments = split_segments(raw);
    if let Some(last) = segments.last() {
        if is_symbol_hash(last) {
            segments.pop();
        }
    }
    if segments.is_empty() {
        return Op::UNKNOWN.as_str().to_string();
    }

    // Collapse trailing closure markers onto the nearest named ancestor.
    let mut end = segments.len();
    let mut closure = false;
    while end > 0 && segments[end - 1] == "{{closure}}" {
        closure = true;
        end -= 1;
    }
    if end == 0 {
        return "{{closure}}".to_string();
    }

    let base = segments[end - 1];
    let mut label = match segments[..end - 1].last().and_then(|s| type_qualifier(s)) {
        Some(qualifier) => format!("{}::{}", qualifier, base),
        None => base.to_string(),
    };
    if closure {
        label.push_str("::{{closure}}");
    }
    label
}

/// `h` followed by 16 hex digits: the rustc symbol disambiguator.
fn is_symbol_hash(segment: &str) -> bool {
    segment.len() == 17
        && segment.starts_with('h')
        && segment[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// A segment worth keeping as a qualifier: a plain type name, or the type
/// inside an `<Type as Trait>` impl segment.
fn type_qualifier(segment: &str) -> Option<String> {
    if let Some(inner) = segment.strip_prefix('<') {
        let inner = inner.strip_suffix('>').unwrap_or(inner);
        let path = inner.split(" as ").next().unwrap_or(inner);
        return split_segments(path)
            .last()
            .map(|short| short.to_string());
    }
    let first = segment.chars().next()?;
    if first.is_ascii_uppercase() {
        Some(segment.to_string())
    } else {
        None
    }
}

/// Split a symbol path on `::`, but not inside angle brackets, so
/// `<a::B as c::D>::method` stays three segments, not six.
fn split_segments(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = path.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && i + 1 < bytes.len() && bytes[i + 1] == b':' => {
                segments.push(&path[start..i]);
                start = i + 2;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(&path[start..]);
    segments
}
