//! # errstack — annotated error chains
//!
//! Wraps any `std::error::Error` in an immutable chain of typed
//! annotations: an operation trail, a severity, a machine-readable code,
//! key/value context, and a pluggable formatter. The wrapped error is never
//! mutated; each annotation is one new node whose parent is the chain so
//! far, so divergent code paths can annotate one shared error
//! independently and cheaply.
//!
//! ## Annotation kinds
//!
//! | Kind          | Accumulation  | Read back with                  |
//! |---------------|---------------|---------------------------------|
//! | [`Op`]        | trail, newest first | [`op_stack`]              |
//! | [`Severity`]  | newest wins   | [`severity_of`]                 |
//! | [`Code`]      | newest wins   | [`code_of`]                     |
//! | [`Formatter`] | newest wins   | [`formatter_of`], [`format`]    |
//! | [`kv()`] pairs | all kept     | [`value_of`], [`value_map`]     |
//!
//! ## Quick start
//!
//! ```rust
//! use errstack::{code_of, kv, new_msg, op, op_stack, Code, Severity};
//!
//! fn fetch_user(id: u64) -> Result<(), errstack::DynError> {
//!     let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "backend timed out");
//!     Err(errstack::with!(
//!         io,
//!         op("fetch_user"),
//!         Severity::Runtime,
//!         Code::new("USER_FETCH"),
//!         kv("user_id", id)
//!     ))
//! }
//!
//! let err = fetch_user(42).unwrap_err();
//! assert_eq!(op_stack(err.as_ref()), "fetch_user");
//! assert_eq!(code_of(err.as_ref()), Code::new("USER_FETCH"));
//! assert_eq!(
//!     errstack::format(err.as_ref()),
//!     "fetch_user: [runtime] (USER_FETCH) backend timed out {user_id=42}"
//! );
//! ```
//!
//! When an attachment call carries no explicit [`Op`], the calling function
//! is identified from the stack and attached as one ([`Policy`] controls
//! this). [`Op::NO_OP`] suppresses that for a single call. [`guard()`]
//! turns a panic inside a closure into an error carrying [`Code::PANIC`]
//! and the panic site.

#[macro_use]
mod macros;

mod code;
mod error;
mod formatter;
mod guard;
mod kv;
mod op;
mod severity;
mod std_compat;
mod value;
mod with;

// ── Public API ────────────────────────────────────────────────────

pub use code::{code_of, Code};
pub use error::{chain, root_cause, Annotated, Chain, DynError, IntoDynError};
pub use formatter::{format, format_opt, formatter_of, Formatter};
pub use guard::{guard, guard_unit};
pub use kv::{kv, kv_opaque, Key, KeyValue, KeyValuer, Value};
pub use op::{op, op_stack, Op};
pub use severity::{severity_of, Severity};
pub use std_compat::{find_cause, is_match, join, new_msg, Joined, Message};
pub use value::{
    context_entries, value_as, value_map, value_map_of, value_of, values_as, values_map_of,
    values_of,
};
pub use with::{with, with_arc, with_opt, with_policy, Policy, ResultExt};
