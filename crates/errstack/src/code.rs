//! The Code kind: a stable, machine-readable identifier.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use crate::kv::{Key, KeyValuer, Value};
use crate::value::value_as;

#[derive(PartialEq, Eq, Hash, Debug)]
pub(crate) struct CodeKey;

/// A stable identifier callers can match on without parsing messages.
/// Newest attachment wins when read back.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Code(Cow<'static, str>);

impl Code {
    /// The default: no code set.
    pub const UNSET: Code = Code(Cow::Borrowed(""));

    /// Reserved code attached by [`crate::guard()`] when a panic is
    /// converted into an error.
    pub const PANIC: Code = Code(Cow::Borrowed("PANIC"));

    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl KeyValuer for Code {
    fn key(&self) -> Key {
        code_key()
    }

    fn value(&self) -> Value {
        Value::new(self.clone())
    }
}

pub(crate) fn code_key() -> Key {
    Key::new(CodeKey)
}

/// The current code of `err`; [`Code::UNSET`] when none was attached.
pub fn code_of(err: &(dyn StdError + 'static)) -> Code {
    value_as::<Code>(err, &code_key()).unwrap_or(Code::UNSET)
}
