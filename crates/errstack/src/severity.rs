//! The Severity kind: coarse classification for handling layers.

use std::error::Error as StdError;
use std::fmt;

use crate::kv::{Key, KeyValuer, Value};
use crate::value::value_as;

#[derive(PartialEq, Eq, Hash, Debug)]
pub(crate) struct SeverityKey;

/// Classifies an error in groups handling layers can dispatch on: a retry
/// layer retries only `Runtime` errors, an HTTP layer maps `Input` to 400.
/// Newest attachment wins when read back.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Severity {
    /// No severity was set.
    Unset,
    /// The operation could be executed again, e.g. a timeout.
    Runtime,
    /// Unrecoverable; stop, do not retry.
    Fatal,
    /// Expected bad input, e.g. an invalid email in a request.
    Input,
    /// Domain-specific classification.
    Custom(String),
}

impl Severity {
    pub fn custom(label: impl Into<String>) -> Self {
        Self::Custom(label.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Unset => "",
            Severity::Runtime => "runtime",
            Severity::Fatal => "fatal",
            Severity::Input => "input",
            Severity::Custom(label) => label,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KeyValuer for Severity {
    fn key(&self) -> Key {
        severity_key()
    }

    fn value(&self) -> Value {
        Value::new(self.clone())
    }
}

pub(crate) fn severity_key() -> Key {
    Key::new(SeverityKey)
}

/// The current severity of `err`; [`Severity::Unset`] when none was attached.
pub fn severity_of(err: &(dyn StdError + 'static)) -> Severity {
    value_as::<Severity>(err, &severity_key()).unwrap_or(Severity::Unset)
}
