//! Call-site macros: variadic annotation attachment and formatted leaf
//! errors.

/// Attach any number of annotations to an error in one call.
///
/// Each argument after the error is anything implementing
/// [`KeyValuer`](crate::KeyValuer): an [`Op`](crate::Op), a
/// [`Severity`](crate::Severity), a [`Code`](crate::Code), a
/// [`Formatter`](crate::Formatter), or a [`kv()`](crate::kv()) pair. Expands
/// to [`with()`](crate::with()), so the default attribution policy applies.
///
/// ```
/// use errstack::{kv, new_msg, op, op_stack, Severity};
///
/// let err = errstack::with!(
///     new_msg("connection refused"),
///     op("fetch_user"),
///     Severity::Runtime,
///     kv("user_id", 42u64)
/// );
/// assert_eq!(op_stack(err.as_ref()), "fetch_user");
/// ```
#[macro_export]
macro_rules! with {
    ($err:expr $(, $entry:expr)* $(,)?) => {
        $crate::with(
            $err,
            ::std::vec![
                $(::std::boxed::Box::new($entry) as ::std::boxed::Box<dyn $crate::KeyValuer>),*
            ],
        )
    };
}

/// A formatted message-only error: `format!` piped into
/// [`new_msg`](crate::new_msg).
///
/// ```
/// let err = errstack::errorf!("shard {} unreachable", 3);
/// assert_eq!(err.to_string(), "shard 3 unreachable");
/// ```
#[macro_export]
macro_rules! errorf {
    ($($arg:tt)*) => {
        $crate::new_msg(::std::format!($($arg)*))
    };
}
