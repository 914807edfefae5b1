//! Plain building blocks for chains that start from scratch: message-only
//! errors, aggregation of independent failures, and typed cause lookup.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::error::{chain, DynError};

/// A message-only error, the usual leaf of a fresh chain. Prefer
/// [`errorf!`](crate::errorf!) when the message is formatted.
#[derive(Debug)]
pub struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// A new message-only error.
pub fn new_msg(text: impl Into<String>) -> Message {
    Message(text.into())
}

/// Several independent failures reported as one, each keeping its own chain.
///
/// Traversal does not descend into the members: `source()` is `None`, so a
/// joined error is itself the root cause of any chain built on top of it.
/// Walk [`Joined::errors`] explicitly to inspect the members.
#[derive(Clone, Debug)]
pub struct Joined(Vec<DynError>);

impl Joined {
    pub fn errors(&self) -> &[DynError] {
        &self.0
    }
}

impl fmt::Display for Joined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl StdError for Joined {}

/// Aggregate errors: none in, `None` out; a single error passes through
/// unwrapped; two or more become a [`Joined`].
pub fn join(errs: impl IntoIterator<Item = DynError>) -> Option<DynError> {
    let mut errs: Vec<DynError> = errs.into_iter().collect();
    match errs.len() {
        0 => None,
        1 => errs.pop(),
        _ => Some(Arc::new(Joined(errs))),
    }
}

/// The first link in the chain of `err` that is a `T`, annotation nodes
/// included. The typed counterpart of walking `source()` by hand.
pub fn find_cause<'a, T: StdError + 'static>(
    err: &'a (dyn StdError + 'static),
) -> Option<&'a T> {
    chain(err).find_map(|link| link.downcast_ref::<T>())
}

/// Whether `target` appears anywhere in the chain of `err`, compared by
/// identity rather than message text. Annotating never breaks a match: the
/// wrapped error stays reachable through `source()`. Use [`find_cause`] to
/// match by type instead.
pub fn is_match(err: &(dyn StdError + 'static), target: &DynError) -> bool {
    let want = Arc::as_ptr(target) as *const ();
    chain(err).any(|link| std::ptr::eq(link as *const dyn StdError as *const (), want))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::root_cause;
    use crate::op::Op;

    #[test]
    fn message_displays_text() {
        assert_eq!(new_msg("disk on fire").to_string(), "disk on fire");
    }

    #[test]
    fn join_empty_is_none() {
        assert!(join(Vec::new()).is_none());
    }

    #[test]
    fn join_single_passes_through() {
        let only: DynError = Arc::new(new_msg("alone"));
        let joined = join(vec![only.clone()]).unwrap();
        assert!(Arc::ptr_eq(&only, &joined));
    }

    #[test]
    fn join_many_renders_line_per_member() {
        let joined = join(vec![
            Arc::new(new_msg("first")) as DynError,
            Arc::new(new_msg("second")) as DynError,
        ])
        .unwrap();
        assert_eq!(joined.to_string(), "first\nsecond");
    }

    #[test]
    fn joined_is_a_root_cause() {
        let joined = join(vec![
            Arc::new(new_msg("a")) as DynError,
            Arc::new(new_msg("b")) as DynError,
        ])
        .unwrap();
        let err = crate::with_arc(
            joined.clone(),
            vec![Box::new(Op::new("collect")) as Box<dyn crate::KeyValuer>],
        );
        let root = root_cause(err.as_ref());
        assert_eq!(root.to_string(), "a\nb");
        assert_eq!(
            find_cause::<Joined>(err.as_ref()).map(|j| j.errors().len()),
            Some(2)
        );
    }

    #[test]
    fn find_cause_reaches_a_typed_link() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = with!(io, Op::new("open"));
        let found = find_cause::<std::io::Error>(err.as_ref()).unwrap();
        assert_eq!(found.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn find_cause_absent_type_is_none() {
        let err = with!(new_msg("plain"), Op::new("op"));
        assert!(find_cause::<std::io::Error>(err.as_ref()).is_none());
    }

    #[test]
    fn is_match_survives_annotation() {
        let base: DynError = Arc::new(new_msg("gone"));
        let err = crate::with_arc(
            base.clone(),
            vec![Box::new(Op::new("open")) as Box<dyn crate::KeyValuer>],
        );
        assert!(is_match(err.as_ref(), &base));
    }

    #[test]
    fn is_match_is_identity_not_text() {
        let base: DynError = Arc::new(new_msg("gone"));
        let twin: DynError = Arc::new(new_msg("gone"));
        let err = crate::with_arc(
            base.clone(),
            vec![Box::new(Op::new("open")) as Box<dyn crate::KeyValuer>],
        );
        assert!(!is_match(err.as_ref(), &twin));
        assert!(is_match(base.as_ref(), &base));
    }
}
