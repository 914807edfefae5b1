//! The annotation node and chain traversal primitives.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::kv::{Key, KeyValuer, Value};

/// A shared, type-erased error. The parent link of every annotation node,
/// which is what lets divergent branches share one immutable prefix.
pub type DynError = Arc<dyn StdError + Send + Sync + 'static>;

/// Conversion into a shared [`DynError`]: a concrete error is wrapped, an
/// already-shared chain passes through untouched. This is what the `Err`
/// arm of a [`guard`](crate::guard()) body must satisfy.
pub trait IntoDynError {
    fn into_dyn_error(self) -> DynError;
}

impl<E> IntoDynError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_dyn_error(self) -> DynError {
        // `Arc<dyn Error + Send + Sync>` itself implements `Error`, so a
        // dedicated pass-through impl for `DynError` would overlap this
        // blanket one (E0119); the already-shared case is detected at
        // runtime instead so it still passes through untouched.
        let mut slot = Some(self);
        if let Some(shared) =
            (&mut slot as &mut dyn std::any::Any).downcast_mut::<Option<DynError>>()
        {
            return shared.take().expect("slot holds the shared chain");
        }
        Arc::new(slot.expect("slot holds the concrete error"))
    }
}

/// One link in an annotation chain: exactly one parent error plus one
/// annotation entry. Immutable after construction; `Clone` is two `Arc`
/// bumps, so the same error may be annotated independently along divergent
/// paths without synchronization.
///
/// `Annotated` participates in the native error protocol: `source()` is the
/// parent, so foreign wrapper types and annotation nodes can interleave
/// freely in one chain.
#[derive(Clone)]
pub struct Annotated {
    parent: DynError,
    entry: Arc<dyn KeyValuer>,
}

impl Annotated {
    pub(crate) fn new(parent: DynError, entry: Arc<dyn KeyValuer>) -> Self {
        Self { parent, entry }
    }

    /// Key identity of this node's annotation.
    pub fn key(&self) -> Key {
        self.entry.key()
    }

    /// Value of this node's annotation.
    pub fn value(&self) -> Value {
        self.entry.value()
    }
}

impl StdError for Annotated {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let parent: &(dyn StdError + 'static) = self.parent.as_ref();
        Some(parent)
    }
}

impl fmt::Display for Annotated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::formatter::format(self))
    }
}

impl fmt::Debug for Annotated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotated")
            .field("key", &self.entry.key())
            .field("value", &self.entry.value())
            .field("parent", &format_args!("{}", self.parent))
            .finish()
    }
}

// ── Chain traversal ───────────────────────────────────────────────

/// Iterator over an error and everything below it, one `source()` hop at a
/// time. Yields the error itself first, then each ancestor down to the root.
pub struct Chain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.source();
        Some(current)
    }
}

/// Walk the unwrap chain starting at (and including) `err`.
///
/// The trait object's `'static` bound counts as a second input lifetime,
/// so the borrow lifetime must be spelled out here and in the other
/// borrow-returning walks below.
pub fn chain<'a>(err: &'a (dyn StdError + 'static)) -> Chain<'a> {
    Chain { next: Some(err) }
}

/// Only the annotation nodes of a chain, most recently attached first.
/// Foreign wrapper links are unwrapped through, not stopped at.
pub(crate) fn annotations<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a Annotated> + 'a {
    chain(err).filter_map(|e| e.downcast_ref::<Annotated>())
}

/// The terminal base error reached by fully unwrapping `err`.
/// Annotations never rewrite it; it is always reachable.
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    chain(err).last().unwrap_or(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::kv;
    use crate::std_compat::new_msg;

    fn node(parent: DynError, pair: crate::kv::KeyValue) -> Annotated {
        Annotated::new(parent, Arc::new(pair))
    }

    #[test]
    fn source_is_parent() {
        let base: DynError = Arc::new(new_msg("root"));
        let err = node(base, kv("k", "v"));
        let src = err.source().expect("annotation node always has a parent");
        assert_eq!(src.to_string(), "root");
    }

    #[test]
    fn chain_walks_to_root() {
        let base: DynError = Arc::new(new_msg("root"));
        let one = node(base, kv("a", 1));
        let two = node(Arc::new(one), kv("b", 2));

        let links: Vec<String> = chain(&two)
            .map(|e| {
                e.downcast_ref::<Annotated>()
                    .map(|a| a.value().stringify())
                    .unwrap_or_else(|| e.to_string())
            })
            .collect();
        assert_eq!(links, ["2", "1", "root"]);
    }

    #[test]
    fn root_cause_fully_unwraps() {
        let base: DynError = Arc::new(new_msg("the cause"));
        let err = node(node(base, kv("a", 1)).into_arc(), kv("b", 2));
        assert_eq!(root_cause(&err).to_string(), "the cause");
    }

    #[test]
    fn shared_prefix_across_branches() {
        let base: DynError = Arc::new(new_msg("root"));
        let left = node(base.clone(), kv("branch", "left"));
        let right = node(base.clone(), kv("branch", "right"));

        let lr = root_cause(&left) as *const dyn StdError as *const ();
        let rr = root_cause(&right) as *const dyn StdError as *const ();
        assert_eq!(lr, rr, "both branches must share the same base error");
    }

    #[test]
    fn into_dyn_error_wraps_concrete_and_keeps_shared() {
        let concrete = new_msg("leaf").into_dyn_error();
        assert_eq!(concrete.to_string(), "leaf");

        let shared: DynError = Arc::new(new_msg("shared"));
        let same = shared.clone().into_dyn_error();
        assert!(Arc::ptr_eq(&shared, &same));
    }

    #[test]
    fn annotated_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Annotated>();
    }

    impl Annotated {
        fn into_arc(self) -> DynError {
            Arc::new(self)
        }
    }
}
