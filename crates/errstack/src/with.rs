//! The attachment API: threads new annotation nodes onto an existing error,
//! with optional call-site attribution of operation labels.

use std::error::Error as StdError;
use std::sync::Arc;

use backtrace::Backtrace;

use crate::error::{Annotated, DynError};
use crate::kv::KeyValuer;
use crate::op::{frame_op, op_key, Op};
use crate::value::value_as;

/// Attachment policy, threaded explicitly into the entry points instead of
/// living in process-wide mutable state, so differing policies can coexist
/// in one process and tests stay deterministic.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Synthesize an Op from the caller's frame when an attachment call
    /// carries no explicit Op.
    pub auto_op: bool,
    /// Append ` (file:line)` to synthesized labels of anonymous functions,
    /// disambiguating repeated closures.
    pub verbose_closures: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            auto_op: true,
            verbose_closures: true,
        }
    }
}

/// Attach annotations to `err` under the default [`Policy`].
///
/// Never mutates `err`: each annotation allocates one new immutable node
/// whose parent is the chain so far. Prefer the [`with!`](crate::with!)
/// macro at call sites.
pub fn with<E, I>(err: E, annotations: I) -> DynError
where
    E: StdError + Send + Sync + 'static,
    I: IntoIterator<Item = Box<dyn KeyValuer>>,
{
    with_policy(&Policy::default(), Arc::new(err), annotations)
}

/// Attach annotations to an already-shared error under the default
/// [`Policy`]. This is the branching entry point: cloning the `Arc` first
/// lets divergent paths annotate independently over one shared prefix.
pub fn with_arc<I>(err: DynError, annotations: I) -> DynError
where
    I: IntoIterator<Item = Box<dyn KeyValuer>>,
{
    with_policy(&Policy::default(), err, annotations)
}

/// Attach annotations to an optional error. Annotating "no error" is a
/// no-op: `None` in, `None` out, no error manufactured.
pub fn with_opt<I>(err: Option<DynError>, annotations: I) -> Option<DynError>
where
    I: IntoIterator<Item = Box<dyn KeyValuer>>,
{
    err.map(|err| with_arc(err, annotations))
}

/// Attach annotations under an explicit [`Policy`].
///
/// [`Op::NO_OP`] entries are filtered out of the chain; their only effect is
/// suppressing auto-attribution for this call, exactly like an explicit Op.
pub fn with_policy<I>(policy: &Policy, err: DynError, annotations: I) -> DynError
where
    I: IntoIterator<Item = Box<dyn KeyValuer>>,
{
    let mut head = err;
    let mut saw_op = false;

    for entry in annotations {
        if let Some(op) = entry_op(entry.as_ref()) {
            saw_op = true;
            if op == Op::NO_OP {
                continue;
            }
        }
        head = Arc::new(Annotated::new(head, Arc::from(entry)));
    }

    if policy.auto_op && !saw_op {
        head = with_caller_op(policy, head);
    }
    head
}

/// The Op carried by an entry, if the entry is an operation annotation.
fn entry_op(entry: &dyn KeyValuer) -> Option<Op> {
    if entry.key() != op_key() {
        return None;
    }
    entry.value().downcast_ref::<Op>().cloned()
}

// ── Call-site attribution ─────────────────────────────────────────

fn with_caller_op(policy: &Policy, err: DynError) -> DynError {
    let op = caller_op(policy);
    // Re-wrapping at the same call site must not stack duplicates.
    if value_as::<Op>(err.as_ref(), &op_key()).as_ref() == Some(&op) {
        return err;
    }
    Arc::new(Annotated::new(err, Arc::new(op)))
}

/// Derive an Op from the frame that invoked the attachment API, skipping
/// this module's own entry points. Best effort: an unresolvable stack
/// degrades to [`Op::UNKNOWN`], never to a failure.
#[inline(never)]
fn caller_op(policy: &Policy) -> Op {
    let trace = Backtrace::new();
    for frame in trace.frames() {
        for symbol in frame.symbols() {
            let name = match symbol.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if attach_internal(&name) {
                continue;
            }
            return frame_op(
                &name,
                symbol.filename(),
                symbol.lineno(),
                false,
                policy.verbose_closures,
            );
        }
    }
    Op::UNKNOWN
}

/// Frames between the backtrace capture and the true caller: the capture
/// machinery, this module's entry points, and the std plumbing in between.
fn attach_internal(name: &str) -> bool {
    if name.contains("errstack::with") && !name.contains("::tests::") {
        return true;
    }
    name.starts_with("backtrace::")
        || name.starts_with("std::")
        || name.starts_with("core::")
        || name.starts_with("alloc::")
}

// ── Result adaptor ────────────────────────────────────────────────

/// Annotate the `Err` arm of a `Result` during propagation; `Ok` passes
/// through untouched.
///
/// ```
/// use errstack::{kv, op, KeyValuer, ResultExt};
///
/// fn read_config() -> Result<String, errstack::DynError> {
///     std::fs::read_to_string("/no/such/config.toml").annotate([
///         Box::new(op("read_config")) as Box<dyn KeyValuer>,
///         Box::new(kv("path", "/no/such/config.toml")),
///     ])
/// }
///
/// assert!(read_config().is_err());
/// ```
pub trait ResultExt<T> {
    /// Attach annotations under the default [`Policy`].
    fn annotate<I>(self, annotations: I) -> Result<T, DynError>
    where
        I: IntoIterator<Item = Box<dyn KeyValuer>>;

    /// Attach annotations under an explicit [`Policy`].
    fn annotate_with<I>(self, policy: &Policy, annotations: I) -> Result<T, DynError>
    where
        I: IntoIterator<Item = Box<dyn KeyValuer>>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn annotate<I>(self, annotations: I) -> Result<T, DynError>
    where
        I: IntoIterator<Item = Box<dyn KeyValuer>>,
    {
        self.map_err(|err| with(err, annotations))
    }

    fn annotate_with<I>(self, policy: &Policy, annotations: I) -> Result<T, DynError>
    where
        I: IntoIterator<Item = Box<dyn KeyValuer>>,
    {
        self.map_err(|err| with_policy(policy, Arc::new(err), annotations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::kv;
    use crate::op::op_stack;
    use crate::std_compat::new_msg;
    use crate::value::value_as;

    fn none() -> Vec<Box<dyn KeyValuer>> {
        Vec::new()
    }

    fn quiet() -> Policy {
        Policy {
            auto_op: false,
            verbose_closures: false,
        }
    }

    #[test]
    fn attaches_nothing_when_quiet() {
        let err = with_policy(&quiet(), Arc::new(new_msg("base")), none());
        assert_eq!(op_stack(err.as_ref()), "");
        assert_eq!(err.to_string(), "base");
    }

    #[test]
    fn explicit_op_suppresses_attribution() {
        let err = with!(new_msg("base"), Op::new("custom_op"));
        assert_eq!(op_stack(err.as_ref()), "custom_op");
    }

    #[test]
    fn no_op_suppresses_attribution_without_being_stored() {
        let err = with!(new_msg("base"), Op::NO_OP, kv("k", "v"));
        assert_eq!(op_stack(err.as_ref()), "");
        assert!(value_as::<&str>(err.as_ref(), &crate::Key::new("k".to_string())).is_some());
    }

    #[inline(never)]
    fn fetch_widget() -> DynError {
        with(new_msg("widget exploded"), none())
    }

    #[test]
    fn auto_op_names_the_calling_function() {
        let err = fetch_widget();
        assert_eq!(op_stack(err.as_ref()), "fetch_widget");
    }

    #[inline(never)]
    fn annotate_twice() -> DynError {
        let err = with(new_msg("base"), none());
        with_arc(err, none())
    }

    #[test]
    fn auto_op_is_idempotent_per_call_site() {
        let err = annotate_twice();
        assert_eq!(op_stack(err.as_ref()), "annotate_twice");
    }

    #[inline(never)]
    fn outer_then_inner() -> DynError {
        let err = inner_step();
        with_arc(err, none())
    }

    #[inline(never)]
    fn inner_step() -> DynError {
        with(new_msg("base"), none())
    }

    #[test]
    fn auto_op_builds_a_trail_across_frames() {
        let err = outer_then_inner();
        assert_eq!(op_stack(err.as_ref()), "outer_then_inner: inner_step");
    }

    #[test]
    fn auto_op_labels_closures_with_location() {
        let err = (|| with(new_msg("base"), none()))();
        let trail = op_stack(err.as_ref());
        assert!(
            trail.contains("{{closure}}"),
            "expected closure marker in {trail:?}"
        );
        assert!(
            trail.contains("with.rs:"),
            "expected file:line suffix in {trail:?}"
        );
    }

    #[test]
    fn verbose_closures_off_drops_location() {
        let policy = Policy {
            auto_op: true,
            verbose_closures: false,
        };
        let err = (|| with_policy(&policy, Arc::new(new_msg("base")), none()))();
        let trail = op_stack(err.as_ref());
        assert!(trail.contains("{{closure}}"), "got {trail:?}");
        assert!(!trail.contains("with.rs:"), "got {trail:?}");
    }

    #[test]
    fn with_opt_absent_is_noop() {
        assert!(with_opt(None, vec![Box::new(kv("k", "v")) as Box<dyn KeyValuer>]).is_none());
    }

    #[test]
    fn with_opt_present_annotates() {
        let err = with_opt(
            Some(Arc::new(new_msg("base")) as DynError),
            vec![Box::new(Op::new("op")) as Box<dyn KeyValuer>],
        )
        .expect("present error stays present");
        assert_eq!(op_stack(err.as_ref()), "op");
    }

    #[test]
    fn result_ext_ok_passes_through() {
        let ok: Result<u32, std::io::Error> = Ok(7);
        assert_eq!(ok.annotate(none()).map_err(|_| ()).unwrap(), 7);
    }

    #[test]
    fn result_ext_err_is_annotated() {
        let res: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res
            .annotate_with(&quiet(), vec![Box::new(Op::new("load")) as Box<dyn KeyValuer>])
            .unwrap_err();
        assert_eq!(op_stack(err.as_ref()), "load");
        assert!(crate::find_cause::<std::io::Error>(err.as_ref()).is_some());
    }

    #[test]
    fn branches_share_prefix_independently() {
        let base: DynError = Arc::new(new_msg("shared root"));
        let left = with_arc(base.clone(), vec![Box::new(Op::new("left")) as Box<dyn KeyValuer>]);
        let right = with_arc(base.clone(), vec![Box::new(Op::new("right")) as Box<dyn KeyValuer>]);

        assert_eq!(op_stack(left.as_ref()), "left");
        assert_eq!(op_stack(right.as_ref()), "right");
        assert_eq!(crate::root_cause(left.as_ref()).to_string(), "shared root");
        assert_eq!(crate::root_cause(right.as_ref()).to_string(), "shared root");
    }

    #[test]
    fn concurrent_readers_share_one_chain() {
        let err = with!(new_msg("base"), Op::new("op"), kv("k", "v"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let err = err.clone();
                std::thread::spawn(move || crate::format(err.as_ref()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "op: base {k=v}");
        }
    }
}
