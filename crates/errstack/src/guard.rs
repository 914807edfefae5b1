//! The fault boundary: runs a closure, and converts a panic inside it into
//! an annotated error instead of unwinding through the caller.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use backtrace::Backtrace;

use crate::code::Code;
use crate::error::{DynError, IntoDynError};
use crate::kv::KeyValuer;
use crate::op::{frame_op, Op};
use crate::severity::Severity;
use crate::std_compat::new_msg;
use crate::with::{with_policy, Policy};

thread_local! {
    /// Nesting depth of active guards on this thread. The hook stays quiet
    /// and captures a trace only while this is non-zero.
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    /// Trace captured by the hook at panic time, before unwinding destroys
    /// the panicking frames.
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Run `work` and convert a panic into an `Err`.
///
/// A normal `Ok` or `Err` passes through untouched. A panic becomes an
/// error whose root cause is `panic: <payload>`, carrying
/// [`Severity::Fatal`], [`Code::PANIC`], and an Op naming the panicking
/// function with its `file:line`.
///
/// ```
/// use errstack::{code_of, guard, Code};
///
/// let err = guard(|| -> Result<(), errstack::DynError> { panic!("boom") }).unwrap_err();
/// assert_eq!(code_of(err.as_ref()), Code::PANIC);
/// ```
pub fn guard<T, E, F>(work: F) -> Result<T, DynError>
where
    E: IntoDynError,
    F: FnOnce() -> Result<T, E>,
{
    match run_guarded(work) {
        Ok(result) => result.map_err(IntoDynError::into_dyn_error),
        Err(panicked) => Err(panic_error(panicked)),
    }
}

/// [`guard`] for closures with nothing to return: only a panic produces an
/// `Err`.
pub fn guard_unit<F>(work: F) -> Result<(), DynError>
where
    F: FnOnce(),
{
    match run_guarded(work) {
        Ok(()) => Ok(()),
        Err(panicked) => Err(panic_error(panicked)),
    }
}

struct Panicked {
    payload: Box<dyn Any + Send>,
    trace: Option<Backtrace>,
}

fn run_guarded<R>(work: impl FnOnce() -> R) -> Result<R, Panicked> {
    install_hook();
    GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let outcome = panic::catch_unwind(AssertUnwindSafe(work));
    GUARD_DEPTH.with(|depth| depth.set(depth.get() - 1));
    match outcome {
        Ok(value) => Ok(value),
        Err(payload) => {
            let trace = PANIC_TRACE.with(|slot| slot.borrow_mut().take());
            Err(Panicked { payload, trace })
        }
    }
}

/// Install the panic hook exactly once, chaining to whichever hook was
/// already in place. While a guard is active on the panicking thread the
/// hook captures a trace and suppresses the default stderr report; panics
/// on unguarded threads reach the previous hook unchanged.
fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let guarded = GUARD_DEPTH.with(|depth| depth.get()) > 0;
            if guarded {
                PANIC_TRACE.with(|slot| {
                    *slot.borrow_mut() = Some(Backtrace::new_unresolved());
                });
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_error(panicked: Panicked) -> DynError {
    let message = new_msg(format!("panic: {}", payload_text(panicked.payload.as_ref())));
    let op = match panicked.trace {
        Some(trace) => panic_op(trace),
        None => Op::UNKNOWN,
    };
    let entries: Vec<Box<dyn KeyValuer>> = vec![
        Box::new(Severity::Fatal),
        Box::new(Code::PANIC),
        Box::new(op),
    ];
    let policy = Policy {
        auto_op: false,
        verbose_closures: true,
    };
    with_policy(&policy, Arc::new(message), entries)
}

fn payload_text(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return text;
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text;
    }
    "<non-string panic payload>"
}

/// The panic origin as an Op, with a forced `file:line` suffix: the panic
/// site is exactly what the reader needs to find.
fn panic_op(mut trace: Backtrace) -> Op {
    trace.resolve();
    for frame in trace.frames() {
        for symbol in frame.symbols() {
            let name = match symbol.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if panic_internal(&name) {
                continue;
            }
            return frame_op(&name, symbol.filename(), symbol.lineno(), true, true);
        }
    }
    Op::UNKNOWN
}

/// Frames between the hook's capture and the panic site: the hook itself,
/// the capture machinery, and the std panic plumbing. The trace starts
/// inside `set_hook`'s boxed trampoline, whose demangled symbol is a
/// `Box<dyn Fn(&PanicHookInfo)...>::call` with no module prefix, so frames
/// are also matched on the hook-info type and on boxed `call` shims.
fn panic_internal(name: &str) -> bool {
    if name.contains("errstack::guard") && !name.contains("::tests::") {
        return true;
    }
    name.starts_with("backtrace::")
        || name.starts_with("std::")
        || name.starts_with("core::")
        || name.starts_with("alloc::")
        || name.starts_with("rust_begin_unwind")
        || name.starts_with("__rust")
        || name.contains("PanicHookInfo")
        || name.contains("PanicInfo")
        || (name.contains("Box<") && name.contains("::call"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::code_of;
    use crate::error::root_cause;
    use crate::op::op_stack;
    use crate::severity::severity_of;

    #[test]
    fn ok_passes_through() {
        let result = guard(|| -> Result<u32, DynError> { Ok(7) });
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn err_passes_through_unannotated() {
        let err = guard(|| -> Result<(), std::io::Error> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "plain failure"))
        })
        .unwrap_err();
        assert_eq!(severity_of(err.as_ref()), Severity::Unset);
        assert_eq!(code_of(err.as_ref()), Code::UNSET);
        assert_eq!(err.to_string(), "plain failure");
    }

    #[test]
    fn err_dyn_passes_through_with_annotations() {
        let err = guard(|| -> Result<(), DynError> {
            Err(with!(new_msg("base"), Op::new("step")))
        })
        .unwrap_err();
        assert_eq!(op_stack(err.as_ref()), "step");
        assert_eq!(code_of(err.as_ref()), Code::UNSET);
    }

    #[test]
    fn panic_becomes_annotated_error() {
        let err = guard(|| -> Result<(), DynError> { panic!("boom") }).unwrap_err();
        assert_eq!(severity_of(err.as_ref()), Severity::Fatal);
        assert_eq!(code_of(err.as_ref()), Code::PANIC);
        assert_eq!(root_cause(err.as_ref()).to_string(), "panic: boom");
    }

    #[test]
    fn panic_op_names_the_origin() {
        let err = guard(|| -> Result<(), DynError> { panic!("where am i") }).unwrap_err();
        let trail = op_stack(err.as_ref());
        assert!(
            trail.contains("{{closure}}"),
            "expected closure marker in {trail:?}"
        );
        assert!(
            trail.contains("guard.rs:"),
            "expected panic location in {trail:?}"
        );
    }

    #[test]
    fn hook_trampoline_frames_are_internal() {
        assert!(panic_internal(
            "Box<dyn for<'a, 'b> core::ops::function::Fn<(&'a std::panic::PanicHookInfo<'b>,), \
             Output = ()> + Sync + Send>::call"
        ));
        assert!(panic_internal(
            "<alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call::h0123456789abcdef"
        ));
        assert!(panic_internal("std::panicking::rust_panic_with_hook"));
        assert!(!panic_internal("errstack::guard::tests::panicking_worker"));
        assert!(!panic_internal("myapp::dispatch::call_remote"));
    }

    #[test]
    fn panic_payload_string_formats() {
        let err = guard_unit(|| panic!("failed at {}", 3)).unwrap_err();
        assert_eq!(root_cause(err.as_ref()).to_string(), "panic: failed at 3");
    }

    #[test]
    fn guard_unit_ok() {
        assert!(guard_unit(|| ()).is_ok());
    }

    #[test]
    fn nested_guards_catch_at_the_inner_boundary() {
        let outer = guard(|| -> Result<(), DynError> {
            let inner = guard(|| -> Result<(), DynError> { panic!("inner boom") });
            assert_eq!(
                root_cause(inner.unwrap_err().as_ref()).to_string(),
                "panic: inner boom"
            );
            Ok(())
        });
        assert!(outer.is_ok());
    }
}
