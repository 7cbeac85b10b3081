//! The process-wide symbolizer lifecycle.
//!
//! The symbolizer is a singleton: it is constructed exactly once and
//! published through an atomic pointer, after which any number of threads
//! may retrieve it through read-only handles. The only
//! concurrency-hazardous operation is first-time construction, which is
//! resolved as a single-winner compare-exchange race: losers discard
//! their candidate (its arena storage stays behind; no helper process can
//! leak because backends spawn lazily on first use).
//!
//! Whether the symbolizer ends up enabled (backends attached) or disabled
//! (inert) is fixed at publication for the rest of the process;
//! re-initialization is not supported.

use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering;

use crate::arena::ARENA;

use super::InitOpts;
use super::Symbolizer;


/// The process-wide symbolizer instance; null until published.
static SYMBOLIZER: AtomicPtr<Symbolizer> = AtomicPtr::new(ptr::null_mut());


fn publish(candidate: Symbolizer) -> &'static Symbolizer {
    let candidate: &'static Symbolizer = ARENA.alloc(candidate);
    let ptr = candidate as *const Symbolizer as *mut Symbolizer;
    match SYMBOLIZER.compare_exchange(
        ptr::null_mut(),
        ptr,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_null) => candidate,
        // Another thread won the race; its instance is the one.
        Err(winner) => unsafe { &*winner },
    }
}


/// Retrieve the symbolizer instance, or `None` if none has been published
/// yet. Never blocks, never initializes.
pub fn get_or_null() -> Option<&'static Symbolizer> {
    let ptr = SYMBOLIZER.load(Ordering::Acquire);
    // SAFETY: A non-null pointer was published with release semantics
    //         after the instance was fully constructed, and the instance
    //         lives in the arena for the rest of the process.
    unsafe { ptr.as_ref() }
}


/// Retrieve the symbolizer instance.
///
/// # Panics
/// Panics when called before [`init`] or [`disable`]; doing so is a
/// contract violation on the caller's side.
pub fn get() -> &'static Symbolizer {
    match get_or_null() {
        Some(symbolizer) => symbolizer,
        None => panic!("symbolizer requested before init() or disable()"),
    }
}


/// Retrieve the symbolizer instance, performing a default initialization
/// (as if by `init(InitOpts::default())`) exactly once if none exists.
///
/// Safe to call from any number of concurrent first-use threads.
pub fn get_or_init() -> &'static Symbolizer {
    match get_or_null() {
        Some(symbolizer) => symbolizer,
        None => publish(Symbolizer::with_opts(InitOpts::default())),
    }
}


/// Initialize the symbolizer with the given options and return it.
///
/// Idempotent, not a re-configuration call: if an instance already
/// exists, it is returned unchanged and `opts` is ignored. Initialization
/// is meant to happen once during the single-threaded startup phase of
/// the host; racing `init` against another `init` or [`disable`] leaves
/// it unspecified which configuration wins (though never a corrupted
/// one).
pub fn init(opts: InitOpts) -> &'static Symbolizer {
    match get_or_null() {
        Some(symbolizer) => symbolizer,
        None => publish(Symbolizer::with_opts(opts)),
    }
}


/// Initialize the symbolizer in a disabled state: no backends are
/// attached and every lookup reports "unknown". For environments that
/// forbid subprocess creation or file access. Idempotent like [`init`].
pub fn disable() -> &'static Symbolizer {
    match get_or_null() {
        Some(symbolizer) => symbolizer,
        None => publish(Symbolizer::disabled()),
    }
}
