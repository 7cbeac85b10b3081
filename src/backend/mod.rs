//! Symbolization backends.
//!
//! A backend is one strategy for answering symbolization queries: either
//! an in-process debug-info reader bridged through the
//! [`DebugInfoReader`] contract, or a long-lived external helper process.
//! Backends share no mutable state with each other; each serializes access
//! to its own resources internally.

pub(crate) mod external;
mod internal;

use std::borrow::Cow;
use std::fmt::Debug;

use crate::symbolize::AddressInfo;
use crate::symbolize::DataInfo;
use crate::Addr;

pub use internal::DebugInfoReader;
pub(crate) use internal::InternalBackend;


/// The capability set of a single symbolization source.
///
/// All addresses handed to a backend have already been attributed to a
/// containing module by the facade; backends work with the module path and
/// the address' offset within the image. Any address or extent a backend
/// reports back is relative to the image base; the facade rebases and
/// stamps module identity onto the resulting records.
pub(crate) trait Backend
where
    Self: Debug + Sync,
{
    /// Resolve a code address to up to `frames.len()` frames, innermost
    /// frame first, filling function and source location fields. Returns
    /// the number of frames filled; zero means the backend has no answer.
    fn symbolize_code(
        &self,
        addr: Addr,
        module: &str,
        offset: u64,
        frames: &mut [AddressInfo],
    ) -> usize;

    /// Resolve a data address to its owning symbol, filling name and
    /// extent fields. The reported `start` is relative to the image base.
    fn symbolize_data(&self, addr: Addr, module: &str, offset: u64, info: &mut DataInfo) -> bool;

    /// Demangle `name`, if this backend knows how to.
    fn demangle<'sym>(&self, name: &'sym str) -> Option<Cow<'sym, str>>;

    /// Release cached state, if any.
    fn flush(&self);

    /// Whether the backend can currently service requests.
    fn is_available(&self) -> bool;

    /// Whether this backend delegates to an external helper process.
    fn is_external(&self) -> bool;

    /// Release resources that an upcoming sandboxed execution phase would
    /// forbid re-acquiring.
    fn prepare_for_sandboxing(&self);
}
