//! The in-process debug-info backend.

use std::borrow::Cow;
use std::fmt::Debug;

use crate::symbolize::AddressInfo;
use crate::symbolize::DataInfo;
use crate::Addr;

use super::Backend;


/// The resolve-address contract between the symbolizer and an in-process
/// debug-info reader.
///
/// Parsing of concrete debug-info formats (DWARF, PDB, ...) lives outside
/// this crate; implementations of this trait bridge to such readers.
///
/// Implementations fill only the `function`, `file`, `line`, and `column`
/// fields of the records they are handed ([`AddressInfo::set_function`]
/// and friends copy strings into allocator-safe storage); module identity
/// is stamped by the facade. Reported data symbol extents are relative to
/// the image base.
///
/// Readers are called concurrently from multiple threads and must
/// serialize access to any internal cache themselves. No method of this
/// trait may allocate through an allocator the surrounding instrumentation
/// intercepts.
pub trait DebugInfoReader
where
    Self: Debug + Send + Sync,
{
    /// Resolve the code address at `offset` within `module`, filling up to
    /// `frames.len()` records innermost frame first. Returns the number of
    /// frames filled, zero if the reader has no answer.
    fn resolve_code(&self, module: &str, offset: u64, frames: &mut [AddressInfo]) -> usize;

    /// Resolve the data address at `offset` within `module`, filling the
    /// record's `name`, `start`, and `size` fields.
    fn resolve_data(&self, module: &str, offset: u64, info: &mut DataInfo) -> bool;

    /// Release any debug-info caches the reader maintains.
    fn flush(&self);
}


/// The backend wrapping a [`DebugInfoReader`].
///
/// Preferred over the external backend: resolution is synchronous,
/// in-process, and without a subprocess failure surface.
#[derive(Debug)]
pub(crate) struct InternalBackend {
    reader: Box<dyn DebugInfoReader>,
}

impl InternalBackend {
    pub(crate) fn new(reader: Box<dyn DebugInfoReader>) -> Self {
        Self { reader }
    }
}

impl Backend for InternalBackend {
    fn symbolize_code(
        &self,
        _addr: Addr,
        module: &str,
        offset: u64,
        frames: &mut [AddressInfo],
    ) -> usize {
        self.reader.resolve_code(module, offset, frames)
    }

    fn symbolize_data(&self, _addr: Addr, module: &str, offset: u64, info: &mut DataInfo) -> bool {
        self.reader.resolve_data(module, offset, info)
    }

    fn demangle<'sym>(&self, _name: &'sym str) -> Option<Cow<'sym, str>> {
        None
    }

    fn flush(&self) {
        self.reader.flush()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_external(&self) -> bool {
        false
    }

    fn prepare_for_sandboxing(&self) {
        // Readers drop file handles together with their caches.
        self.reader.flush()
    }
}
