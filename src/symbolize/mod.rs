//! Symbolization of addresses captured by runtime instrumentation.
//!
//! This module contains the process-wide [`Symbolizer`] facade together
//! with its lifecycle functions ([`init`], [`disable`], [`get`],
//! [`get_or_null`], [`get_or_init`]) and the records symbolization
//! results are returned in ([`AddressInfo`], [`DataInfo`]).

mod global;
mod symbolizer;

pub use global::disable;
pub use global::get;
pub use global::get_or_init;
pub use global::get_or_null;
pub use global::init;
pub use symbolizer::InitOpts;
pub use symbolizer::Symbolizer;

use crate::arena::ARENA;
use crate::Addr;


/// One resolved frame for a code address.
///
/// A single code address may legitimately produce several of these
/// records when the compiler inlined calls at that location; frames are
/// ordered innermost first. String fields are either `None` (unknown) or
/// reference storage in the symbolizer's process-lifetime arena; the
/// record is the only live referent of that storage and [`clear`]
/// [`Self::clear`] releases it by resetting the record to its zero state.
#[derive(Debug, Default)]
pub struct AddressInfo {
    /// The address that was queried.
    pub address: Addr,
    /// The identifying name (path) of the binary image containing the
    /// address.
    pub module: Option<&'static str>,
    /// The address' offset within the containing image.
    pub module_offset: u64,
    /// The resolved function name.
    pub function: Option<&'static str>,
    /// The source file defining the instruction at the address.
    pub file: Option<&'static str>,
    /// The 1-based source line, `0` if unknown.
    pub line: u32,
    /// The 1-based source column, `0` if unknown.
    pub column: u32,
}

impl AddressInfo {
    /// Reset the record to its zero state, after which it is safe to
    /// reuse. Idempotent; the arena backing the string fields reclaims
    /// nothing before process exit, so this is purely a reset.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Copy `function` into allocator-safe storage and attach it.
    pub fn set_function(&mut self, function: &str) {
        self.function = Some(ARENA.alloc_str(function));
    }

    /// Copy `file` into allocator-safe storage and attach it.
    pub fn set_file(&mut self, file: &str) {
        self.file = Some(ARENA.alloc_str(file));
    }

    pub(crate) fn fill_address_and_module(
        &mut self,
        addr: Addr,
        module: &'static str,
        module_offset: u64,
    ) {
        self.address = addr;
        self.module = Some(module);
        self.module_offset = module_offset;
    }
}


/// One resolved data symbol.
#[derive(Debug, Default)]
pub struct DataInfo {
    /// The address that was queried.
    pub address: Addr,
    /// The identifying name (path) of the binary image containing the
    /// address.
    pub module: Option<&'static str>,
    /// The address' offset within the containing image.
    pub module_offset: u64,
    /// The name of the symbol owning the address.
    pub name: Option<&'static str>,
    /// The symbol's base address. On a successful lookup
    /// `start <= address < start + size` holds.
    pub start: Addr,
    /// The symbol's extent in bytes.
    pub size: u64,
}

impl DataInfo {
    /// Reset the record to its zero state. Idempotent.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Copy `name` into allocator-safe storage and attach it.
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(ARENA.alloc_str(name));
    }

    pub(crate) fn fill_address_and_module(
        &mut self,
        addr: Addr,
        module: &'static str,
        module_offset: u64,
    ) {
        self.address = addr;
        self.module = Some(module);
        self.module_offset = module_offset;
    }
}
