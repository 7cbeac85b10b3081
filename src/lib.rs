//! **addrsym** is a library for in-process address symbolization, built to
//! be called from the runtime of dynamic instrumentation tools such as
//! memory-error or race detectors. Given a raw instruction or data address
//! captured by such a tool, it resolves the address to human-meaningful
//! location information: the containing module, the function, the source
//! file/line/column, or, for data addresses, the owning symbol's name, base
//! address, and size.
//!
//! The library is organized around a process-wide [`Symbolizer`]
//! [`symbolize::Symbolizer`] singleton composing up to two backends:
//!
//! - an in-process backend bridging to a platform debug-info reader through
//!   the narrow [`backend::DebugInfoReader`] contract, and
//! - an external-process backend delegating to a long-lived helper binary
//!   (`llvm-symbolizer` by default) over pipes.
//!
//! Because the code paths of this crate can be reached from inside the
//! interception of the global allocator, every string handed back to the
//! caller is stored in a dedicated `mmap`-backed arena that is never
//! reclaimed, and the symbolizer itself is allocated there as well.
//!
//! A typical instrumentation runtime initializes the symbolizer once during
//! its single-threaded startup phase:
//!
//! ```no_run
//! use addrsym::symbolize;
//! use addrsym::symbolize::AddressInfo;
//! use addrsym::symbolize::InitOpts;
//!
//! let symbolizer = symbolize::init(InitOpts::default());
//!
//! let mut frames = [AddressInfo::default()];
//! let count = symbolizer.symbolize_code(0x7f1273b05123, &mut frames);
//! for frame in &mut frames[..count] {
//!     println!(
//!         "{:#x}: {} {}:{}",
//!         frame.address,
//!         frame.function.unwrap_or("??"),
//!         frame.file.unwrap_or("??"),
//!         frame.line,
//!     );
//!     let () = frame.clear();
//! }
//! ```

pub mod backend;

mod arena;
mod demangle;
mod log;
mod maps;
pub mod symbolize;
mod util;

/// A type representing addresses.
pub type Addr = u64;
