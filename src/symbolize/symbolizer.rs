//! The symbolizer facade composing the attached backends.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::arena::ARENA;
use crate::backend::external::ExternalBackend;
use crate::backend::Backend;
use crate::backend::DebugInfoReader;
use crate::backend::InternalBackend;
use crate::demangle::maybe_demangle;
use crate::log::debug;
use crate::maps::ModuleMap;
use crate::util::find_in_path;
use crate::Addr;

use super::AddressInfo;
use super::DataInfo;


/// Helper binary names probed on the executable search path when no
/// explicit helper path is configured.
const HELPER_NAMES: &[&str] = &["llvm-symbolizer"];


/// Options controlling which backends [`init`][super::init] attaches.
#[derive(Debug, Default)]
pub struct InitOpts {
    /// The path of the external symbolization helper binary. When `None`,
    /// the executable search path is probed for a known helper; when that
    /// probe comes up empty no external backend is attached.
    pub external_helper: Option<PathBuf>,
    /// The in-process debug-info reader to attach, if any.
    pub debug_info_reader: Option<Box<dyn DebugInfoReader>>,
}


/// The process-wide address symbolizer.
///
/// A `Symbolizer` composes zero or more backends, queried in a fixed
/// priority order: the in-process debug-info backend first, the external
/// helper process as a fallback. All operations are safe to call from
/// multiple threads concurrently; external lookups block the calling
/// thread for the duration of the helper round trip.
#[derive(Debug)]
pub struct Symbolizer {
    /// Attached backends in priority order. The disabled symbolizer has
    /// none.
    backends: [Option<&'static dyn Backend>; 2],
    modules: ModuleMap,
}

impl Symbolizer {
    pub(crate) fn with_opts(opts: InitOpts) -> Self {
        let InitOpts {
            external_helper,
            debug_info_reader,
        } = opts;

        let internal = debug_info_reader
            .map(|reader| &*ARENA.alloc(InternalBackend::new(reader)) as &'static dyn Backend);
        let helper = external_helper
            .or_else(|| HELPER_NAMES.iter().find_map(|name| find_in_path(name)));
        let external = helper.map(|path| {
            debug!("attaching external symbolization helper {}", path.display());
            &*ARENA.alloc(ExternalBackend::new(path)) as &'static dyn Backend
        });

        Self {
            backends: [internal, external],
            modules: ModuleMap::new(),
        }
    }

    /// Create a symbolizer with zero backends attached, for environments
    /// in which subprocess creation or file access is forbidden.
    pub(crate) fn disabled() -> Self {
        Self {
            backends: [None, None],
            modules: ModuleMap::new(),
        }
    }

    fn backends(&self) -> impl Iterator<Item = &'static dyn Backend> + '_ {
        self.backends.iter().flatten().copied()
    }

    /// Resolve the code address `addr` into up to `frames.len()`
    /// consecutive frames, innermost frame first, and report how many
    /// were filled.
    ///
    /// Zero is the normal "unknown" result, not an error: it is returned
    /// when the address lies outside every loaded module, when no backend
    /// can resolve it, and when the symbolizer is disabled. The caller
    /// should eventually [`clear`][AddressInfo::clear] each filled entry.
    pub fn symbolize_code(&self, addr: Addr, frames: &mut [AddressInfo]) -> usize {
        if frames.is_empty() || !self.is_available() {
            return 0
        }
        let Some(module) = self.modules.find(addr) else {
            debug!("no loaded module contains address {addr:#x}");
            return 0
        };
        let offset = addr - module.start;

        for backend in self.backends() {
            let count = backend.symbolize_code(addr, module.path, offset, frames);
            if count > 0 {
                for frame in &mut frames[..count] {
                    let () = frame.fill_address_and_module(addr, module.path, offset);
                }
                return count
            }
        }
        0
    }

    /// Resolve the data address `addr` to its owning symbol. The first
    /// backend reporting a hit wins; `false` is the normal "unknown"
    /// result.
    pub fn symbolize_data(&self, addr: Addr, info: &mut DataInfo) -> bool {
        let () = info.clear();
        if !self.is_available() {
            return false
        }
        let Some(module) = self.modules.find(addr) else {
            return false
        };
        let offset = addr - module.start;

        for backend in self.backends() {
            if backend.symbolize_data(addr, module.path, offset, info) {
                // Backends report symbol extents relative to the image
                // base.
                let start = info.start.wrapping_add(module.start);
                if start <= addr && addr < start.wrapping_add(info.size) {
                    info.start = start;
                    let () = info.fill_address_and_module(addr, module.path, offset);
                    return true
                }
                debug!("discarding out-of-extent data symbol for {addr:#x}");
                let () = info.clear();
            }
        }
        false
    }

    /// Check whether at least one attached backend can currently service
    /// requests.
    pub fn is_available(&self) -> bool {
        self.backends().any(|backend| backend.is_available())
    }

    /// Check whether an external helper backend is attached and healthy.
    pub fn is_external_available(&self) -> bool {
        self.backends()
            .any(|backend| backend.is_external() && backend.is_available())
    }

    /// Release cached state to bound memory growth: the module list and
    /// whatever each backend caches. Previously returned records stay
    /// valid.
    pub fn flush(&self) {
        let () = self.modules.flush();
        for backend in self.backends() {
            let () = backend.flush();
        }
    }

    /// Demangle `name` on a best-effort basis.
    ///
    /// This operation never fails: mangled names no demangler recognizes,
    /// already demangled names, and arbitrary garbage are all returned
    /// unchanged.
    pub fn demangle<'sym>(&self, name: &'sym str) -> Cow<'sym, str> {
        for backend in self.backends() {
            if let Some(demangled) = backend.demangle(name) {
                return demangled
            }
        }
        maybe_demangle(name).unwrap_or(Cow::Borrowed(name))
    }

    /// Prepare for entering a restricted execution mode that forbids
    /// subprocess creation and file access: the module list is cached
    /// while `/proc` is still reachable and every backend releases the
    /// resources it could not re-acquire, terminating the external helper
    /// in particular. Afterwards [`is_external_available`]
    /// [`Self::is_external_available`] reports `false` and no subprocess
    /// communication is attempted anymore.
    pub fn prepare_for_sandboxing(&self) {
        let () = self.modules.cache();
        for backend in self.backends() {
            let () = backend.prepare_for_sandboxing();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use test_log::test;


    /// A test backend answering every code query with a fixed function
    /// name, counting the queries it sees.
    #[derive(Debug)]
    struct FixedBackend {
        function: &'static str,
        external: bool,
        queries: AtomicUsize,
    }

    impl FixedBackend {
        fn new(function: &'static str, external: bool) -> Self {
            Self {
                function,
                external,
                queries: AtomicUsize::new(0),
            }
        }
    }

    impl Backend for FixedBackend {
        fn symbolize_code(
            &self,
            _addr: Addr,
            _module: &str,
            _offset: u64,
            frames: &mut [AddressInfo],
        ) -> usize {
            let _count = self.queries.fetch_add(1, Ordering::Relaxed);
            let () = frames[0].set_function(self.function);
            1
        }

        fn symbolize_data(
            &self,
            _addr: Addr,
            _module: &str,
            _offset: u64,
            _info: &mut DataInfo,
        ) -> bool {
            false
        }

        fn demangle<'sym>(&self, _name: &'sym str) -> Option<Cow<'sym, str>> {
            None
        }

        fn flush(&self) {}

        fn is_available(&self) -> bool {
            true
        }

        fn is_external(&self) -> bool {
            self.external
        }

        fn prepare_for_sandboxing(&self) {}
    }


    /// A test backend that never resolves anything.
    #[derive(Debug)]
    struct EmptyBackend;

    impl Backend for EmptyBackend {
        fn symbolize_code(
            &self,
            _addr: Addr,
            _module: &str,
            _offset: u64,
            _frames: &mut [AddressInfo],
        ) -> usize {
            0
        }

        fn symbolize_data(
            &self,
            _addr: Addr,
            _module: &str,
            _offset: u64,
            _info: &mut DataInfo,
        ) -> bool {
            false
        }

        fn demangle<'sym>(&self, _name: &'sym str) -> Option<Cow<'sym, str>> {
            None
        }

        fn flush(&self) {}

        fn is_available(&self) -> bool {
            true
        }

        fn is_external(&self) -> bool {
            false
        }

        fn prepare_for_sandboxing(&self) {}
    }


    /// A test backend answering every data query with a fixed symbol
    /// whose image-base-relative extent starts `bias` bytes past the
    /// queried offset.
    #[derive(Debug)]
    struct DataBackend {
        name: &'static str,
        bias: u64,
        size: u64,
    }

    impl Backend for DataBackend {
        fn symbolize_code(
            &self,
            _addr: Addr,
            _module: &str,
            _offset: u64,
            _frames: &mut [AddressInfo],
        ) -> usize {
            0
        }

        fn symbolize_data(&self, _addr: Addr, _module: &str, offset: u64, info: &mut DataInfo) -> bool {
            let () = info.set_name(self.name);
            info.start = offset.wrapping_add(self.bias);
            info.size = self.size;
            true
        }

        fn demangle<'sym>(&self, _name: &'sym str) -> Option<Cow<'sym, str>> {
            None
        }

        fn flush(&self) {}

        fn is_available(&self) -> bool {
            true
        }

        fn is_external(&self) -> bool {
            false
        }

        fn prepare_for_sandboxing(&self) {}
    }


    fn with_backends(backends: [Option<&'static dyn Backend>; 2]) -> Symbolizer {
        Symbolizer {
            backends,
            modules: ModuleMap::new(),
        }
    }

    /// An address guaranteed to live inside a loaded module of the test
    /// process.
    fn module_addr() -> Addr {
        with_backends as Addr
    }

    /// Check that a disabled symbolizer is inert for any input.
    #[test]
    fn disabled_is_inert() {
        let symbolizer = Symbolizer::disabled();
        assert!(!symbolizer.is_available());
        assert!(!symbolizer.is_external_available());

        let mut frames = [AddressInfo::default()];
        assert_eq!(symbolizer.symbolize_code(module_addr(), &mut frames), 0);
        assert_eq!(symbolizer.symbolize_code(0xdeadbeef, &mut frames), 0);

        let mut info = DataInfo::default();
        assert!(!symbolizer.symbolize_data(module_addr(), &mut info));

        assert_eq!(symbolizer.demangle("not_mangled_at_all"), "not_mangled_at_all");
        let () = symbolizer.flush();
        let () = symbolizer.prepare_for_sandboxing();
    }

    /// Check that the second backend is consulted exactly when the first
    /// one has no answer.
    #[test]
    fn backend_fallback_ordering() {
        let first: &'static FixedBackend = Box::leak(Box::new(FixedBackend::new("from_first", false)));
        let second: &'static FixedBackend =
            Box::leak(Box::new(FixedBackend::new("from_second", true)));
        let symbolizer = with_backends([Some(first), Some(second)]);

        let mut frames = [AddressInfo::default()];
        let count = symbolizer.symbolize_code(module_addr(), &mut frames);
        assert_eq!(count, 1);
        assert_eq!(frames[0].function, Some("from_first"));
        assert_eq!(second.queries.load(Ordering::Relaxed), 0);

        let empty: &'static EmptyBackend = Box::leak(Box::new(EmptyBackend));
        let fallback: &'static FixedBackend =
            Box::leak(Box::new(FixedBackend::new("from_fallback", true)));
        let symbolizer = with_backends([Some(empty), Some(fallback)]);

        let mut frames = [AddressInfo::default()];
        let count = symbolizer.symbolize_code(module_addr(), &mut frames);
        assert_eq!(count, 1);
        assert_eq!(frames[0].function, Some("from_fallback"));
        assert!(symbolizer.is_external_available());
    }

    /// Check that module identity is stamped onto every returned frame.
    #[test]
    fn module_stamping() {
        let backend: &'static FixedBackend =
            Box::leak(Box::new(FixedBackend::new("somewhere", false)));
        let symbolizer = with_backends([Some(backend), None]);

        let addr = module_addr();
        let mut frames = [AddressInfo::default()];
        let count = symbolizer.symbolize_code(addr, &mut frames);
        assert_eq!(count, 1);
        assert_eq!(frames[0].address, addr);
        let module = frames[0].module.unwrap();
        assert!(module.starts_with('/'), "{module}");
        assert!(frames[0].module_offset < addr);
    }

    /// Check that addresses outside every loaded module resolve to
    /// nothing, even with an eager backend attached.
    #[test]
    fn unmapped_address() {
        let backend: &'static FixedBackend = Box::leak(Box::new(FixedBackend::new("eager", false)));
        let symbolizer = with_backends([Some(backend), None]);

        let mut frames = [AddressInfo::default()];
        // The zero page is never mapped.
        assert_eq!(symbolizer.symbolize_code(0x10, &mut frames), 0);
        assert_eq!(backend.queries.load(Ordering::Relaxed), 0);
    }

    /// Check that a data result whose extent does not contain the
    /// queried address is discarded as "not found", with a conforming
    /// lower-priority backend winning instead when one is attached.
    #[test]
    fn out_of_extent_data_discarded() {
        let past: &'static DataBackend = Box::leak(Box::new(DataBackend {
            name: "past_the_end",
            bias: 1,
            size: 16,
        }));
        let symbolizer = with_backends([Some(past), None]);

        let addr = module_addr();
        let mut info = DataInfo::default();
        assert!(!symbolizer.symbolize_data(addr, &mut info));
        assert_eq!(info.name, None);
        assert_eq!(info.start, 0);
        assert_eq!(info.size, 0);

        let containing: &'static DataBackend = Box::leak(Box::new(DataBackend {
            name: "containing",
            bias: 0,
            size: 16,
        }));
        let symbolizer = with_backends([Some(past), Some(containing)]);
        assert!(symbolizer.symbolize_data(addr, &mut info));
        assert_eq!(info.name, Some("containing"));
        assert_eq!(info.start, addr);
        assert!(info.module.is_some());
    }

    /// Check the demangling pass-through guarantee on garbage input.
    #[test]
    fn demangle_total_function() {
        let symbolizer = Symbolizer::disabled();
        for input in ["", "??", "already_readable", "_Znot-really-mangled"] {
            assert_eq!(symbolizer.demangle(input), input);
        }
    }

    /// Check that an empty output buffer yields zero frames.
    #[test]
    fn empty_frame_buffer() {
        let backend: &'static FixedBackend =
            Box::leak(Box::new(FixedBackend::new("unused", false)));
        let symbolizer = with_backends([Some(backend), None]);
        assert_eq!(symbolizer.symbolize_code(module_addr(), &mut []), 0);
    }
}
