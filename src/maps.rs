//! Discovery of the binary images loaded into the current process.
//!
//! Symbolization requests carry raw absolute addresses. Before any backend
//! can be consulted, the containing image and the address' offset within
//! it have to be determined. This module parses `/proc/self/maps` into a
//! compact module list and caches it: the list is built lazily on first
//! use, dropped by [`Symbolizer::flush`][crate::symbolize::Symbolizer::flush],
//! and built eagerly by
//! [`Symbolizer::prepare_for_sandboxing`][crate::symbolize::Symbolizer::prepare_for_sandboxing]
//! while `/proc` is still reachable.

use std::fs::File;
use std::io::BufRead as _;
use std::io::BufReader;
use std::io::Error;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Result;
use std::sync::Mutex;

use crate::arena::ARENA;
use crate::log::warn;
use crate::Addr;


/// A binary image loaded into the address space of the process.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Module {
    /// The absolute path identifying the image.
    pub path: &'static str,
    /// The lowest address the image is mapped at.
    pub start: Addr,
    /// One past the highest address of the image's mappings.
    pub end: Addr,
}


#[derive(Debug)]
struct MapsEntry<'line> {
    start: Addr,
    end: Addr,
    path: &'line str,
}


/// Parse a line of a proc maps file.
fn parse_maps_line(line: &str) -> Result<MapsEntry<'_>> {
    let full_line = line;

    fn split_once<'line>(
        line: &'line str,
        component: &str,
        full_line: &str,
    ) -> Result<(&'line str, &'line str)> {
        line.split_once(|c: char| c.is_ascii_whitespace())
            .map(|(token, rest)| (token, rest.trim_start()))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("failed to find {component} in proc maps line: {full_line}"),
                )
            })
    }

    // Lines have the following format:
    // address           perms offset  dev   inode      pathname
    // 08048000-08049000 r-xp 00000000 03:00 8312       /opt/test
    // 0804a000-0806b000 rw-p 00000000 00:00 0          [heap]
    // a7cb1000-a7cb2000 ---p 00000000 00:00 0
    // a7ed5000-a8008000 r-xp 00000000 03:00 4222       /lib/libc.so.6
    let (address_str, line) = split_once(line, "address range", full_line)?;
    let (start_str, end_str) = address_str.split_once('-').ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidData,
            format!("encountered malformed address range in proc maps line: {full_line}"),
        )
    })?;
    let start = Addr::from_str_radix(start_str, 16).map_err(|err| {
        Error::new(
            ErrorKind::InvalidData,
            format!("encountered malformed start address in proc maps line: {full_line}: {err}"),
        )
    })?;
    let end = Addr::from_str_radix(end_str, 16).map_err(|err| {
        Error::new(
            ErrorKind::InvalidData,
            format!("encountered malformed end address in proc maps line: {full_line}: {err}"),
        )
    })?;

    let (_perms, line) = split_once(line, "permissions component", full_line)?;
    let (_offset, line) = split_once(line, "offset component", full_line)?;
    let (_dev, line) = split_once(line, "device component", full_line)?;
    // A path may not be present, in which case splitting off the inode
    // fails and the path is simply empty.
    let path_str = split_once(line, "inode component", full_line)
        .map(|(_inode, line)| line.trim())
        .unwrap_or("");
    let path = path_str.strip_suffix(" (deleted)").unwrap_or(path_str);

    let entry = MapsEntry { start, end, path };
    Ok(entry)
}


/// Parse a proc maps file into a module list, coalescing the consecutive
/// segments of each image and skipping pseudo entries such as `[heap]` or
/// `[vdso]`.
fn parse_modules<R>(reader: R) -> Result<Vec<Module>>
where
    R: Read,
{
    let mut modules = Vec::<Module>::new();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        let () = line.clear();
        if reader.read_line(&mut line)? == 0 {
            break
        }
        let line_str = line.trim();
        if line_str.is_empty() {
            continue
        }
        let entry = parse_maps_line(line_str)?;
        // Only file backed mappings are of relevance.
        if !entry.path.starts_with('/') {
            continue
        }

        match modules.last_mut() {
            Some(last) if last.path == entry.path => last.end = entry.end,
            _ => modules.push(Module {
                path: ARENA.alloc_str(entry.path),
                start: entry.start,
                end: entry.end,
            }),
        }
    }
    Ok(modules)
}


/// Find the module containing `addr`, given a module list sorted by start
/// address (proc maps files are).
fn find_module(modules: &[Module], addr: Addr) -> Option<Module> {
    let idx = modules.partition_point(|module| module.start <= addr);
    let module = *modules.get(idx.checked_sub(1)?)?;
    (addr < module.end).then_some(module)
}


/// A lazily built, flushable cache of the process' loaded modules.
#[derive(Debug)]
pub(crate) struct ModuleMap {
    cached: Mutex<Option<&'static [Module]>>,
}

impl ModuleMap {
    pub(crate) const fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    fn load(cached: &mut Option<&'static [Module]>) -> Option<&'static [Module]> {
        if let Some(modules) = *cached {
            return Some(modules)
        }

        let modules = File::open("/proc/self/maps")
            .and_then(parse_modules)
            .map_err(|err| {
                warn!("failed to load /proc/self/maps: {err}");
                err
            })
            .ok()?;
        let modules = ARENA.alloc_slice(&modules);
        *cached = Some(modules);
        Some(modules)
    }

    /// Find the module containing `addr`, loading the module list on first
    /// use.
    pub(crate) fn find(&self, addr: Addr) -> Option<Module> {
        let mut cached = self.cached.lock().unwrap();
        let modules = Self::load(&mut cached)?;
        find_module(modules, addr)
    }

    /// Load the module list now, e.g., ahead of entering an execution mode
    /// in which `/proc` is no longer reachable.
    pub(crate) fn cache(&self) {
        let mut cached = self.cached.lock().unwrap();
        let _modules = Self::load(&mut cached);
    }

    /// Drop the cached module list. It will be re-read on next use.
    pub(crate) fn flush(&self) {
        *self.cached.lock().unwrap() = None;
    }
}
