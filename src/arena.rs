//! A process-lifetime bump allocator backed by anonymous memory mappings.
//!
//! Symbolization can be requested from inside the interception of the
//! global allocator, so nothing on that path may allocate through it.
//! Every string returned to a caller, as well as the symbolizer singleton
//! and its backends, lives in this arena instead. Chunks are obtained
//! directly with `mmap` and are never unmapped; individual objects are
//! never freed. Total volume is bounded by the number of distinct symbols
//! ever resolved, which makes the leak-for-simplicity tradeoff acceptable.

use std::mem::align_of;
use std::mem::size_of;
use std::ptr;
use std::slice;
use std::str;
use std::sync::Mutex;


/// Granularity of chunk mappings.
const CHUNK_SIZE: usize = 256 * 1024;


/// Bookkeeping kept at the start of each mapped chunk, so that the arena's
/// own metadata does not require the global allocator either.
struct ChunkHeader {
    /// The previously mapped chunk, if any.
    prev: *mut ChunkHeader,
    /// Usable bytes following this header.
    capacity: usize,
    /// Bytes handed out so far, relative to the end of the header.
    used: usize,
}


/// A bump allocator whose memory lives for the rest of the process.
///
/// Safe for concurrent allocation from multiple threads; never reclaims.
/// Values placed here are never dropped.
pub(crate) struct Arena {
    head: Mutex<*mut ChunkHeader>,
}

// SAFETY: Chunk pointers are only ever dereferenced while holding the
//         mutex, and the memory they point at is never unmapped.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub(crate) const fn new() -> Self {
        Self {
            head: Mutex::new(ptr::null_mut()),
        }
    }

    fn chunk_data(chunk: *mut ChunkHeader) -> *mut u8 {
        // SAFETY: The header is always followed by `capacity` usable bytes.
        unsafe { chunk.cast::<u8>().add(size_of::<ChunkHeader>()) }
    }

    /// Map a fresh chunk able to serve at least `min_capacity` bytes.
    fn map_chunk(min_capacity: usize) -> *mut ChunkHeader {
        let size = (size_of::<ChunkHeader>() + min_capacity).max(CHUNK_SIZE);
        // SAFETY: Plain anonymous mapping; no file descriptor involved.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            panic!("failed to map {size} bytes of symbolizer arena memory")
        }

        let chunk = ptr.cast::<ChunkHeader>();
        // SAFETY: `ptr` points at `size` freshly mapped, suitably aligned
        //         bytes.
        let () = unsafe {
            chunk.write(ChunkHeader {
                prev: ptr::null_mut(),
                capacity: size - size_of::<ChunkHeader>(),
                used: 0,
            })
        };
        chunk
    }

    fn alloc_raw(&self, size: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());

        let mut head = self.head.lock().unwrap();
        // SAFETY: `head` is either null or points at a live chunk; all
        //         arithmetic stays within that chunk's mapping.
        unsafe {
            if !head.is_null() {
                let chunk = *head;
                let base = Self::chunk_data(chunk) as usize;
                let start = (base + (*chunk).used + align - 1) & !(align - 1);
                if start + size <= base + (*chunk).capacity {
                    (*chunk).used = start + size - base;
                    return start as *mut u8
                }
            }

            let chunk = Self::map_chunk(size + align);
            (*chunk).prev = *head;
            *head = chunk;
            let base = Self::chunk_data(chunk) as usize;
            let start = (base + align - 1) & !(align - 1);
            (*chunk).used = start + size - base;
            start as *mut u8
        }
    }

    /// Move `value` into the arena.
    ///
    /// The value is never dropped; its own heap allocations, if any, stay
    /// live for the rest of the process.
    pub(crate) fn alloc<T>(&self, value: T) -> &'static mut T {
        let ptr = self.alloc_raw(size_of::<T>(), align_of::<T>()).cast::<T>();
        // SAFETY: `ptr` is valid for writes of `T` and exclusively ours.
        unsafe {
            let () = ptr.write(value);
            &mut *ptr
        }
    }

    /// Copy `s` into the arena.
    ///
    /// The stored bytes are NUL terminated for the benefit of C level
    /// consumers; the terminator is not part of the returned slice.
    pub(crate) fn alloc_str(&self, s: &str) -> &'static str {
        let ptr = self.alloc_raw(s.len() + 1, 1);
        // SAFETY: `ptr` is valid for `s.len() + 1` bytes and the copied
        //         bytes are valid UTF-8 by construction.
        unsafe {
            let () = ptr::copy_nonoverlapping(s.as_ptr(), ptr, s.len());
            let () = ptr.add(s.len()).write(0);
            str::from_utf8_unchecked(slice::from_raw_parts(ptr, s.len()))
        }
    }

    /// Copy a slice into the arena.
    pub(crate) fn alloc_slice<T>(&self, values: &[T]) -> &'static [T]
    where
        T: Copy,
    {
        if values.is_empty() {
            return &[]
        }

        let ptr = self
            .alloc_raw(size_of::<T>() * values.len(), align_of::<T>())
            .cast::<T>();
        // SAFETY: `ptr` is valid for `values.len()` writes of `T`.
        unsafe {
            let () = ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len());
            slice::from_raw_parts(ptr, values.len())
        }
    }
}


/// The arena every symbolization allocation is served from.
pub(crate) static ARENA: Arena = Arena::new();


#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use test_log::test;


    /// Check that interned strings keep their contents and are NUL
    /// terminated in storage.
    #[test]
    fn str_interning() {
        let arena = Arena::new();
        let s = arena.alloc_str("_ZN4core3fmt5writeE");
        assert_eq!(s, "_ZN4core3fmt5writeE");

        // SAFETY: `alloc_str` places a NUL byte right after the string.
        let nul = unsafe { *s.as_ptr().add(s.len()) };
        assert_eq!(nul, 0);

        let empty = arena.alloc_str("");
        assert_eq!(empty, "");
    }

    /// Check that values are aligned properly even after odd-sized string
    /// allocations.
    #[test]
    fn value_alignment() {
        let arena = Arena::new();
        let _s = arena.alloc_str("odd");
        let value = arena.alloc(0xdead_beef_u64);
        assert_eq!(*value, 0xdead_beef);
        assert_eq!(value as *const u64 as usize % align_of::<u64>(), 0);

        let slice = arena.alloc_slice(&[1u32, 2, 3]);
        assert_eq!(slice, &[1, 2, 3]);
        assert_eq!(slice.as_ptr() as usize % align_of::<u32>(), 0);
    }

    /// Check that allocations larger than the chunk granularity work and
    /// that earlier allocations stay intact when new chunks are mapped.
    #[test]
    fn chunk_spill_over() {
        let arena = Arena::new();
        let first = arena.alloc_str("stays put");

        let big = "x".repeat(CHUNK_SIZE * 2);
        let spilled = arena.alloc_str(&big);
        assert_eq!(spilled.len(), big.len());
        assert_eq!(first, "stays put");

        let after = arena.alloc_str("after the spill");
        assert_eq!(after, "after the spill");
    }

    /// Check that concurrent allocations yield disjoint, stable storage.
    #[test]
    fn concurrent_allocation() {
        let arena = &ARENA;
        let handles = (0..8)
            .map(|thread_idx| {
                thread::spawn(move || {
                    (0..256)
                        .map(|i| {
                            let s = format!("thread-{thread_idx}-alloc-{i}");
                            (arena.alloc_str(&s), s)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            for (interned, expected) in handle.join().unwrap() {
                assert_eq!(interned, expected.as_str());
            }
        }
    }
}
