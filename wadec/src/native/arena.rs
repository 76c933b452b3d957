//! Typed views into a core's linear memory, with bulk teardown.
//!
//! Every allocation an arena makes is recorded until [`MemoryArena::free`],
//! which hands each pointer back to the core exactly once. Views carry the
//! arena's id and generation, so a view used after its arena was freed (or
//! on another arena) is rejected instead of reading recycled memory.

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};

use super::{Element, LinearMemory};
use crate::utils::errors::ArenaError;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerRecord {
    pub ptr: u32,
    pub byte_len: usize,
    /// Element size in bytes.
    pub stride: usize,
}

/// `len` elements of `T` starting at `ptr`.
#[derive(Debug, Clone, Copy)]
pub struct View<T: Element> {
    ptr: u32,
    len: usize,
    arena: u64,
    generation: u64,
    _marker: PhantomData<T>,
}

impl<T: Element> View<T> {
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * T::SIZE
    }
}

#[derive(Debug)]
pub struct MemoryArena {
    id: u64,
    generation: u64,
    pointers: Vec<PointerRecord>,
}

impl Default for MemoryArena {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArena {
    pub fn new() -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            pointers: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Incremented by every [`free`](Self::free).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tracked(&self) -> &[PointerRecord] {
        &self.pointers
    }

    /// Allocates `count` elements of `T` from the core and tracks the pointer.
    pub fn allocate<T, M>(&mut self, core: &mut M, count: usize) -> Result<View<T>, ArenaError>
    where
        T: Element,
        M: LinearMemory + ?Sized,
    {
        let overflow = ArenaError::SizeOverflow {
            count,
            size: T::SIZE,
        };
        let bytes = count.checked_mul(T::SIZE).ok_or(overflow)?;
        let size = u32::try_from(bytes).map_err(|_| ArenaError::SizeOverflow {
            count,
            size: T::SIZE,
        })?;

        let ptr = core.malloc(size);
        if ptr == 0 {
            return Err(ArenaError::AllocationFailed { bytes });
        }

        let memory = core.memory().len();
        if ptr as usize + bytes > memory {
            core.free(ptr);
            return Err(ArenaError::OutOfBounds { ptr, bytes, memory });
        }

        self.pointers.push(PointerRecord {
            ptr,
            byte_len: bytes,
            stride: T::SIZE,
        });
        trace!("arena {}: allocated {bytes} bytes at {ptr:#X}", self.id);

        Ok(View {
            ptr,
            len: count,
            arena: self.id,
            generation: self.generation,
            _marker: PhantomData,
        })
    }

    fn region<T: Element>(
        &self,
        view: &View<T>,
        elements: Range<usize>,
        memory: usize,
    ) -> Result<Range<usize>, ArenaError> {
        if view.arena != self.id {
            return Err(ArenaError::ForeignView {
                owner: view.arena,
                arena: self.id,
            });
        }
        if view.generation != self.generation {
            return Err(ArenaError::StaleView {
                view: view.generation,
                arena: self.generation,
            });
        }
        if elements.end > view.len {
            return Err(ArenaError::Overflow {
                len: elements.end,
                capacity: view.len,
            });
        }

        let start = view.ptr as usize + elements.start * T::SIZE;
        let end = view.ptr as usize + elements.end * T::SIZE;
        if end > memory {
            return Err(ArenaError::OutOfBounds {
                ptr: view.ptr,
                bytes: view.byte_len(),
                memory,
            });
        }

        Ok(start..end)
    }

    /// Writes `values` to the start of `view`.
    pub fn write<T, M>(&self, core: &mut M, view: &View<T>, values: &[T]) -> Result<(), ArenaError>
    where
        T: Element,
        M: LinearMemory + ?Sized,
    {
        let memory = core.memory_mut();
        let region = self.region(view, 0..values.len(), memory.len())?;

        for (value, dst) in values.iter().zip(memory[region].chunks_exact_mut(T::SIZE)) {
            value.write_le(dst);
        }
        Ok(())
    }

    pub fn write_bytes<M>(&self, core: &mut M, view: &View<u8>, bytes: &[u8]) -> Result<(), ArenaError>
    where
        M: LinearMemory + ?Sized,
    {
        let memory = core.memory_mut();
        let region = self.region(view, 0..bytes.len(), memory.len())?;
        memory[region].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies `len` elements starting at element `offset` out of `view`.
    pub fn read<T, M>(&self, core: &M, view: &View<T>, offset: usize, len: usize) -> Result<Vec<T>, ArenaError>
    where
        T: Element,
        M: LinearMemory + ?Sized,
    {
        let memory = core.memory();
        let region = self.region(view, offset..offset + len, memory.len())?;

        Ok(memory[region]
            .chunks_exact(T::SIZE)
            .map(T::read_le)
            .collect())
    }

    /// Returns every tracked pointer to the core and invalidates all views.
    ///
    /// Returns how many pointers were released; a second call releases none.
    pub fn free<M>(&mut self, core: &mut M) -> usize
    where
        M: LinearMemory + ?Sized,
    {
        let released = self.pointers.len();
        for record in self.pointers.drain(..) {
            core.free(record.ptr);
        }
        self.generation += 1;

        if released > 0 {
            debug!("arena {}: released {released} allocations", self.id);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::fake::FakeCore;

    #[test]
    fn free_releases_each_pointer_once() -> Result<(), ArenaError> {
        let mut core = FakeCore::new();
        let mut arena = MemoryArena::new();

        for count in 1..=16 {
            arena.allocate::<f32, _>(&mut core, count * 100)?;
        }
        assert_eq!(arena.tracked().len(), 16);
        assert_eq!(core.live_allocations(), 16);

        assert_eq!(arena.free(&mut core), 16);
        assert!(arena.tracked().is_empty());
        assert_eq!(core.frees(), 16);
        assert_eq!(core.live_allocations(), 0);

        assert_eq!(arena.free(&mut core), 0);
        assert_eq!(core.frees(), 16);
        Ok(())
    }

    #[test]
    fn records_byte_length_and_stride() -> Result<(), ArenaError> {
        let mut core = FakeCore::new();
        let mut arena = MemoryArena::new();

        let view = arena.allocate::<f32, _>(&mut core, 10)?;
        assert_eq!(view.byte_len(), 40);
        assert_eq!(
            arena.tracked(),
            [PointerRecord {
                ptr: view.ptr(),
                byte_len: 40,
                stride: 4
            }]
        );
        Ok(())
    }

    #[test]
    fn views_read_back_what_was_written() -> Result<(), ArenaError> {
        let mut core = FakeCore::new();
        let mut arena = MemoryArena::new();

        let floats = arena.allocate::<f32, _>(&mut core, 8)?;
        arena.write(&mut core, &floats, &[0.5, -1.0, 0.25])?;
        assert_eq!(arena.read(&core, &floats, 1, 2)?, [-1.0, 0.25]);

        let bytes = arena.allocate::<u8, _>(&mut core, 4)?;
        arena.write_bytes(&mut core, &bytes, b"wasm")?;
        assert_eq!(arena.read(&core, &bytes, 0, 4)?, b"wasm");

        // little-endian in linear memory
        let start = floats.ptr() as usize;
        assert_eq!(core.memory()[start..start + 4], 0.5f32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_access() -> Result<(), ArenaError> {
        let mut core = FakeCore::new();
        let mut arena = MemoryArena::new();
        let view = arena.allocate::<i32, _>(&mut core, 2)?;

        assert!(matches!(
            arena.write(&mut core, &view, &[1, 2, 3]),
            Err(ArenaError::Overflow { len: 3, capacity: 2 })
        ));
        assert!(matches!(
            arena.read(&core, &view, 1, 2),
            Err(ArenaError::Overflow { len: 3, capacity: 2 })
        ));
        Ok(())
    }

    #[test]
    fn views_go_stale_after_free() -> Result<(), ArenaError> {
        let mut core = FakeCore::new();
        let mut arena = MemoryArena::new();
        let view = arena.allocate::<u8, _>(&mut core, 4)?;

        arena.free(&mut core);
        assert!(matches!(
            arena.write_bytes(&mut core, &view, b"late"),
            Err(ArenaError::StaleView { view: 0, arena: 1 })
        ));

        let other = MemoryArena::new();
        let fresh = arena.allocate::<u8, _>(&mut core, 4)?;
        assert!(matches!(
            other.read(&core, &fresh, 0, 4),
            Err(ArenaError::ForeignView { .. })
        ));
        Ok(())
    }

    #[test]
    fn allocation_failure_is_not_tracked() {
        let mut core = FakeCore::new();
        let mut arena = MemoryArena::new();
        core.fail_allocations(true);

        assert!(matches!(
            arena.allocate::<f32, _>(&mut core, 16),
            Err(ArenaError::AllocationFailed { bytes: 64 })
        ));
        assert!(arena.tracked().is_empty());

        assert!(matches!(
            arena.allocate::<f32, _>(&mut core, usize::MAX),
            Err(ArenaError::SizeOverflow { .. })
        ));
    }
}
