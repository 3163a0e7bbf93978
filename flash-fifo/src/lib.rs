#![no_std]

// Must be first so its macros are in scope for the rest of the crate.
mod fmt;

mod chunk;
mod cursor;
mod layout;
mod ops;
mod page;
mod recovery;

pub use chunk::ChunkState;
pub use layout::{FileLayout, PAGES_PER_FILE_MAX, PAGES_PER_FILE_MIN};

use core::cell::Cell;
use flash_fifo_flash::Flash;

/// Largest payload a single chunk can carry (`spec.md` §3).
pub const MAX_CHUNK_PAYLOAD: usize = chunk::MAX_PAYLOAD as usize;

/// Errors surfaced by a queue operation that could not be completed, as
/// opposed to one that was simply rejected (full queue, bad argument,
/// stalled write head) — those are reported through the operation's return
/// value, not this type.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError<E: core::fmt::Debug> {
    #[error("flash device error")]
    Flash(E),
}

/// Failure to open a file.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenError<E: core::fmt::Debug> {
    /// Another handle for this `file_id` is already open.
    #[error("file is already open")]
    Busy,
    /// `file_id` is not less than `MAX_FILES`.
    #[error("file_id out of range")]
    BadFileId,
    /// Recovery could not complete because the device reported an error.
    #[error("flash device error during recovery")]
    Flash(E),
}

/// Tracks which file IDs currently have an open handle.
///
/// Stands in for the single process-global open-file counter a simpler
/// design might reach for: each caller constructs its own registry (often
/// one `static`), so independent flash devices, or independent tests, never
/// share open/close state by accident.
pub struct OpenRegistry<const MAX_FILES: usize> {
    open: Cell<u32>,
}

impl<const MAX_FILES: usize> OpenRegistry<MAX_FILES> {
    /// A registry with nothing open. Panics if `MAX_FILES` exceeds the
    /// 32-bit bitset this registry is backed by.
    pub const fn new() -> Self {
        assert!(MAX_FILES <= 32, "OpenRegistry supports at most 32 files");
        Self { open: Cell::new(0) }
    }

    fn try_acquire(&self, file_id: usize) -> bool {
        let mask = 1u32 << file_id;
        let current = self.open.get();
        if current & mask != 0 {
            false
        } else {
            self.open.set(current | mask);
            true
        }
    }

    fn release(&self, file_id: usize) {
        self.open.set(self.open.get() & !(1u32 << file_id));
    }

    /// Whether `file_id` currently has an open handle.
    pub fn is_open(&self, file_id: usize) -> bool {
        self.open.get() & (1u32 << file_id) != 0
    }
}

impl<const MAX_FILES: usize> Default for OpenRegistry<MAX_FILES> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle onto one FIFO file living in `PAGES_PER_FILE` pages of `F`.
///
/// Opening runs recovery (`spec.md` §4.F) so the four heads below always
/// reflect what the device actually holds, even across an arbitrary power
/// loss since the last `write`/`consume`.
pub struct Queue<'r, F: Flash, const PAGES_PER_FILE: usize, const MAX_FILES: usize> {
    flash: F,
    layout: FileLayout<PAGES_PER_FILE>,
    file_id: usize,
    registry: &'r OpenRegistry<MAX_FILES>,
    write_offset: u32,
    write_rank: u8,
    raw_read_chunk_start: u32,
    raw_read_progress: u32,
    destructive_read_offset: u32,
    free_space: u32,
}

impl<'r, F: Flash, const PAGES_PER_FILE: usize, const MAX_FILES: usize>
    Queue<'r, F, PAGES_PER_FILE, MAX_FILES>
{
    /// Open `file_id`, recovering its heads from whatever the device holds.
    ///
    /// Fails with [`OpenError::Busy`] if `file_id` already has an open
    /// handle in `registry` (`spec.md` §5: at most one open handle per
    /// file). The handle releases its slot in `registry` when dropped.
    pub fn open(
        mut flash: F,
        layout: FileLayout<PAGES_PER_FILE>,
        file_id: usize,
        registry: &'r OpenRegistry<MAX_FILES>,
    ) -> Result<Self, OpenError<F::Error>> {
        if file_id >= MAX_FILES {
            return Err(OpenError::BadFileId);
        }
        if !registry.try_acquire(file_id) {
            return Err(OpenError::Busy);
        }
        let ring = layout.ring::<F>();
        let recovered = recovery::recover(&mut flash, ring).map_err(|e| {
            registry.release(file_id);
            OpenError::Flash(e)
        })?;
        fmt::debug!("queue: opened file {}", file_id);
        Ok(Self {
            flash,
            layout,
            file_id,
            registry,
            write_offset: recovered.write_offset,
            write_rank: recovered.next_rank,
            raw_read_chunk_start: recovered.raw_read_offset,
            raw_read_progress: 0,
            destructive_read_offset: recovered.destructive_read_offset,
            free_space: recovered.free_space,
        })
    }

    /// Release the handle. The engine never buffers in memory, so this is
    /// just bookkeeping: dropping the handle has the same effect.
    pub fn close(self) {}

    /// Release the handle and hand back the underlying flash device, the
    /// way a peripheral driver's `release`/`free` gives back a borrowed bus
    /// once the caller is done with it. Useful for handing the device to a
    /// different `Queue` (a different `PAGES_PER_FILE` or file id) without
    /// destroying it.
    pub fn release(self) -> F {
        let this = core::mem::ManuallyDrop::new(self);
        this.registry.release(this.file_id);
        // SAFETY: `this` is a `ManuallyDrop`, so its destructor never runs
        // and `this.flash` is never read again after this point.
        unsafe { core::ptr::read(&this.flash) }
    }

    pub(crate) fn ring(&self) -> layout::Ring {
        self.layout.ring::<F>()
    }
}

impl<'r, F: Flash, const PAGES_PER_FILE: usize, const MAX_FILES: usize> Drop
    for Queue<'r, F, PAGES_PER_FILE, MAX_FILES>
{
    fn drop(&mut self) {
        self.registry.release(self.file_id);
    }
}
