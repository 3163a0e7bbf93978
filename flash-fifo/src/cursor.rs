//! Ring pointer engine (`spec.md` §4.D).
//!
//! The read head and the destructive-read head both "land": given a
//! file-relative offset sitting at a chunk boundary, walk forward skipping
//! any chunk that isn't useful to that head, stopping at a `Valid` chunk or
//! at the write head. This module factors that shared walk out of both
//! heads so the skip rules (page-boundary dead tails, `Invalid`/`Consumed`
//! chunks) are written once.

use crate::chunk::{self, ChunkState};
use crate::fmt::trace;
use crate::layout::Ring;
use flash_fifo_flash::Flash;

/// Whether a landing walk should fold the bytes it skips back into
/// `free_space`.
///
/// Only the destructive-read head reclaims space as it passes over
/// consumed chunks and page dead-tails; the plain read head is
/// non-destructive and leaves `free_space` untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reclaim {
    No,
    Yes,
}

/// Starting from a chunk boundary at `offset`, resolve the landing position
/// for a head: skip `Invalid` and `Consumed` chunks and page dead-tails,
/// stopping at the first `Valid` chunk or at `write_offset`, whichever
/// comes first.
///
/// `free_space` is credited for every byte skipped when `reclaim` is
/// [`Reclaim::Yes`].
pub(crate) fn land<F: Flash>(
    flash: &mut F,
    ring: Ring,
    mut offset: u32,
    write_offset: u32,
    reclaim: Reclaim,
    free_space: &mut u32,
) -> Result<u32, F::Error> {
    loop {
        if offset == write_offset {
            return Ok(offset);
        }
        let (size, state) = chunk::read_header(flash, ring.device_addr(offset))?;
        match chunk::classify(size, state) {
            ChunkState::Valid { .. } => return Ok(offset),
            ChunkState::Invalid | ChunkState::Consumed { .. } => {
                let step = size as u32 + 2;
                if reclaim == Reclaim::Yes {
                    *free_space += step;
                }
                offset = (offset + step) % ring.file_size();
            }
            ChunkState::Erased | ChunkState::Corrupt => {
                let dead = ring.bytes_to_page_end(offset);
                if reclaim == Reclaim::Yes {
                    *free_space += dead;
                }
                trace!("cursor: dead tail of {} bytes at offset {}", dead, offset);
                offset = ring.next_page_first_slot(offset);
            }
        }
    }
}

/// Step a head past the chunk it just finished with (`size` bytes of
/// payload plus its two-byte header), then resolve the new landing
/// position exactly as [`land`] does.
pub(crate) fn advance_past_chunk<F: Flash>(
    flash: &mut F,
    ring: Ring,
    offset: u32,
    size: u8,
    write_offset: u32,
    reclaim: Reclaim,
    free_space: &mut u32,
) -> Result<u32, F::Error> {
    let step = size as u32 + 2;
    if reclaim == Reclaim::Yes {
        *free_space += step;
    }
    let next = (offset + step) % ring.file_size();
    land(flash, ring, next, write_offset, reclaim, free_space)
}
