//! Crash recovery (`spec.md` §4.F).
//!
//! Run once, at `open`, before any head is trusted. Four passes:
//!
//! 1. Sweep every page for corruption (an illegal counter, or a chunk whose
//!    `(size, state)` pair cannot arise from normal writes) and erase any
//!    page found corrupt. Only an interrupted page erase can produce these;
//!    an interrupted chunk write cannot, because a chunk's header bytes are
//!    each written as a single atomic byte.
//! 2. Find the write head: the page with the smallest non-erased counter
//!    (fewest cleared bits cleared last ⇒ most recently written) is the
//!    current page; walk it chunk by chunk until an erased slot is found.
//! 3. Find the destructive-read head: step backwards one page at a time
//!    from the write head's page, landing on the first unconsumed chunk
//!    found, erasing any fully-consumed page passed along the way.
//! 4. Seed the (non-destructive) read head at the same position as the
//!    destructive-read head.

use crate::chunk::{self, ChunkState};
use crate::fmt::debug;
use crate::layout::Ring;
use crate::page;
use flash_fifo_flash::Flash;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RecoveredState {
    pub write_offset: u32,
    pub next_rank: u8,
    pub raw_read_offset: u32,
    pub destructive_read_offset: u32,
    pub free_space: u32,
}

pub(crate) fn recover<F: Flash>(flash: &mut F, ring: Ring) -> Result<RecoveredState, F::Error> {
    repair_corrupt_pages(flash, ring)?;

    let mut free_space = ring.file_size();
    let mut chosen: Option<(u32, u8)> = None;
    for page in 0..ring.pages_per_file {
        let counter = read_counter(flash, ring, page)?;
        if counter != page::COUNTER_ERASED {
            free_space -= 1;
            let replace = match chosen {
                None => true,
                Some((_, current)) => counter < current,
            };
            if replace {
                chosen = Some((page, counter));
            }
        }
    }

    let state = match chosen {
        None => {
            debug!("recovery: every page erased, starting fresh");
            RecoveredState {
                write_offset: ring.page_start(0),
                next_rank: page::FIRST_RANK,
                raw_read_offset: ring.first_slot(0),
                destructive_read_offset: ring.first_slot(0),
                free_space,
            }
        }
        Some((page, counter)) => {
            let next_rank = page::next_rank_after(counter);
            let write_offset = tally_page_usage(flash, ring, page, None, &mut free_space)?;
            let (destructive_read_offset, erased_while_locating) =
                locate_destructive_head(flash, ring, page, write_offset)?;
            free_space += erased_while_locating;
            debug!(
                "recovery: write head page {} offset {}, destructive head {}",
                page, write_offset, destructive_read_offset
            );
            RecoveredState {
                write_offset,
                next_rank,
                raw_read_offset: destructive_read_offset,
                destructive_read_offset,
                free_space,
            }
        }
    };

    Ok(state)
}

fn read_counter<F: Flash>(flash: &mut F, ring: Ring, page: u32) -> Result<u8, F::Error> {
    let mut buf = [0u8; 1];
    flash.read(ring.device_addr(ring.page_start(page)), &mut buf)?;
    Ok(buf[0])
}

fn repair_corrupt_pages<F: Flash>(flash: &mut F, ring: Ring) -> Result<(), F::Error> {
    for page in 0..ring.pages_per_file {
        let counter = read_counter(flash, ring, page)?;
        let corrupt = if !page::is_legal(counter) {
            true
        } else if counter == page::COUNTER_ERASED {
            false
        } else {
            page_has_corrupt_chunk(flash, ring, page)?
        };
        if corrupt {
            debug!("recovery: erasing corrupt page {}", page);
            flash.erase(ring.device_addr(ring.page_start(page)))?;
        }
    }
    Ok(())
}

fn page_has_corrupt_chunk<F: Flash>(flash: &mut F, ring: Ring, page: u32) -> Result<bool, F::Error> {
    let mut offset = ring.first_slot(page);
    let limit = ring.page_size - 1;
    let mut seen = 0u32;
    loop {
        if seen >= limit {
            return Ok(false);
        }
        let (size, state) = chunk::read_header(flash, ring.device_addr(offset))?;
        match chunk::classify(size, state) {
            ChunkState::Erased | ChunkState::Invalid => return Ok(false),
            ChunkState::Corrupt => return Ok(true),
            ChunkState::Valid { size } | ChunkState::Consumed { size } => {
                let step = size as u32 + 2;
                if step > limit - seen {
                    // A chunk can never straddle a page boundary; an
                    // announced size that would requires one is corruption.
                    return Ok(true);
                }
                offset += step;
                seen += step;
            }
        }
    }
}

/// Walk a page from its first chunk slot until an erased slot is found (or
/// `bound` is reached, for the write-head's own page), subtracting
/// `size + 2` from `free_space` for every `Invalid`/`Valid` chunk passed.
/// `Consumed` chunks are skipped without charge: their bytes are already
/// logically reclaimed.
fn tally_page_usage<F: Flash>(
    flash: &mut F,
    ring: Ring,
    page: u32,
    bound: Option<u32>,
    free_space: &mut u32,
) -> Result<u32, F::Error> {
    let mut offset = ring.first_slot(page);
    let limit = ring.page_size - 1;
    let mut seen = 0u32;
    loop {
        if let Some(b) = bound {
            if offset == b {
                return Ok(offset);
            }
        }
        if seen >= limit {
            return Ok(offset);
        }
        let (size, state) = chunk::read_header(flash, ring.device_addr(offset))?;
        match chunk::classify(size, state) {
            ChunkState::Erased => return Ok(offset),
            ChunkState::Corrupt => return Ok(offset),
            ChunkState::Invalid | ChunkState::Valid { .. } => {
                let step = size as u32 + 2;
                *free_space -= step;
                offset += step;
                seen += step;
            }
            ChunkState::Consumed { size } => {
                let step = size as u32 + 2;
                offset += step;
                seen += step;
            }
        }
    }
}

/// Walk a page from its first chunk slot, skipping `Consumed` chunks, and
/// return the first `Valid` chunk's offset. `None` means the page has no
/// remaining live content (it is either fully consumed, or the first
/// non-`Consumed` chunk found is `Invalid`/`Erased`/`Corrupt`).
fn find_first_valid<F: Flash>(
    flash: &mut F,
    ring: Ring,
    page: u32,
    bound: Option<u32>,
) -> Result<Option<u32>, F::Error> {
    let mut offset = ring.first_slot(page);
    let limit = ring.page_size - 1;
    let mut seen = 0u32;
    loop {
        if let Some(b) = bound {
            if offset == b {
                return Ok(None);
            }
        }
        if seen >= limit {
            return Ok(None);
        }
        let (size, state) = chunk::read_header(flash, ring.device_addr(offset))?;
        match chunk::classify(size, state) {
            ChunkState::Valid { .. } => return Ok(Some(offset)),
            ChunkState::Consumed { size } => {
                let step = size as u32 + 2;
                offset += step;
                seen += step;
            }
            ChunkState::Invalid | ChunkState::Erased | ChunkState::Corrupt => return Ok(None),
        }
    }
}

/// Step backwards from `write_page` looking for the oldest unconsumed
/// chunk, erasing every fully-consumed page passed along the way. Returns
/// the landing offset and how many pages were erased during the walk (each
/// one gives back its counter byte to `free_space`).
fn locate_destructive_head<F: Flash>(
    flash: &mut F,
    ring: Ring,
    write_page: u32,
    write_offset: u32,
) -> Result<(u32, u32), F::Error> {
    let mut page = ring.prev_page(write_page);
    let mut erased = 0u32;
    loop {
        if page == write_page {
            let landed = find_first_valid(flash, ring, write_page, Some(write_offset))?;
            return Ok((landed.unwrap_or(write_offset), erased));
        }
        let counter = read_counter(flash, ring, page)?;
        if counter == page::COUNTER_ERASED {
            let boundary_page = ring.next_page(page);
            if boundary_page == write_page {
                let landed = find_first_valid(flash, ring, write_page, Some(write_offset))?;
                return Ok((landed.unwrap_or(write_offset), erased));
            }
            return Ok((ring.first_slot(boundary_page), erased));
        }
        match find_first_valid(flash, ring, page, None)? {
            Some(offset) => return Ok((offset, erased)),
            None => {
                flash.erase(ring.device_addr(ring.page_start(page)))?;
                erased += 1;
                page = ring.prev_page(page);
            }
        }
    }
}
