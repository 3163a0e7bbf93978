//! Write, read, consume and size operations (`spec.md` §4.E).

use crate::chunk::{self, ChunkState};
use crate::cursor::{self, Reclaim};
use crate::fmt::trace;
use crate::layout::Ring;
use crate::page;
use crate::{QueueError, Queue};
use flash_fifo_flash::Flash;

impl<'r, F: Flash, const PAGES_PER_FILE: usize, const MAX_FILES: usize>
    Queue<'r, F, PAGES_PER_FILE, MAX_FILES>
{
    fn read_counter(&mut self, ring: Ring, page: u32) -> Result<u8, QueueError<F::Error>> {
        let mut buf = [0u8; 1];
        self.flash
            .read(ring.device_addr(ring.page_start(page)), &mut buf)
            .map_err(QueueError::Flash)?;
        Ok(buf[0])
    }

    /// Append `bytes` as one chunk.
    ///
    /// Returns `Ok(false)` without touching the device if `bytes` is empty
    /// or longer than [`crate::MAX_CHUNK_PAYLOAD`]; if the chunk (`len + 2`)
    /// wouldn't fit even on a freshly erased page; or if there isn't room:
    /// either the queue is full, or the write head is stalled at a page
    /// that hasn't been erased since it was last drained (the caller should
    /// `consume()` and retry).
    pub fn write(&mut self, bytes: &[u8]) -> Result<bool, QueueError<F::Error>> {
        if bytes.is_empty() || bytes.len() > crate::MAX_CHUNK_PAYLOAD {
            return Ok(false);
        }
        let ring = self.ring();
        let size = bytes.len() as u8;
        let needed = size as u32 + 2;
        if needed > ring.page_size - 1 {
            // Doesn't fit even on a freshly erased page; no amount of
            // aggregate free_space or page-advancing changes that.
            return Ok(false);
        }

        let mut offset = self.write_offset;
        let mut dead_tail = 0u32;
        if ring.in_page(offset) != 0 {
            let remaining = ring.bytes_to_page_end(offset);
            if needed > remaining {
                dead_tail = remaining;
                offset = ring.next_page_start(offset);
            }
        }

        let entering_fresh_page = ring.in_page(offset) == 0;
        let mut counter_cost = 0u32;
        if entering_fresh_page {
            let page = ring.page_index(offset);
            if self.read_counter(ring, page)? != page::COUNTER_ERASED {
                trace!("write: stalled, page {} not yet erased", page);
                return Ok(false);
            }
            counter_cost = 1;
        }

        let total_needed = needed + dead_tail + counter_cost;
        if total_needed > self.free_space {
            return Ok(false);
        }

        if entering_fresh_page {
            let page = ring.page_index(offset);
            let counter = page::counter_for_rank(self.write_rank);
            self.flash
                .write(ring.device_addr(ring.page_start(page)), &[counter])
                .map_err(QueueError::Flash)?;
            self.write_rank = page::advance_rank(self.write_rank);
            // A read head that was sitting exactly here was "caught up" to
            // the old write head, hovering above this page's counter byte.
            // The chunk this call is about to commit lands right past that
            // counter, so any head still parked on it needs to move past it
            // too, or it would next try to read this page's counter byte as
            // a chunk header.
            if self.raw_read_chunk_start == offset {
                self.raw_read_chunk_start = offset + 1;
            }
            if self.destructive_read_offset == offset {
                self.destructive_read_offset = offset + 1;
            }
            offset += 1;
        }

        let addr = ring.device_addr(offset);
        chunk::write_size(&mut self.flash, addr, size).map_err(QueueError::Flash)?;
        self.flash
            .write(addr + 2, bytes)
            .map_err(QueueError::Flash)?;
        chunk::commit(&mut self.flash, addr).map_err(QueueError::Flash)?;

        self.free_space -= total_needed;
        self.write_offset = (offset + needed) % ring.file_size();
        trace!("write: committed {} bytes at offset {}", size, offset);
        Ok(true)
    }

    /// Copy up to `buf.len()` bytes from the oldest unread chunk into `buf`,
    /// without marking anything consumed. A short chunk yields fewer bytes
    /// than `buf.len()`; a chunk longer than `buf` can be drained across
    /// several calls. Returns `0` once the read head has caught up to the
    /// write head.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, QueueError<F::Error>> {
        if self.raw_read_chunk_start == self.write_offset {
            return Ok(0);
        }
        let ring = self.ring();
        let addr = ring.device_addr(self.raw_read_chunk_start);
        let (size, state) = chunk::read_header(&mut self.flash, addr).map_err(QueueError::Flash)?;
        let size = match chunk::classify(size, state) {
            ChunkState::Valid { size } => size,
            // A head can only observe this before the device has ever been
            // written: nothing has reached the write head yet to land on.
            ChunkState::Erased => return Ok(0),
            other => {
                debug_assert!(false, "raw read head landed on non-Valid chunk: {:?}", other);
                return Ok(0);
            }
        };

        let remaining = size as u32 - self.raw_read_progress;
        let n = buf.len().min(remaining as usize);
        if n > 0 {
            let payload_addr = addr + 2 + self.raw_read_progress;
            self.flash
                .read(payload_addr, &mut buf[..n])
                .map_err(QueueError::Flash)?;
        }
        self.raw_read_progress += n as u32;

        if self.raw_read_progress == size as u32 {
            let mut unused_free_space = self.free_space;
            let next = cursor::advance_past_chunk(
                &mut self.flash,
                ring,
                self.raw_read_chunk_start,
                size,
                self.write_offset,
                Reclaim::No,
                &mut unused_free_space,
            )
            .map_err(QueueError::Flash)?;
            self.raw_read_chunk_start = next;
            self.raw_read_progress = 0;
        }
        Ok(n)
    }

    /// Permanently discard the oldest whole chunks already delivered by
    /// `read`, whose total payload is at most `n`, returning the total
    /// payload bytes freed. Stops as soon as the next chunk's size would
    /// exceed the remainder of `n`, or once the destructive head catches
    /// the raw read head — consume never partially destroys a chunk, so a
    /// `n` shorter than the oldest chunk is a no-op. Pages the destructive
    /// head leaves entirely behind are erased eagerly, since nothing in
    /// them can ever be read again.
    pub fn consume(&mut self, n: u32) -> Result<u32, QueueError<F::Error>> {
        let ring = self.ring();
        let start = self.destructive_read_offset;
        let mut offset = start;
        let mut consumed_bytes = 0u32;

        while offset != self.raw_read_chunk_start {
            let addr = ring.device_addr(offset);
            let (size, state) =
                chunk::read_header(&mut self.flash, addr).map_err(QueueError::Flash)?;
            let size = match chunk::classify(size, state) {
                ChunkState::Valid { size } => size,
                ChunkState::Erased => break,
                other => {
                    debug_assert!(false, "destructive head landed on non-Valid chunk: {:?}", other);
                    break;
                }
            };
            if consumed_bytes + size as u32 > n {
                break;
            }
            chunk::mark_consumed(&mut self.flash, addr).map_err(QueueError::Flash)?;
            consumed_bytes += size as u32;
            offset = cursor::advance_past_chunk(
                &mut self.flash,
                ring,
                offset,
                size,
                self.write_offset,
                Reclaim::Yes,
                &mut self.free_space,
            )
            .map_err(QueueError::Flash)?;
        }
        self.destructive_read_offset = offset;
        self.reclaim_crossed_pages(ring, start, offset)?;
        trace!("consume: freed {} bytes", consumed_bytes);
        Ok(consumed_bytes)
    }

    /// Erase every page the destructive-read head has moved entirely past
    /// between `start` and `end` (exclusive of `end`'s page). Each such page
    /// is guaranteed free of any remaining `Valid`/`Invalid` content: the
    /// head only ever lands on one or the write head.
    fn reclaim_crossed_pages(
        &mut self,
        ring: Ring,
        start: u32,
        end: u32,
    ) -> Result<(), QueueError<F::Error>> {
        let start_page = ring.page_index(start);
        let end_page = ring.page_index(end);
        if start_page == end_page {
            return Ok(());
        }
        let mut page = start_page;
        for _ in 0..ring.pages_per_file {
            if page == end_page {
                break;
            }
            self.flash
                .erase(ring.device_addr(ring.page_start(page)))
                .map_err(QueueError::Flash)?;
            self.free_space += 1;
            trace!("consume: reclaimed page {}", page);
            page = ring.next_page(page);
        }
        Ok(())
    }

    /// Total payload bytes still enqueued: everything written and not yet
    /// consumed, whether or not it has already been streamed out by `read`.
    pub fn size(&mut self) -> Result<u32, QueueError<F::Error>> {
        let ring = self.ring();
        let mut offset = self.destructive_read_offset;
        let mut total = 0u32;
        while offset != self.write_offset {
            let addr = ring.device_addr(offset);
            let (size, state) =
                chunk::read_header(&mut self.flash, addr).map_err(QueueError::Flash)?;
            match chunk::classify(size, state) {
                ChunkState::Valid { size } => {
                    total += size as u32;
                    offset = (offset + size as u32 + 2) % ring.file_size();
                }
                ChunkState::Consumed { size } => {
                    offset = (offset + size as u32 + 2) % ring.file_size();
                }
                ChunkState::Invalid => {
                    offset = (offset + size as u32 + 2) % ring.file_size();
                }
                ChunkState::Erased | ChunkState::Corrupt => {
                    offset = ring.next_page_first_slot(offset);
                }
            }
        }
        Ok(total)
    }
}
