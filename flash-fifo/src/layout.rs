//! File layout and ring address arithmetic.
//!
//! A "file" is `PAGES_PER_FILE` contiguous pages of a [`Flash`] device,
//! starting at some `base_address`. All other modules in this crate work in
//! *file-relative* offsets (`0..FILE_SIZE`, wrapping); [`Ring`] is the only
//! place that knows how to turn those into device-absolute addresses.

use flash_fifo_flash::Flash;

/// Smallest `PAGES_PER_FILE` this engine accepts. Below 3 there isn't enough
/// room for a write head, a read head and a destructive-read head to occupy
/// distinct pages while the engine reclaims space.
pub const PAGES_PER_FILE_MIN: usize = 3;

/// Largest `PAGES_PER_FILE` this engine accepts, bounded by the 8
/// distinguishable ranks the page counter encodes (`spec.md` §9 leaves
/// widening the counter to 2 bytes as future work; this revision rejects
/// larger rings instead of silently misbehaving).
pub const PAGES_PER_FILE_MAX: usize = 8;

/// Where a file's pages live on the underlying device.
///
/// `PAGES_PER_FILE` is a const generic so the ring size is known at compile
/// time; `base_address` is the one runtime-configured value, analogous to a
/// flash region's base offset in a partition table.
#[derive(Debug, Clone, Copy)]
pub struct FileLayout<const PAGES_PER_FILE: usize> {
    base_address: u32,
}

impl<const PAGES_PER_FILE: usize> FileLayout<PAGES_PER_FILE> {
    /// A file occupying `PAGES_PER_FILE` pages starting at `base_address`.
    ///
    /// Panics if `PAGES_PER_FILE` is outside `3..=8`, the same way a
    /// misconfigured partition table panics at construction rather than
    /// failing later on every operation.
    pub fn new(base_address: u32) -> Self {
        assert!(
            (PAGES_PER_FILE_MIN..=PAGES_PER_FILE_MAX).contains(&PAGES_PER_FILE),
            "PAGES_PER_FILE must be between {PAGES_PER_FILE_MIN} and {PAGES_PER_FILE_MAX}"
        );
        Self { base_address }
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Build the runtime [`Ring`] helper for this layout over `F`.
    pub(crate) fn ring<F: Flash>(&self) -> Ring {
        Ring {
            page_size: F::PAGE_SIZE as u32,
            pages_per_file: PAGES_PER_FILE as u32,
            base: self.base_address,
        }
    }
}

/// Ring address arithmetic over file-relative offsets.
///
/// Every offset this type accepts or returns (other than
/// [`Ring::device_addr`]'s result) is file-relative, in `0..file_size()`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ring {
    pub page_size: u32,
    pub pages_per_file: u32,
    pub base: u32,
}

impl Ring {
    pub fn file_size(&self) -> u32 {
        self.page_size * self.pages_per_file
    }

    pub fn device_addr(&self, file_offset: u32) -> u32 {
        self.base + file_offset
    }

    pub fn page_index(&self, file_offset: u32) -> u32 {
        file_offset / self.page_size
    }

    pub fn in_page(&self, file_offset: u32) -> u32 {
        file_offset % self.page_size
    }

    /// File-relative offset of `page`'s counter byte.
    pub fn page_start(&self, page: u32) -> u32 {
        page * self.page_size
    }

    /// File-relative offset of `page`'s first chunk slot (just past its
    /// counter byte).
    pub fn first_slot(&self, page: u32) -> u32 {
        self.page_start(page) + 1
    }

    pub fn next_page(&self, page: u32) -> u32 {
        (page + 1) % self.pages_per_file
    }

    pub fn prev_page(&self, page: u32) -> u32 {
        (page + self.pages_per_file - 1) % self.pages_per_file
    }

    /// File-relative offset of the next page's first chunk slot, wrapping.
    pub fn next_page_first_slot(&self, file_offset: u32) -> u32 {
        self.first_slot(self.next_page(self.page_index(file_offset)))
    }

    /// File-relative offset of the next page's counter byte, wrapping.
    pub fn next_page_start(&self, file_offset: u32) -> u32 {
        self.page_start(self.next_page(self.page_index(file_offset)))
    }

    /// Bytes remaining in `file_offset`'s page, up to (not including) the
    /// next page's counter byte.
    pub fn bytes_to_page_end(&self, file_offset: u32) -> u32 {
        self.page_size - self.in_page(file_offset)
    }
}
