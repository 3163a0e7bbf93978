//! An in-memory [`Flash`] implementation for testing, with injectable
//! power-loss.
//!
//! Modeled on `embedded_nand::test::VirtualNandFlash` (a plain in-RAM array
//! standing in for a device), extended with the fault-injection idea from
//! a flash memory simulator that tracks whether a write or erase was left
//! partially applied. Because this crate's atomicity floor is a single byte
//! (not a whole page), faults here are injected at byte granularity rather
//! than by swapping a page's state enum.

use crate::{ErrorType, Flash, FlashError, FlashErrorKind};

/// One-shot fault to apply to the next mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Truncate the next `write` to its first `n` bytes; the rest of the
    /// buffer is dropped as if power had been lost mid-transfer.
    TruncateWrite(usize),
    /// Leave the next `erase`'d page not fully returned to `0xFF`: only the
    /// first `n` bytes are erased, simulating a power cut mid-erase. This
    /// can leave the page counter byte (offset 0) outside the legal set.
    TruncateErase(usize),
}

/// Simulated flash device: `SIZE` bytes, page-addressed in units of
/// `PAGE_SIZE`.
#[derive(Debug, Clone)]
pub struct SimFlash<const PAGE_SIZE: usize, const SIZE: usize> {
    data: [u8; SIZE],
    fault: Option<Fault>,
    erase_count: u32,
}

impl<const PAGE_SIZE: usize, const SIZE: usize> SimFlash<PAGE_SIZE, SIZE> {
    /// A fresh device: every byte erased (`0xFF`), as flash ships from the
    /// factory.
    pub fn new() -> Self {
        assert!(SIZE % PAGE_SIZE == 0, "SIZE must be a multiple of PAGE_SIZE");
        Self {
            data: [0xFF; SIZE],
            fault: None,
            erase_count: 0,
        }
    }

    /// Read-only view of the raw bytes, for asserting on-flash layout in
    /// tests.
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Number of erases this device has serviced, for tests asserting on
    /// erase-minimization behavior.
    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }

    /// Arm a one-shot power loss that truncates the *next* `write` call to
    /// its first `n` bytes.
    pub fn fail_write_after(&mut self, n: usize) {
        self.fault = Some(Fault::TruncateWrite(n));
    }

    /// Arm a one-shot power loss that truncates the *next* `erase` call to
    /// its first `n` bytes, leaving the remainder of the page (and possibly
    /// the page counter) in its pre-erase state.
    pub fn fail_erase_after(&mut self, n: usize) {
        self.fault = Some(Fault::TruncateErase(n));
    }
}

impl<const PAGE_SIZE: usize, const SIZE: usize> Default for SimFlash<PAGE_SIZE, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for [`SimFlash`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SimError {
    OutOfBounds,
}

impl FlashError for SimError {
    fn kind(&self) -> FlashErrorKind {
        match self {
            SimError::OutOfBounds => FlashErrorKind::OutOfBounds,
        }
    }
}

impl<const PAGE_SIZE: usize, const SIZE: usize> ErrorType for SimFlash<PAGE_SIZE, SIZE> {
    type Error = SimError;
}

impl<const PAGE_SIZE: usize, const SIZE: usize> Flash for SimFlash<PAGE_SIZE, SIZE> {
    const PAGE_SIZE: usize = PAGE_SIZE;

    fn read(&mut self, addr: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = addr as usize;
        let end = start.checked_add(bytes.len()).ok_or(SimError::OutOfBounds)?;
        if end > SIZE {
            return Err(SimError::OutOfBounds);
        }
        bytes.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = addr as usize;
        let end = start.checked_add(bytes.len()).ok_or(SimError::OutOfBounds)?;
        if end > SIZE {
            return Err(SimError::OutOfBounds);
        }
        let apply_len = match self.fault.take() {
            Some(Fault::TruncateWrite(n)) => n.min(bytes.len()),
            Some(other) => {
                // A fault for a different operation was armed; leave it
                // armed for its intended call.
                self.fault = Some(other);
                bytes.len()
            }
            None => bytes.len(),
        };
        for (dst, src) in self.data[start..start + apply_len]
            .iter_mut()
            .zip(bytes[..apply_len].iter())
        {
            *dst &= *src;
        }
        Ok(())
    }

    fn erase(&mut self, page_addr: u32) -> Result<(), Self::Error> {
        let start = page_addr as usize;
        if start % PAGE_SIZE != 0 {
            return Err(SimError::OutOfBounds);
        }
        let end = start.checked_add(PAGE_SIZE).ok_or(SimError::OutOfBounds)?;
        if end > SIZE {
            return Err(SimError::OutOfBounds);
        }
        self.erase_count += 1;
        let apply_len = match self.fault.take() {
            Some(Fault::TruncateErase(n)) => n.min(PAGE_SIZE),
            Some(other) => {
                self.fault = Some(other);
                PAGE_SIZE
            }
            None => PAGE_SIZE,
        };
        self.data[start..start + apply_len].fill(0xFF);
        Ok(())
    }
}
