//! Chunk codec (`spec.md` §4.B).
//!
//! Each chunk is a two-byte header (`size`, `state`) immediately followed by
//! `size` bytes of payload. Because a [`Flash::write`] can only clear bits,
//! the header's lifecycle is a strictly one-way walk through legal values:
//!
//! ```text
//! erased(0xFF,0xFF) -> sized(size,0xFF) -> valid(size,0xFE) -> consumed(size,0xFC)
//! ```
//!
//! `classify` turns a `(size, state)` pair read back off the device into a
//! [`ChunkState`], including the "structurally impossible" pairs that can
//! only arise from a page erase interrupted by a power cut.

use flash_fifo_flash::Flash;

/// Size byte value meaning "no chunk has been written here yet".
pub const SIZE_ERASED: u8 = 0xFF;
/// State byte value for a header whose size has been written but which has
/// not yet been committed (`sized`/`payloaded` in `spec.md`'s terms).
pub const STATE_UNCOMMITTED: u8 = 0xFF;
/// State byte value for a committed, unconsumed chunk.
pub const STATE_VALID: u8 = 0xFE;
/// State byte value for a committed chunk whose payload has been consumed.
pub const STATE_CONSUMED: u8 = 0xFC;

/// Smallest legal payload length.
pub const MIN_PAYLOAD: u8 = 1;
/// Largest legal payload length (`spec.md` §3: "1..254").
pub const MAX_PAYLOAD: u8 = 254;

/// The decoded meaning of a chunk header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChunkState {
    /// `(0xFF, 0xFF)`: nothing has ever been written here.
    Erased,
    /// Size committed, payload may or may not be fully written, state not
    /// yet advanced to `Valid`. A power cut can leave a chunk here forever;
    /// readers must skip it.
    Invalid,
    /// A complete, unconsumed chunk of `size` bytes.
    Valid { size: u8 },
    /// A complete chunk whose payload has already been handed to a consumer.
    Consumed { size: u8 },
    /// A `(size, state)` pair that cannot arise from normal writes; only a
    /// page erase interrupted by a power cut produces this.
    Corrupt,
}

/// Classify a chunk header read back off the device.
pub fn classify(size: u8, state: u8) -> ChunkState {
    match (size, state) {
        (SIZE_ERASED, STATE_UNCOMMITTED) => ChunkState::Erased,
        (SIZE_ERASED, _) => ChunkState::Corrupt,
        (s, STATE_UNCOMMITTED) if (MIN_PAYLOAD..=MAX_PAYLOAD).contains(&s) => ChunkState::Invalid,
        (s, STATE_VALID) if (MIN_PAYLOAD..=MAX_PAYLOAD).contains(&s) => ChunkState::Valid { size: s },
        (s, STATE_CONSUMED) if (MIN_PAYLOAD..=MAX_PAYLOAD).contains(&s) => {
            ChunkState::Consumed { size: s }
        }
        _ => ChunkState::Corrupt,
    }
}

/// Read the two header bytes at `addr` (device-absolute).
pub fn read_header<F: Flash>(flash: &mut F, addr: u32) -> Result<(u8, u8), F::Error> {
    let mut buf = [0u8; 2];
    flash.read(addr, &mut buf)?;
    Ok((buf[0], buf[1]))
}

/// Write a chunk's size byte and payload, leaving the state byte
/// uncommitted. The caller is responsible for writing `bytes` (of length
/// `size`) starting at `addr + 2`.
pub fn write_size<F: Flash>(flash: &mut F, addr: u32, size: u8) -> Result<(), F::Error> {
    debug_assert!((MIN_PAYLOAD..=MAX_PAYLOAD).contains(&size));
    flash.write(addr, &[size])
}

/// Advance a chunk's state byte from uncommitted to [`STATE_VALID`].
pub fn commit<F: Flash>(flash: &mut F, addr: u32) -> Result<(), F::Error> {
    flash.write(addr + 1, &[STATE_VALID])
}

/// Advance a chunk's state byte from [`STATE_VALID`] to [`STATE_CONSUMED`].
pub fn mark_consumed<F: Flash>(flash: &mut F, addr: u32) -> Result<(), F::Error> {
    flash.write(addr + 1, &[STATE_CONSUMED])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_pair_is_erased() {
        assert_eq!(classify(0xFF, 0xFF), ChunkState::Erased);
    }

    #[test]
    fn size_without_state_is_invalid() {
        assert_eq!(classify(10, 0xFF), ChunkState::Invalid);
    }

    #[test]
    fn committed_pair_is_valid() {
        assert_eq!(classify(10, STATE_VALID), ChunkState::Valid { size: 10 });
    }

    #[test]
    fn consumed_pair_is_consumed() {
        assert_eq!(classify(10, STATE_CONSUMED), ChunkState::Consumed { size: 10 });
    }

    #[test]
    fn erased_size_with_committed_state_is_corrupt() {
        assert_eq!(classify(0xFF, STATE_VALID), ChunkState::Corrupt);
        assert_eq!(classify(0xFF, STATE_CONSUMED), ChunkState::Corrupt);
    }

    #[test]
    fn zero_size_is_always_corrupt() {
        assert_eq!(classify(0, 0xFF), ChunkState::Corrupt);
        assert_eq!(classify(0, STATE_VALID), ChunkState::Corrupt);
    }

    #[test]
    fn unknown_state_byte_is_corrupt() {
        assert_eq!(classify(10, 0x55), ChunkState::Corrupt);
    }
}
