//! Range encoder and decoder (RFC 6716 Sections 4.1 and 5.1).
//!
//! The encoder and decoder share the same register layout and the same
//! renormalization schedule, so a stream written by [`RangeEncoder`] is read
//! back symbol for symbol by [`RangeDecoder`] as long as both sides make the
//! same sequence of calls with the same distributions.

mod carry;
mod decoder;
mod encoder;

pub use decoder::RangeDecoder;
pub use encoder::{RangeEncoder, RangeEncoderSnapshot};

use crate::util::ilog;

/// Number of bits output at a time.
pub const EC_SYM_BITS: u32 = 8;

/// Total number of bits in each of the state registers.
pub const EC_CODE_BITS: u32 = 32;

/// Maximum symbol value.
pub const EC_SYM_MAX: u32 = (1 << EC_SYM_BITS) - 1;

/// Bits to shift by to move a symbol into the high-order position.
pub const EC_CODE_SHIFT: u32 = EC_CODE_BITS - EC_SYM_BITS - 1;

/// Carry bit of the high-order range symbol.
pub const EC_CODE_TOP: u32 = 1 << (EC_CODE_BITS - 1);

/// Low-order bit of the high-order range symbol. The range is renormalized
/// whenever it drops to this value or below.
pub const EC_CODE_BOT: u32 = EC_CODE_TOP >> EC_SYM_BITS;

/// Number of bits available for the last, partial symbol in the code field.
pub const EC_CODE_EXTRA: u32 = (EC_CODE_BITS - 2) % EC_SYM_BITS + 1;

/// Number of bits of a uniform integer coded through the range coder. Any
/// remaining low bits go to the raw-bit stream.
pub const EC_UINT_BITS: u32 = 8;

/// Size of the raw-bit window in bits.
pub const EC_WINDOW_SIZE: u32 = u32::BITS;

/// Maximum number of raw bits transferred by a single call.
pub const EC_MAX_RAW_BITS: u32 = 25;

/// Largest total frequency accepted by the interval primitives.
pub const EC_MAX_FT: u32 = 1 << 16;

/// Largest log2 total accepted by the binary and icdf primitives.
pub const EC_MAX_FTB: u32 = 16;

/// Resolution of [`RangeEncoder::ec_tell_frac`] and
/// [`RangeDecoder::ec_tell_frac`] in bits (1/8th of a bit).
pub const BITRES: u32 = 3;

/// Thresholds for the fractional part of `log2(range)` in Q15, one per 1/8th
/// of a bit.
const TELL_FRAC_CORRECTION: [u32; 8] = [35733, 38967, 42495, 46340, 50535, 55109, 60097, 65535];

const fn tell(total_bits: u32, range: u32) -> u32 {
    total_bits.saturating_sub(ilog(range))
}

fn tell_frac(total_bits: u32, range: u32) -> u32 {
    let nbits = total_bits << BITRES;
    let lg = ilog(range);
    let r = range >> lg.saturating_sub(16);
    let mut b = ((r >> 12) - 8) as usize;
    if r > TELL_FRAC_CORRECTION[b] {
        b += 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    let lg = (lg << BITRES) + b as u32;
    nbits.saturating_sub(lg)
}
