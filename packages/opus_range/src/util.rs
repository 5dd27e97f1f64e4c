/// Integer base-2 logarithm per RFC 6716 Section 1.1.10.
///
/// Returns the number of bits needed to represent `x`, so `ilog(0) == 0`,
/// `ilog(1) == 1` and `ilog(0x80_0000) == 24`.
#[must_use]
pub const fn ilog(x: u32) -> u32 {
    u32::BITS - x.leading_zeros()
}
