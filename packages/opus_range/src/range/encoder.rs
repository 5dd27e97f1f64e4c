use crate::error::{Error, Result};
use crate::util::ilog;

use super::carry::Carry;
use super::{
    EC_CODE_BITS, EC_CODE_BOT, EC_CODE_SHIFT, EC_CODE_TOP, EC_MAX_FT, EC_MAX_FTB, EC_MAX_RAW_BITS,
    EC_SYM_BITS, EC_SYM_MAX, EC_UINT_BITS, EC_WINDOW_SIZE, tell, tell_frac,
};

/// Register state of a [`RangeEncoder`], everything except the buffer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EncoderState {
    storage: usize,
    position: usize,
    end_position: usize,
    end_window: u32,
    end_bits: u32,
    total_bits: u32,
    range: u32,
    value: u32,
    carry: Carry,
    error: bool,
    done: bool,
}

/// Range encoder for producing Opus packets.
///
/// Implements the range encoder specified in RFC 6716 Section 5.1, the exact
/// inverse of [`RangeDecoder`](super::RangeDecoder). Range-coded symbols are
/// written from the front of the buffer and raw bits from the back. The two
/// regions never overlap: a write that would cross into the other region is
/// dropped and sets the sticky error flag.
///
/// The packet is complete once [`Self::ec_enc_done`] has been called. Any
/// bytes between the two regions are zero at that point, so the whole buffer
/// (see [`Self::buffer`]) can be sent as is.
///
/// # Examples
///
/// ```rust
/// # use moosicbox_opus_range::range::RangeEncoder;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut packet = [0_u8; 4];
/// let mut encoder = RangeEncoder::new(&mut packet);
///
/// encoder.ec_enc_bit_logp(true, 1)?;
/// encoder.ec_enc_done();
///
/// assert!(!encoder.ec_get_error());
/// assert_eq!(encoder.ec_range_bytes(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RangeEncoder<'a> {
    buffer: &'a mut [u8],
    state: EncoderState,
}

/// Saved encoder state for trial encoding.
///
/// Holds the registers together with the bytes already written at both ends
/// of the buffer, so [`RangeEncoder::restore`] undoes everything encoded
/// after [`RangeEncoder::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEncoderSnapshot {
    state: EncoderState,
    front: Vec<u8>,
    tail: Vec<u8>,
}

impl RangeEncoderSnapshot {
    /// Number of range-coded bytes written when the snapshot was taken.
    #[must_use]
    pub const fn ec_range_bytes(&self) -> usize {
        self.state.position
    }

    /// Whole bits written when the snapshot was taken.
    #[must_use]
    pub const fn ec_tell(&self) -> u32 {
        tell(self.state.total_bits, self.state.range)
    }
}

impl<'a> RangeEncoder<'a> {
    /// Creates a new range encoder writing into `buffer` per RFC 6716 Section 5.1.
    ///
    /// The whole slice is available to the encoder. To encode into part of a
    /// larger buffer, pass a subslice.
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let storage = buffer.len();

        Self {
            buffer,
            state: EncoderState {
                storage,
                position: 0,
                end_position: 0,
                end_window: 0,
                end_bits: 0,
                total_bits: EC_CODE_BITS + 1,
                range: EC_CODE_TOP,
                value: 0,
                carry: Carry::Unset,
                error: false,
                done: false,
            },
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.state.done {
            return Err(Error::RangeEncoder("encoder already finalized".to_string()));
        }
        Ok(())
    }

    fn overflow(&mut self) {
        if !self.state.error {
            log::warn!(
                "range encoder out of space: storage={} position={} end_position={}",
                self.state.storage,
                self.state.position,
                self.state.end_position
            );
        }
        self.state.error = true;
    }

    fn write_byte(&mut self, byte: u8) {
        if self.state.position + self.state.end_position >= self.state.storage {
            self.overflow();
            return;
        }

        self.buffer[self.state.position] = byte;
        self.state.position += 1;
    }

    fn write_byte_at_end(&mut self, byte: u8) {
        if self.state.position + self.state.end_position >= self.state.storage {
            self.overflow();
            return;
        }

        self.state.end_position += 1;
        self.buffer[self.state.storage - self.state.end_position] = byte;
    }

    fn carry_out(&mut self, symbol: u32) {
        let (carry, settled) = self.state.carry.push(symbol);
        self.state.carry = carry;

        if let Some(settled) = settled {
            for byte in settled.bytes() {
                self.write_byte(byte);
            }
        }
    }

    fn normalize(&mut self) {
        while self.state.range <= EC_CODE_BOT {
            self.carry_out(self.state.value >> EC_CODE_SHIFT);
            self.state.value = (self.state.value << EC_SYM_BITS) & (EC_CODE_TOP - 1);
            self.state.range <<= EC_SYM_BITS;
            self.state.total_bits += EC_SYM_BITS;
        }
    }

    /// Encodes the symbol occupying `[fl, fh)` out of a total of `ft` per RFC 6716 Section 5.1.1.
    ///
    /// # Errors
    ///
    /// * If `ft` is zero or larger than `2^16`
    /// * Unless `fl < fh <= ft`
    /// * If the encoder has already been finalized
    pub fn ec_encode(&mut self, fl: u32, fh: u32, ft: u32) -> Result<()> {
        self.check_open()?;

        if ft == 0 || ft > EC_MAX_FT {
            return Err(Error::RangeEncoder(format!(
                "ft must be in 1..={EC_MAX_FT}, got {ft}"
            )));
        }
        if fl >= fh || fh > ft {
            return Err(Error::RangeEncoder(format!(
                "invalid interval [{fl}, {fh}) for ft {ft}"
            )));
        }

        let r = self.state.range / ft;
        self.update(r, fl, fh, ft);

        Ok(())
    }

    /// Encodes a symbol out of a power-of-two total `1 << ftb`.
    ///
    /// Equivalent to `ec_encode(fl, fh, 1 << ftb)` but without the division.
    ///
    /// # Errors
    ///
    /// * If `ftb > 16`
    /// * Unless `fl < fh <= 1 << ftb`
    /// * If the encoder has already been finalized
    pub fn ec_encode_bin(&mut self, fl: u32, fh: u32, ftb: u32) -> Result<()> {
        self.check_open()?;

        if ftb > EC_MAX_FTB {
            return Err(Error::RangeEncoder(format!(
                "ftb must be at most {EC_MAX_FTB}, got {ftb}"
            )));
        }
        let ft = 1_u32 << ftb;
        if fl >= fh || fh > ft {
            return Err(Error::RangeEncoder(format!(
                "invalid interval [{fl}, {fh}) for ft {ft}"
            )));
        }

        let r = self.state.range >> ftb;
        self.update(r, fl, fh, ft);

        Ok(())
    }

    fn update(&mut self, r: u32, fl: u32, fh: u32, ft: u32) {
        if fl > 0 {
            self.state.value += self.state.range - r * (ft - fl);
            self.state.range = r * (fh - fl);
        } else {
            self.state.range -= r * (ft - fh);
        }

        self.normalize();
    }

    /// Encodes a bit that is one with probability `1/(1<<logp)` per RFC 6716 Section 5.1.3.
    ///
    /// # Errors
    ///
    /// * If `logp` is not in `1..=16`
    /// * If the encoder has already been finalized
    pub fn ec_enc_bit_logp(&mut self, bit: bool, logp: u32) -> Result<()> {
        self.check_open()?;

        if logp == 0 || logp > EC_MAX_FTB {
            return Err(Error::RangeEncoder(format!(
                "logp must be in 1..={EC_MAX_FTB}, got {logp}"
            )));
        }

        let s = self.state.range >> logp;
        let r = self.state.range - s;

        if bit {
            self.state.value += r;
            self.state.range = s;
        } else {
            self.state.range = r;
        }

        self.normalize();

        Ok(())
    }

    /// Encodes symbol `s` using an inverse CDF table per RFC 6716 Section 5.1.3.
    ///
    /// `icdf` uses the same layout as
    /// [`RangeDecoder::ec_dec_icdf`](super::RangeDecoder::ec_dec_icdf): entry
    /// `k` is `2^ftb` minus the cumulative frequency through symbol `k`.
    ///
    /// # Errors
    ///
    /// * If `ftb > 16`
    /// * If `s` is not an index into `icdf`
    /// * If symbol `s` has zero probability in the table
    /// * If the encoder has already been finalized
    pub fn ec_enc_icdf(&mut self, s: usize, icdf: &[u8], ftb: u32) -> Result<()> {
        let high = s.checked_sub(1).and_then(|i| icdf.get(i)).copied();
        let low = icdf.get(s).copied();
        self.enc_icdf(s, high.map(u32::from), low.map(u32::from), ftb)
    }

    /// Encodes symbol `s` using a 16-bit inverse CDF table.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ec_enc_icdf`].
    pub fn ec_enc_icdf_u16(&mut self, s: usize, icdf: &[u16], ftb: u32) -> Result<()> {
        let high = s.checked_sub(1).and_then(|i| icdf.get(i)).copied();
        let low = icdf.get(s).copied();
        self.enc_icdf(s, high.map(u32::from), low.map(u32::from), ftb)
    }

    fn enc_icdf(&mut self, s: usize, high: Option<u32>, low: Option<u32>, ftb: u32) -> Result<()> {
        self.check_open()?;

        if ftb > EC_MAX_FTB {
            return Err(Error::RangeEncoder(format!(
                "ftb must be at most {EC_MAX_FTB}, got {ftb}"
            )));
        }
        let Some(low) = low else {
            return Err(Error::RangeEncoder(format!(
                "symbol {s} is outside the icdf table"
            )));
        };
        if high.unwrap_or(1 << ftb) <= low {
            return Err(Error::RangeEncoder(format!(
                "symbol {s} has zero probability in the icdf table"
            )));
        }

        let r = self.state.range >> ftb;

        if let Some(high) = high {
            self.state.value += self.state.range - r * high;
            self.state.range = r * (high - low);
        } else {
            self.state.range -= r * low;
        }

        self.normalize();

        Ok(())
    }

    /// Encodes a uniformly distributed integer `fl` in `[0, ft)` per RFC 6716 Section 5.1.4.
    ///
    /// Values of `ft - 1` wider than 8 bits are split: the top 8 bits are
    /// range coded and the rest are written as raw bits.
    ///
    /// # Errors
    ///
    /// * If `ft == 0` or `fl >= ft`
    /// * If the encoder has already been finalized
    pub fn ec_enc_uint(&mut self, fl: u32, ft: u32) -> Result<()> {
        self.check_open()?;

        if ft == 0 {
            return Err(Error::RangeEncoder("ft must be positive".to_string()));
        }
        if fl >= ft {
            return Err(Error::RangeEncoder(format!(
                "value {fl} out of range for ft {ft}"
            )));
        }

        let ftb = ilog(ft - 1);

        if ftb <= EC_UINT_BITS {
            return self.ec_encode(fl, fl + 1, ft);
        }

        let low_bits = ftb - EC_UINT_BITS;
        let ft_high = ((ft - 1) >> low_bits) + 1;
        let fl_high = fl >> low_bits;

        self.ec_encode(fl_high, fl_high + 1, ft_high)?;
        self.ec_enc_bits(fl & ((1 << low_bits) - 1), low_bits)
    }

    /// Writes `bits` raw bits of `value` to the end of the buffer per RFC 6716 Section 5.1.2.
    ///
    /// Bits are packed least significant first, from the last byte toward the
    /// front, and are read back with
    /// [`RangeDecoder::ec_dec_bits`](super::RangeDecoder::ec_dec_bits).
    ///
    /// # Errors
    ///
    /// * If `bits > 25` or `value` does not fit in `bits` bits
    /// * If the encoder has already been finalized
    pub fn ec_enc_bits(&mut self, value: u32, bits: u32) -> Result<()> {
        self.check_open()?;

        if bits > EC_MAX_RAW_BITS {
            return Err(Error::RangeEncoder(format!(
                "cannot encode more than {EC_MAX_RAW_BITS} bits at once"
            )));
        }
        if value >> bits != 0 {
            return Err(Error::RangeEncoder(format!(
                "value {value:#x} does not fit in {bits} bits"
            )));
        }

        if bits == 0 {
            return Ok(());
        }

        let mut window = self.state.end_window;
        let mut used = self.state.end_bits;

        if used + bits > EC_WINDOW_SIZE {
            while used >= EC_SYM_BITS {
                #[allow(clippy::cast_possible_truncation)]
                self.write_byte_at_end((window & EC_SYM_MAX) as u8);
                window >>= EC_SYM_BITS;
                used -= EC_SYM_BITS;
            }
        }

        window |= value << used;
        used += bits;

        self.state.end_window = window;
        self.state.end_bits = used;
        self.state.total_bits += bits;

        Ok(())
    }

    /// Overwrites the first `nbits` bits of the stream with `value`.
    ///
    /// Used for flags whose value is only known after the rest of the packet
    /// has been encoded. The first `nbits` bits must already be fixed by the
    /// symbols encoded so far (each of them must have had a probability of at
    /// most `1/2`). If they are not, the sticky error flag is set.
    ///
    /// # Errors
    ///
    /// Returns an error if `nbits > 8` or `value` does not fit in `nbits` bits.
    pub fn ec_enc_patch_initial_bits(&mut self, value: u32, nbits: u32) -> Result<()> {
        if nbits > EC_SYM_BITS {
            return Err(Error::RangeEncoder(format!(
                "cannot patch more than {EC_SYM_BITS} bits, got {nbits}"
            )));
        }
        if value >> nbits != 0 {
            return Err(Error::RangeEncoder(format!(
                "value {value:#x} does not fit in {nbits} bits"
            )));
        }

        let shift = EC_SYM_BITS - nbits;
        let mask = ((1_u32 << nbits) - 1) << shift;

        if self.state.position > 0 {
            // The first byte has already been written.
            #[allow(clippy::cast_possible_truncation)]
            let patched = ((u32::from(self.buffer[0]) & !mask) | (value << shift)) as u8;
            self.buffer[0] = patched;
        } else if let Some(pending) = self.state.carry.pending() {
            #[allow(clippy::cast_possible_truncation)]
            let patched = ((u32::from(pending) & !mask) | (value << shift)) as u8;
            self.state.carry = self.state.carry.with_pending(patched);
        } else if self.state.range <= EC_CODE_TOP >> nbits {
            // The first bits are still in the low register, but fixed.
            self.state.value = (self.state.value & !(mask << EC_CODE_SHIFT))
                | (value << (EC_CODE_SHIFT + shift));
        } else {
            log::warn!("ec_enc_patch_initial_bits: first {nbits} bits not yet determined");
            self.state.error = true;
        }

        Ok(())
    }

    /// Moves the raw bits so the packet ends at `size` bytes.
    ///
    /// Used when the final packet size is only known after encoding started.
    /// The range-coded bytes stay where they are.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is smaller than the bytes already written
    /// or larger than the current storage.
    pub fn ec_enc_shrink(&mut self, size: usize) -> Result<()> {
        let written = self.state.position + self.state.end_position;
        if size < written || size > self.state.storage {
            return Err(Error::RangeEncoder(format!(
                "cannot shrink to {size} bytes: {written} written, storage {}",
                self.state.storage
            )));
        }

        let end = self.state.end_position;
        let storage = self.state.storage;
        self.buffer.copy_within(storage - end..storage, size - end);
        self.state.storage = size;

        log::debug!("ec_enc_shrink: storage {storage} -> {size}");

        Ok(())
    }

    /// Finalizes the stream per RFC 6716 Section 5.1.5.
    ///
    /// Writes the fewest bits that still identify the final interval, flushes
    /// the carry register and the raw bits, and zeroes the unused bytes
    /// between the two regions. Calling it again has no effect. No further
    /// symbols can be encoded afterwards.
    pub fn ec_enc_done(&mut self) {
        if self.state.done {
            return;
        }
        self.state.done = true;

        // Number of bits needed to pick a point inside [value, value + range).
        #[allow(clippy::cast_possible_wrap)]
        let mut l = (EC_CODE_BITS - ilog(self.state.range)) as i32;
        let mut mask = (EC_CODE_TOP - 1) >> l;
        let mut end = (self.state.value + mask) & !mask;

        if (end | mask) >= self.state.value + self.state.range {
            l += 1;
            mask >>= 1;
            end = (self.state.value + mask) & !mask;
        }

        while l > 0 {
            self.carry_out(end >> EC_CODE_SHIFT);
            end = (end << EC_SYM_BITS) & (EC_CODE_TOP - 1);
            #[allow(clippy::cast_possible_wrap)]
            {
                l -= EC_SYM_BITS as i32;
            }
        }

        if !self.state.carry.is_unset() {
            self.carry_out(0);
        }

        let mut window = self.state.end_window;
        let mut used = self.state.end_bits;

        while used >= EC_SYM_BITS {
            #[allow(clippy::cast_possible_truncation)]
            self.write_byte_at_end((window & EC_SYM_MAX) as u8);
            window >>= EC_SYM_BITS;
            used -= EC_SYM_BITS;
        }

        if !self.state.error {
            let gap_end = self.state.storage - self.state.end_position;
            self.buffer[self.state.position..gap_end].fill(0);

            if used > 0 {
                self.merge_last_raw_bits(window, used, l.unsigned_abs());
            }
        }

        log::debug!(
            "ec_enc_done: range_bytes={} raw_bytes={} storage={} error={}",
            self.state.position,
            self.state.end_position,
            self.state.storage,
            self.state.error
        );
    }

    /// ORs the last partial raw byte into the byte at the tail boundary.
    /// `spare` is the number of low bits of the last range-coded byte that
    /// carry no information.
    fn merge_last_raw_bits(&mut self, mut window: u32, used: u32, spare: u32) {
        if self.state.end_position >= self.state.storage {
            self.overflow();
            return;
        }

        if self.state.position + self.state.end_position >= self.state.storage && spare < used {
            // The raw bits share their byte with the range coder and do not fit.
            window &= (1 << spare) - 1;
            self.overflow();
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            self.buffer[self.state.storage - self.state.end_position - 1] |= window as u8;
        }
    }

    /// Returns the number of whole bits written so far.
    ///
    /// Rounded up the same way as
    /// [`RangeDecoder::ec_tell`](super::RangeDecoder::ec_tell), so both sides
    /// agree at every point of the stream.
    #[must_use]
    pub const fn ec_tell(&self) -> u32 {
        tell(self.state.total_bits, self.state.range)
    }

    /// Returns the number of bits written in units of 1/8 bit.
    #[must_use]
    pub fn ec_tell_frac(&self) -> u32 {
        tell_frac(self.state.total_bits, self.state.range)
    }

    /// Returns the number of range-coded bytes written at the front of the buffer.
    #[must_use]
    pub const fn ec_range_bytes(&self) -> usize {
        self.state.position
    }

    /// Returns `true` if a write was dropped for lack of space, or a patch
    /// could not be applied.
    #[must_use]
    pub const fn ec_get_error(&self) -> bool {
        self.state.error
    }

    /// Returns the current range. After [`Self::ec_enc_done`] this is the
    /// final range, which the decoder reproduces after the last symbol.
    #[must_use]
    pub const fn get_range(&self) -> u32 {
        self.state.range
    }

    /// Returns the low end of the current interval.
    #[must_use]
    pub const fn get_value(&self) -> u32 {
        self.state.value
    }

    /// Returns the number of bytes the packet occupies, the length of the
    /// buffer unless [`Self::ec_enc_shrink`] reduced it.
    #[must_use]
    pub const fn storage(&self) -> usize {
        self.state.storage
    }

    /// Returns the packet bytes, `storage()` long.
    ///
    /// Only complete once [`Self::ec_enc_done`] has been called.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..self.state.storage]
    }

    /// Saves the encoder state, including the bytes written so far.
    #[must_use]
    pub fn snapshot(&self) -> RangeEncoderSnapshot {
        let state = self.state;
        let tail_start = state.storage - state.end_position;

        RangeEncoderSnapshot {
            state,
            front: self.buffer[..state.position].to_vec(),
            tail: self.buffer[tail_start..state.storage].to_vec(),
        }
    }

    /// Rewinds the encoder to a state saved by [`Self::snapshot`].
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot was taken from an encoder with more
    /// storage than this one's buffer.
    pub fn restore(&mut self, snapshot: &RangeEncoderSnapshot) -> Result<()> {
        let state = snapshot.state;
        if state.storage > self.buffer.len() {
            return Err(Error::RangeEncoder(format!(
                "snapshot storage {} exceeds buffer length {}",
                state.storage,
                self.buffer.len()
            )));
        }

        self.state = state;
        self.buffer[..state.position].copy_from_slice(&snapshot.front);
        let tail_start = state.storage - state.end_position;
        self.buffer[tail_start..state.storage].copy_from_slice(&snapshot.tail);

        log::debug!(
            "restore: position={} end_position={} tell={}",
            state.position,
            state.end_position,
            self.ec_tell()
        );

        Ok(())
    }
}
