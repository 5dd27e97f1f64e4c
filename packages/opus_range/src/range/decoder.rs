use crate::error::{Error, Result};
use crate::util::ilog;

use super::{
    EC_CODE_BITS, EC_CODE_BOT, EC_CODE_EXTRA, EC_CODE_TOP, EC_MAX_FT, EC_MAX_FTB, EC_MAX_RAW_BITS,
    EC_SYM_BITS, EC_SYM_MAX, EC_UINT_BITS, tell, tell_frac,
};

/// Range decoder for entropy decoding in Opus packets.
///
/// Implements the range decoder specified in RFC 6716 Section 4.1. The range decoder
/// maintains an internal state consisting of a value and range, and provides methods
/// for decoding symbols from compressed bitstreams using arithmetic coding.
///
/// The decoder reads from the beginning of the buffer for range-coded symbols and
/// from the end of the buffer for raw bits. Reads past either end of the buffer
/// yield zero bytes, so every call returns a value even for a truncated or empty
/// packet. Rejecting such packets is left to the framing layer.
///
/// # Examples
///
/// ```rust
/// # use moosicbox_opus_range::range::RangeDecoder;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let packet = vec![0x80, 0x00, 0x00, 0x00];
/// let mut decoder = RangeDecoder::new(&packet);
///
/// // Decode a bit with 50% probability
/// let bit = decoder.ec_dec_bit_logp(1)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RangeDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
    end_position: usize,
    end_window: u32,
    end_bits_available: u32,
    total_bits: u32,
    range: u32,
    value: u32,
    ext: u32,
    last_byte: u8,
    error: bool,
}

impl<'a> RangeDecoder<'a> {
    /// Creates a new range decoder over `data` and initializes it per RFC 6716 Section 4.1.1.
    ///
    /// The decoder borrows `data` for its whole lifetime. An empty buffer is
    /// accepted and decodes as if it were all zero bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            buffer: data,
            position: 0,
            end_position: 0,
            end_window: 0,
            end_bits_available: 0,
            total_bits: EC_CODE_BITS + 1
                - ((EC_CODE_BITS - EC_CODE_EXTRA) / EC_SYM_BITS) * EC_SYM_BITS,
            range: 1 << EC_CODE_EXTRA,
            value: 0,
            ext: 0,
            last_byte: 0,
            error: false,
        };

        decoder.last_byte = decoder.read_byte();
        decoder.value =
            decoder.range - 1 - u32::from(decoder.last_byte >> (EC_SYM_BITS - EC_CODE_EXTRA));
        decoder.normalize();

        decoder
    }

    fn normalize(&mut self) {
        while self.range <= EC_CODE_BOT {
            self.total_bits += EC_SYM_BITS;
            self.range <<= EC_SYM_BITS;

            // The low bit of the previous byte belongs to this symbol.
            let previous = u32::from(self.last_byte);
            self.last_byte = self.read_byte();
            let sym = ((previous << EC_SYM_BITS) | u32::from(self.last_byte))
                >> (EC_SYM_BITS - EC_CODE_EXTRA);

            self.value =
                ((self.value << EC_SYM_BITS) + (EC_SYM_MAX & !sym)) & (EC_CODE_TOP - 1);
        }
    }

    fn read_byte(&mut self) -> u8 {
        if self.position < self.buffer.len() {
            let byte = self.buffer[self.position];
            self.position += 1;
            byte
        } else {
            0
        }
    }

    fn read_byte_from_end(&mut self) -> u8 {
        if self.end_position < self.buffer.len() {
            self.end_position += 1;
            self.buffer[self.buffer.len() - self.end_position]
        } else {
            0
        }
    }

    /// Decodes a symbol with cumulative frequency `ft` per RFC 6716 Section 4.1.2.
    ///
    /// Returns a value `fs` in `[0, ft)`. The caller locates the symbol whose
    /// interval `[fl, fh)` contains `fs` and must then call
    /// [`Self::ec_dec_update`] with the same `ft`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ft` is zero or larger than `2^16`.
    pub fn ec_decode(&mut self, ft: u32) -> Result<u32> {
        if ft == 0 || ft > EC_MAX_FT {
            return Err(Error::RangeDecoder(format!(
                "ft must be in 1..={EC_MAX_FT}, got {ft}"
            )));
        }

        self.ext = self.range / ft;
        let s = self.value / self.ext;
        Ok(ft - (s + 1).min(ft))
    }

    /// Decodes a binary symbol per RFC 6716 Section 4.1.3.1.
    ///
    /// Equivalent to `ec_decode()` with `ft = 1 << ftb`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ftb > 16`.
    pub fn ec_decode_bin(&mut self, ftb: u32) -> Result<u32> {
        if ftb > EC_MAX_FTB {
            return Err(Error::RangeDecoder(format!(
                "ftb must be at most {EC_MAX_FTB}, got {ftb}"
            )));
        }

        let ft = 1_u32 << ftb;
        self.ext = self.range >> ftb;
        let s = self.value / self.ext;
        Ok(ft - (s + 1).min(ft))
    }

    /// Updates decoder state after decoding a symbol per RFC 6716 Section 4.1.2.
    ///
    /// `[fl, fh)` is the interval of the decoded symbol out of `ft`. Uses the
    /// divisor cached by the preceding [`Self::ec_decode`] or
    /// [`Self::ec_decode_bin`] call, so `ft` must match that call. A mismatch
    /// that still yields a usable interval is not detected and desynchronizes
    /// the stream.
    ///
    /// # Errors
    ///
    /// * Unless `fl < fh <= ft`
    /// * If no symbol has been decoded yet
    /// * If the interval cannot contain the decoded value
    pub fn ec_dec_update(&mut self, fl: u32, fh: u32, ft: u32) -> Result<()> {
        if fl >= fh || fh > ft {
            return Err(Error::RangeDecoder(format!(
                "invalid interval [{fl}, {fh}) for ft {ft}"
            )));
        }
        if self.ext == 0 {
            return Err(Error::RangeDecoder(
                "ec_dec_update called before ec_decode".to_string(),
            ));
        }

        let s = u64::from(self.ext) * u64::from(ft - fh);
        let range = if fl > 0 {
            u64::from(self.ext) * u64::from(fh - fl)
        } else {
            u64::from(self.range).saturating_sub(s)
        };

        let value = u64::from(self.value);
        if s > value || value - s >= range || range > u64::from(self.range) {
            return Err(Error::RangeDecoder(format!(
                "interval [{fl}, {fh}) of {ft} does not contain the decoded symbol"
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            self.value -= s as u32;
            self.range = range as u32;
        }

        self.normalize();

        Ok(())
    }

    /// Decodes a single bit with probability `1/(1<<logp)` of being one per RFC 6716 Section 4.1.3.2.
    ///
    /// # Errors
    ///
    /// Returns an error if `logp` is not in `1..=16`.
    pub fn ec_dec_bit_logp(&mut self, logp: u32) -> Result<bool> {
        if logp == 0 || logp > EC_MAX_FTB {
            return Err(Error::RangeDecoder(format!(
                "logp must be in 1..={EC_MAX_FTB}, got {logp}"
            )));
        }

        let s = self.range >> logp;
        let bit = self.value < s;

        if bit {
            self.range = s;
        } else {
            self.value -= s;
            self.range -= s;
        }

        self.normalize();

        Ok(bit)
    }

    /// Decodes a symbol using an inverse CDF table per RFC 6716 Section 4.1.3.3.
    ///
    /// `icdf[k]` is `2^ftb` minus the cumulative frequency up to and including
    /// symbol `k`. ICDF tables MUST be terminated with a value of 0 (where
    /// `fh[k] == ft`), which guarantees the search stops inside the table.
    ///
    /// # Errors
    ///
    /// Returns an error if `ftb > 16` or the table is not terminated by 0.
    pub fn ec_dec_icdf(&mut self, icdf: &[u8], ftb: u32) -> Result<u32> {
        self.dec_icdf(icdf.iter().copied().map(u32::from), ftb)
    }

    /// Decodes a symbol using a 16-bit ICDF table (for high-precision PDFs).
    ///
    /// Same as [`Self::ec_dec_icdf`], for distributions whose total does not
    /// fit the 8-bit table entries.
    ///
    /// # Errors
    ///
    /// Returns an error if `ftb > 16` or the table is not terminated by 0.
    pub fn ec_dec_icdf_u16(&mut self, icdf: &[u16], ftb: u32) -> Result<u32> {
        self.dec_icdf(icdf.iter().copied().map(u32::from), ftb)
    }

    fn dec_icdf(&mut self, icdf: impl Iterator<Item = u32>, ftb: u32) -> Result<u32> {
        if ftb > EC_MAX_FTB {
            return Err(Error::RangeDecoder(format!(
                "ftb must be at most {EC_MAX_FTB}, got {ftb}"
            )));
        }

        let r = self.range >> ftb;
        let mut t = self.range;

        // Find the first k where value >= r * icdf[k]
        for (k, entry) in icdf.enumerate() {
            let s = r.wrapping_mul(entry);

            if self.value >= s {
                log::trace!(
                    "ec_dec_icdf: symbol={k} range={} value={} new_range={} new_value={}",
                    self.range,
                    self.value,
                    t - s,
                    self.value - s
                );

                self.value -= s;
                self.range = t - s;
                self.normalize();

                #[allow(clippy::cast_possible_truncation)]
                return Ok(k as u32);
            }

            t = s;
        }

        Err(Error::RangeDecoder(
            "icdf table must be terminated by 0".to_string(),
        ))
    }

    /// Extracts raw bits from the end of the frame per RFC 6716 Section 4.1.4.
    ///
    /// Reads bits backwards from the end of the buffer, least significant bit
    /// first, independent of range coder state.
    ///
    /// # Errors
    ///
    /// Returns an error if `bits > 25` (RFC limit).
    pub fn ec_dec_bits(&mut self, bits: u32) -> Result<u32> {
        if bits > EC_MAX_RAW_BITS {
            return Err(Error::RangeDecoder(format!(
                "cannot decode more than {EC_MAX_RAW_BITS} bits at once"
            )));
        }

        if bits == 0 {
            return Ok(0);
        }

        while self.end_bits_available < bits {
            let byte = self.read_byte_from_end();
            log::trace!(
                "ec_dec_bits: refill byte={byte:#04x} end_position={}",
                self.end_position
            );
            self.end_window |= u32::from(byte) << self.end_bits_available;
            self.end_bits_available += EC_SYM_BITS;
        }

        let mask = (1_u32 << bits) - 1;
        let result = self.end_window & mask;

        self.end_window >>= bits;
        self.end_bits_available -= bits;
        self.total_bits += bits;

        Ok(result)
    }

    /// Decodes a uniformly distributed integer in range `[0, ft)` per RFC 6716 Section 4.1.5.
    ///
    /// For `ft - 1` wider than 8 bits, the top 8 bits go through the range
    /// coder and the rest are raw bits. A decoded value outside `[0, ft)` can
    /// only come from a corrupt frame: the decoder then sets its error flag
    /// (see [`Self::ec_get_error`]) and returns `ft - 1`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ft == 0`.
    pub fn ec_dec_uint(&mut self, ft: u32) -> Result<u32> {
        if ft == 0 {
            return Err(Error::RangeDecoder("ft must be positive".to_string()));
        }

        let ftb = ilog(ft - 1);

        if ftb <= EC_UINT_BITS {
            let t = self.ec_decode(ft)?;
            self.ec_dec_update(t, t + 1, ft)?;
            return Ok(t);
        }

        let low_bits = ftb - EC_UINT_BITS;
        let ft_high = ((ft - 1) >> low_bits) + 1;
        let t_high = self.ec_decode(ft_high)?;
        self.ec_dec_update(t_high, t_high + 1, ft_high)?;

        let t = (t_high << low_bits) | self.ec_dec_bits(low_bits)?;

        if t >= ft {
            log::warn!("ec_dec_uint: decoded value {t} >= ft {ft}, frame corrupt");
            self.error = true;
            return Ok(ft - 1);
        }

        Ok(t)
    }

    /// Returns the number of whole bits decoded so far.
    ///
    /// This is rounded up, so it may be slightly more than the information
    /// actually consumed. It matches [`RangeEncoder::ec_tell`](super::RangeEncoder::ec_tell)
    /// at the same point of the stream.
    #[must_use]
    pub const fn ec_tell(&self) -> u32 {
        tell(self.total_bits, self.range)
    }

    /// Returns the number of bits decoded with fractional precision.
    ///
    /// This provides a more accurate estimate than `ec_tell()` by using
    /// fractional bits (8ths of a bit). The result is in units of 1/8 bit.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use moosicbox_opus_range::range::RangeDecoder;
    /// let packet = vec![0x80, 0x00, 0x00, 0x00];
    /// let decoder = RangeDecoder::new(&packet);
    ///
    /// let bits_frac = decoder.ec_tell_frac(); // In 1/8 bit units
    /// let bits_whole = decoder.ec_tell();
    /// assert!(bits_frac <= bits_whole * 8);
    /// ```
    #[must_use]
    pub fn ec_tell_frac(&self) -> u32 {
        tell_frac(self.total_bits, self.range)
    }

    /// Returns the current range value.
    ///
    /// This is the current size of the coding interval. The range is maintained
    /// above 2^23 through normalization. After the last symbol of a packet it is
    /// the final range used for conformance checks, and equals the encoder's.
    #[must_use]
    pub const fn get_range(&self) -> u32 {
        self.range
    }

    /// Returns the current value.
    ///
    /// This represents the distance from the top of the coding interval to the
    /// point described by the bits read so far.
    #[must_use]
    pub const fn get_value(&self) -> u32 {
        self.value
    }

    /// Returns the current read position in the buffer.
    ///
    /// This is the byte offset for forward reading (range-coded symbols).
    /// Does not include bytes read from the end for raw bits.
    #[must_use]
    pub const fn get_position(&self) -> usize {
        self.position
    }

    /// Returns the number of bytes read from the end of the buffer for raw bits.
    #[must_use]
    pub const fn get_end_position(&self) -> usize {
        self.end_position
    }

    /// Returns the number of range-coded bytes consumed so far.
    #[must_use]
    pub const fn ec_range_bytes(&self) -> usize {
        self.position
    }

    /// Returns `true` if the decoder hit a value that cannot come from a valid
    /// stream.
    #[must_use]
    pub const fn ec_get_error(&self) -> bool {
        self.error
    }
}
