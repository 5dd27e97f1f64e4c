use moosicbox_opus_range::range::{EC_MAX_RAW_BITS, RangeDecoder, RangeEncoder};
use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;
use test_case::test_case;

/// Builds an inverse CDF table of `size` roughly equiprobable symbols out of
/// `1 << ftb`.
fn uniform_icdf(size: u32, ftb: u32) -> Vec<u16> {
    let ft = 1_u32 << ftb;
    (1..=size)
        .map(|k| u16::try_from(ft - k * ft / size).unwrap())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Icdf(usize),
    Bits(u32, u32),
    Uint(u32, u32),
    Bit(bool, u32),
    Symbol(u32, u32),
}

const OP_ICDF: [u8; 4] = [200, 120, 40, 0];

impl Op {
    fn from_seed(seed: u32) -> Self {
        let rest = seed / 5;
        match seed % 5 {
            0 => Self::Icdf((rest % 4) as usize),
            1 => {
                let bits = rest % (EC_MAX_RAW_BITS + 1);
                let value = rest.wrapping_mul(2_654_435_761) & ((1 << bits) - 1);
                Self::Bits(value, bits)
            }
            2 => {
                let ft = rest % 100_000 + 1;
                Self::Uint((rest / 7) % ft, ft)
            }
            3 => Self::Bit(rest & 0x100 != 0, rest % 16 + 1),
            _ => {
                let ft = rest % 1000 + 1;
                Self::Symbol((rest / 1000) % ft, ft)
            }
        }
    }

    fn encode(self, encoder: &mut RangeEncoder<'_>) {
        match self {
            Self::Icdf(s) => encoder.ec_enc_icdf(s, &OP_ICDF, 8).unwrap(),
            Self::Bits(value, bits) => encoder.ec_enc_bits(value, bits).unwrap(),
            Self::Uint(fl, ft) => encoder.ec_enc_uint(fl, ft).unwrap(),
            Self::Bit(bit, logp) => encoder.ec_enc_bit_logp(bit, logp).unwrap(),
            Self::Symbol(fl, ft) => encoder.ec_encode(fl, fl + 1, ft).unwrap(),
        }
    }

    fn decode(self, decoder: &mut RangeDecoder<'_>) -> Self {
        match self {
            Self::Icdf(_) => Self::Icdf(decoder.ec_dec_icdf(&OP_ICDF, 8).unwrap() as usize),
            Self::Bits(_, bits) => Self::Bits(decoder.ec_dec_bits(bits).unwrap(), bits),
            Self::Uint(_, ft) => Self::Uint(decoder.ec_dec_uint(ft).unwrap(), ft),
            Self::Bit(_, logp) => Self::Bit(decoder.ec_dec_bit_logp(logp).unwrap(), logp),
            Self::Symbol(_, ft) => {
                let fs = decoder.ec_decode(ft).unwrap();
                decoder.ec_dec_update(fs, fs + 1, ft).unwrap();
                Self::Symbol(fs, ft)
            }
        }
    }
}

#[test_case(2 ; "two_symbols")]
#[test_case(3 ; "three_symbols")]
#[test_case(8 ; "eight_symbols")]
#[test_case(17 ; "seventeen_symbols")]
#[test_case(64 ; "sixty_four_symbols")]
fn test_icdf_round_trip_all_indices(size: u32) {
    let icdf_u16 = uniform_icdf(size, 15);
    let icdf_u8: Vec<u8> = uniform_icdf(size, 8)
        .into_iter()
        .map(|entry| u8::try_from(entry).unwrap())
        .collect();

    let mut packet = vec![0_u8; 256];
    let mut encoder = RangeEncoder::new(&mut packet);
    for s in 0..size as usize {
        encoder.ec_enc_icdf(s, &icdf_u8, 8).unwrap();
        encoder.ec_enc_icdf_u16(size as usize - 1 - s, &icdf_u16, 15).unwrap();
    }
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());

    let mut decoder = RangeDecoder::new(&packet);
    for s in 0..size {
        assert_eq!(decoder.ec_dec_icdf(&icdf_u8, 8).unwrap(), s);
        assert_eq!(decoder.ec_dec_icdf_u16(&icdf_u16, 15).unwrap(), size - 1 - s);
    }
    assert!(!decoder.ec_get_error());
}

#[test]
fn test_icdf_round_trip_every_table_size() {
    for size in 2..=64 {
        let icdf = uniform_icdf(size, 15);
        let symbols: Vec<usize> = (0..size as usize).chain((0..size as usize).rev()).collect();

        let mut packet = vec![0_u8; 512];
        let mut encoder = RangeEncoder::new(&mut packet);
        for &s in &symbols {
            encoder.ec_enc_icdf_u16(s, &icdf, 15).unwrap();
        }
        encoder.ec_enc_done();
        assert!(!encoder.ec_get_error(), "size={size}");

        let mut decoder = RangeDecoder::new(&packet);
        for &s in &symbols {
            assert_eq!(decoder.ec_dec_icdf_u16(&icdf, 15).unwrap() as usize, s, "size={size}");
        }
    }
}

#[test]
fn test_skewed_icdf_round_trip() {
    // Symbol 0 takes almost the entire range, symbol 3 a single count.
    let icdf = [3_u8, 2, 1, 0];
    let symbols = [0, 0, 3, 0, 1, 0, 0, 0, 2, 3, 3, 0];

    let mut packet = [0_u8; 32];
    let mut encoder = RangeEncoder::new(&mut packet);
    for s in symbols {
        encoder.ec_enc_icdf(s, &icdf, 8).unwrap();
    }
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());

    let mut decoder = RangeDecoder::new(&packet);
    for s in symbols {
        assert_eq!(decoder.ec_dec_icdf(&icdf, 8).unwrap() as usize, s);
    }
}

#[test]
fn test_raw_bits_round_trip_every_width() {
    let mut packet = vec![0_u8; 64];
    let mut encoder = RangeEncoder::new(&mut packet);
    for bits in 1..=EC_MAX_RAW_BITS {
        let value = 0x0155_5555 & ((1 << bits) - 1);
        encoder.ec_enc_bits(value, bits).unwrap();
    }
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());

    let mut decoder = RangeDecoder::new(&packet);
    for bits in 1..=EC_MAX_RAW_BITS {
        let value = 0x0155_5555 & ((1 << bits) - 1);
        assert_eq!(decoder.ec_dec_bits(bits).unwrap(), value, "bits={bits}");
    }
}

#[test]
fn test_raw_bits_interleaved_with_range_symbols() {
    let icdf = [224_u8, 192, 160, 128, 96, 64, 32, 0];

    let mut packet = vec![0_u8; 128];
    let mut encoder = RangeEncoder::new(&mut packet);
    for bits in 1..=EC_MAX_RAW_BITS {
        encoder.ec_enc_icdf(bits as usize % 8, &icdf, 8).unwrap();
        encoder.ec_enc_bits((1 << bits) - 1, bits).unwrap();
        encoder.ec_enc_bit_logp(bits % 3 == 0, 2).unwrap();
    }
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());

    let mut decoder = RangeDecoder::new(&packet);
    for bits in 1..=EC_MAX_RAW_BITS {
        assert_eq!(decoder.ec_dec_icdf(&icdf, 8).unwrap(), bits % 8);
        assert_eq!(decoder.ec_dec_bits(bits).unwrap(), (1 << bits) - 1);
        assert_eq!(decoder.ec_dec_bit_logp(2).unwrap(), bits % 3 == 0);
    }
    assert!(!decoder.ec_get_error());
}

/// Encodes `values` as uniform integers out of `ft` and decodes them back,
/// `chunk` values per packet.
fn assert_uint_round_trip(values: impl Iterator<Item = u32>, ft: u32, chunk: usize) {
    let values: Vec<u32> = values.collect();
    let mut packet = vec![0_u8; chunk * 4 + 8];

    for values in values.chunks(chunk) {
        let mut encoder = RangeEncoder::new(&mut packet);
        for &value in values {
            encoder.ec_enc_uint(value, ft).unwrap();
        }
        encoder.ec_enc_done();
        assert!(!encoder.ec_get_error());

        let mut decoder = RangeDecoder::new(&packet);
        for &value in values {
            assert_eq!(decoder.ec_dec_uint(ft).unwrap(), value, "ft={ft}");
        }
        assert!(!decoder.ec_get_error());
    }
}

#[test_case(2 ; "one_bit")]
#[test_case(257 ; "just_past_one_byte")]
#[test_case(65_536 ; "sixteen_bits")]
fn test_uint_round_trip_every_value(ft: u32) {
    assert_uint_round_trip(0..ft, ft, 4096);
}

#[test]
fn test_uint_round_trip_every_value_twenty_four_bits() {
    let ft = 16_777_216;
    for start in (0..ft).step_by(1 << 20) {
        assert_uint_round_trip(start..start + (1 << 20), ft, 1 << 16);
    }
}

#[test_case(100_000 ; "not_a_power_of_two")]
#[test_case(u32::MAX ; "widest")]
fn test_uint_round_trip_sampled(ft: u32) {
    let mut values = vec![0, 1, 2, 255, 256, ft / 3, ft / 2, ft - 2, ft - 1];
    values.extend((0..256_u64).map(|i| (i * 2_654_435_761 % u64::from(ft)) as u32));
    assert_uint_round_trip(values.into_iter(), ft, 64);
}

#[test]
fn test_raw_bits_round_trip_every_value() {
    for bits in 1..=EC_MAX_RAW_BITS {
        let count = 1_u32 << bits.min(12);
        let step = (1_u32 << bits) / count;
        let values: Vec<u32> = (0..count).map(|i| i * step + (i % step.max(1))).collect();

        let mut packet = vec![0_u8; (count as usize * bits as usize).div_ceil(8) + 8];
        let mut encoder = RangeEncoder::new(&mut packet);
        for &value in &values {
            encoder.ec_enc_bits(value, bits).unwrap();
        }
        encoder.ec_enc_done();
        assert!(!encoder.ec_get_error(), "bits={bits}");

        let mut decoder = RangeDecoder::new(&packet);
        for &value in &values {
            assert_eq!(decoder.ec_dec_bits(bits).unwrap(), value, "bits={bits}");
        }
    }
}

#[test]
fn test_carry_propagation_decodes_back() {
    let mut packet = [0_u8; 8];
    let mut encoder = RangeEncoder::new(&mut packet);
    encoder.ec_encode_bin(0x25, 0x27, 9).unwrap();
    for _ in 0..3 {
        encoder.ec_encode_bin(0xFF, 0x101, 9).unwrap();
    }
    encoder.ec_encode_bin(180, 181, 8).unwrap();
    encoder.ec_enc_done();
    let final_range = encoder.get_range();

    assert_eq!(packet, [0x13, 0x00, 0x00, 0x00, 0x34, 0x00, 0x00, 0x00]);

    let mut decoder = RangeDecoder::new(&packet);
    let fs = decoder.ec_decode_bin(9).unwrap();
    assert!((0x25..0x27).contains(&fs), "fs={fs:#x}");
    decoder.ec_dec_update(0x25, 0x27, 512).unwrap();
    for _ in 0..3 {
        let fs = decoder.ec_decode_bin(9).unwrap();
        assert!((0xFF..0x101).contains(&fs), "fs={fs:#x}");
        decoder.ec_dec_update(0xFF, 0x101, 512).unwrap();
    }
    assert_eq!(decoder.ec_decode_bin(8).unwrap(), 180);
    decoder.ec_dec_update(180, 181, 256).unwrap();

    assert_eq!(decoder.get_range(), final_range);
}

#[test]
fn test_smallest_interval_in_one_byte_round_trips() {
    let mut packet = [0_u8; 1];
    let mut encoder = RangeEncoder::new(&mut packet);
    encoder.ec_encode(2, 3, 6).unwrap();
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());
    assert_eq!(encoder.ec_range_bytes(), 1);

    let mut decoder = RangeDecoder::new(&packet);
    assert_eq!(decoder.ec_decode(6).unwrap(), 2);
    decoder.ec_dec_update(2, 3, 6).unwrap();
    assert!(!decoder.ec_get_error());
}

#[test]
fn test_hundred_symbols_from_fixed_table() {
    let icdf = [224_u8, 192, 160, 128, 96, 64, 32, 0];
    let symbols: Vec<usize> = (0..100).map(|i| (i * 37 + i / 7) % 8).collect();

    let mut packet = [0_u8; 64];
    let mut encoder = RangeEncoder::new(&mut packet);
    for &s in &symbols {
        encoder.ec_enc_icdf(s, &icdf, 8).unwrap();
    }
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());
    let final_range = encoder.get_range();

    let mut decoder = RangeDecoder::new(&packet);
    for &s in &symbols {
        assert_eq!(decoder.ec_dec_icdf(&icdf, 8).unwrap() as usize, s);
    }
    assert_eq!(decoder.get_range(), final_range);
}

#[test_log::test]
fn test_tell_agrees_between_encoder_and_decoder() {
    let ops: Vec<Op> = (0..200_u32)
        .map(|i| Op::from_seed(i.wrapping_mul(0x9E37_79B9) >> 3))
        .collect();

    let mut packet = vec![0_u8; 2048];
    let mut encoder = RangeEncoder::new(&mut packet);
    let mut tells = vec![(encoder.ec_tell(), encoder.ec_tell_frac())];
    for op in &ops {
        op.encode(&mut encoder);
        tells.push((encoder.ec_tell(), encoder.ec_tell_frac()));
    }
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());

    for window in tells.windows(2) {
        assert!(window[0].0 <= window[1].0);
        assert!(window[0].1 <= window[1].1);
    }

    let mut decoder = RangeDecoder::new(&packet);
    assert_eq!((decoder.ec_tell(), decoder.ec_tell_frac()), tells[0]);
    for (op, &expected) in ops.iter().zip(&tells[1..]) {
        assert_eq!(op.decode(&mut decoder), *op);

        let (tell, tell_frac) = (decoder.ec_tell(), decoder.ec_tell_frac());
        assert_eq!((tell, tell_frac), expected);
        assert!(tell_frac <= tell * 8);
        assert!(tell_frac + 8 > tell * 8);
    }
}

#[test]
fn test_done_twice_leaves_packet_unchanged() {
    let mut packet = [0_u8; 16];
    let mut encoder = RangeEncoder::new(&mut packet);
    encoder.ec_enc_uint(12_345, 50_000).unwrap();
    encoder.ec_enc_bits(0x3, 2).unwrap();
    encoder.ec_enc_done();
    let first = encoder.buffer().to_vec();
    encoder.ec_enc_done();
    assert_eq!(encoder.buffer(), first.as_slice());
}

#[test]
fn test_encode_into_region_of_larger_buffer() {
    let mut buffer = [0xEE_u8; 24];
    let mut encoder = RangeEncoder::new(&mut buffer[4..20]);
    encoder.ec_enc_uint(777, 1000).unwrap();
    encoder.ec_enc_bits(0x1F, 5).unwrap();
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());

    assert_eq!(&buffer[..4], &[0xEE; 4]);
    assert_eq!(&buffer[20..], &[0xEE; 4]);

    let mut decoder = RangeDecoder::new(&buffer[4..20]);
    assert_eq!(decoder.ec_dec_uint(1000).unwrap(), 777);
    assert_eq!(decoder.ec_dec_bits(5).unwrap(), 0x1F);
}

#[test]
fn test_shrunk_packet_decodes() {
    let mut packet = [0_u8; 32];
    let mut encoder = RangeEncoder::new(&mut packet);
    for i in 0..6 {
        encoder.ec_enc_icdf(i % 4, &OP_ICDF, 8).unwrap();
        encoder.ec_enc_bits(0xAB, 8).unwrap();
    }
    encoder.ec_enc_shrink(12).unwrap();
    encoder.ec_enc_done();
    assert!(!encoder.ec_get_error());
    assert_eq!(encoder.storage(), 12);

    let mut decoder = RangeDecoder::new(&packet[..12]);
    for i in 0..6 {
        assert_eq!(decoder.ec_dec_icdf(&OP_ICDF, 8).unwrap() as usize, i % 4);
        assert_eq!(decoder.ec_dec_bits(8).unwrap(), 0xAB);
    }
}

#[test]
fn test_truncated_packet_decodes_without_panicking() {
    let mut packet = vec![0_u8; 64];
    let mut encoder = RangeEncoder::new(&mut packet);
    for i in 0..40 {
        encoder.ec_enc_uint(i * 97 % 1000, 1000).unwrap();
    }
    encoder.ec_enc_done();

    for len in [0, 1, 2, 5] {
        let mut decoder = RangeDecoder::new(&packet[..len]);
        for _ in 0..40 {
            assert!(decoder.ec_dec_uint(1000).unwrap() < 1000);
        }
        assert!(decoder.ec_dec_icdf(&OP_ICDF, 8).unwrap() < 4);
        assert!(decoder.ec_dec_bits(25).unwrap() < 1 << 25);
    }
}

#[test_log::test]
fn test_full_buffer_sets_error_but_keeps_encoding() {
    let mut packet = [0_u8; 4];
    let mut encoder = RangeEncoder::new(&mut packet);
    for i in 0..64 {
        encoder.ec_enc_uint(i, 1 << 20).unwrap();
    }
    encoder.ec_enc_done();

    assert!(encoder.ec_get_error());
    assert!(encoder.ec_range_bytes() <= 4);
}

#[quickcheck]
#[allow(clippy::needless_pass_by_value)]
fn prop_mixed_operations_round_trip(seeds: Vec<u32>) -> bool {
    let ops: Vec<Op> = seeds.iter().take(100).map(|&seed| Op::from_seed(seed)).collect();

    let mut packet = vec![0_u8; 1024];
    let mut encoder = RangeEncoder::new(&mut packet);
    for op in &ops {
        op.encode(&mut encoder);
    }
    encoder.ec_enc_done();
    if encoder.ec_get_error() {
        return false;
    }
    let final_range = encoder.get_range();

    let mut decoder = RangeDecoder::new(&packet);
    ops.iter().all(|&op| op.decode(&mut decoder) == op)
        && decoder.get_range() == final_range
        && !decoder.ec_get_error()
}

#[quickcheck]
#[allow(clippy::needless_pass_by_value)]
fn prop_decoder_accepts_arbitrary_bytes(data: Vec<u8>, fts: Vec<u16>) -> bool {
    let mut decoder = RangeDecoder::new(&data);
    fts.iter().all(|&ft| {
        let ft = u32::from(ft) + 1;
        let value = decoder.ec_dec_uint(ft).unwrap();
        let tell_ok = decoder.ec_tell_frac() <= decoder.ec_tell() * 8;
        value < ft && tell_ok
    })
}
