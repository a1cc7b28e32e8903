//! Audio transcoding between the telephony and LLM wire formats.
//!
//! The telephony peer speaks ITU-T G.711 μ-law, 8 kHz mono. The LLM realtime
//! API speaks PCM 16-bit signed little-endian at 24 kHz. Every function in
//! this module is pure and stateless: no buffering, no windowing beyond the
//! caller's frame. Empty input yields empty output.
//!
//! Lookup tables are computed at compile time so the per-frame hot path does
//! no allocation beyond the output buffer.

/// μ-law bias applied before segment classification.
const BIAS: i32 = 0x84;

/// Maximum input magnitude accepted by the encoder; larger values clip.
const CLIP: i32 = 32_635;

/// Segment upper bounds for the eight μ-law exponent classes, applied to the
/// biased magnitude.
const SEG_END: [i32; 8] = [0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF, 0x3FFF, 0x7FFF];

/// Decode a single μ-law code point to a linear sample.
const fn ulaw_to_linear(code: u8) -> i16 {
    let u = !code;
    let mut t = (((u & 0x0F) as i32) << 3) + BIAS;
    t <<= ((u >> 4) & 0x07) as i32;
    if u & 0x80 != 0 {
        (BIAS - t) as i16
    } else {
        (t - BIAS) as i16
    }
}

/// 256-entry μ-law decode table, one linear value per code point.
const ULAW_DECODE: [i16; 256] = {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ulaw_to_linear(i as u8);
        i += 1;
    }
    table
};

/// Decode G.711 μ-law bytes to linear PCM16 samples.
pub fn decode_mulaw(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ULAW_DECODE[b as usize]).collect()
}

/// Encode linear PCM16 samples as G.711 μ-law bytes.
///
/// Input magnitude is clipped at 32 635; the exponent is found by searching
/// the eight segment bounds on the biased magnitude.
pub fn encode_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_ulaw(s)).collect()
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    // Biased magnitude is at most 0x7FFF, so a segment is always found.
    let mut segment = 0;
    while SEG_END[segment] < magnitude {
        segment += 1;
    }

    let mantissa = (magnitude >> (segment + 3)) & 0x0F;
    !((sign | ((segment as i32) << 4) | mantissa) as u8)
}

/// Upsample 8 kHz samples to 24 kHz by linear interpolation.
///
/// Each source sample `s[i]` (except the last) expands to the triple
/// `(s[i], round((2*s[i] + s[i+1]) / 3), round((s[i] + 2*s[i+1]) / 3))`;
/// the final sample is repeated three times.
pub fn upsample_8k_to_24k(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for i in 0..samples.len() {
        let s0 = samples[i] as i32;
        if i + 1 < samples.len() {
            let s1 = samples[i + 1] as i32;
            out.push(samples[i]);
            out.push(round_third(2 * s0 + s1));
            out.push(round_third(s0 + 2 * s1));
        } else {
            out.push(samples[i]);
            out.push(samples[i]);
            out.push(samples[i]);
        }
    }
    out
}

/// Downsample 24 kHz samples to 8 kHz by decimation: every third sample
/// starting at index 0. A trailing remainder shorter than 3 is discarded.
pub fn downsample_24k_to_8k(samples: &[i16]) -> Vec<i16> {
    samples.iter().step_by(3).copied().collect()
}

/// round(n / 3) to the nearest integer.
fn round_third(n: i32) -> i16 {
    let q = if n >= 0 { (n + 1) / 3 } else { -((-n + 1) / 3) };
    q as i16
}

/// Serialize PCM16 samples as little-endian bytes, the order the LLM
/// consumes regardless of host byte order.
pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Parse little-endian bytes into PCM16 samples. A trailing odd byte is
/// dropped.
pub fn le_bytes_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_encodes_to_ff() {
        assert_eq!(encode_mulaw(&[0]), vec![0xFF]);
        assert_eq!(decode_mulaw(&[0xFF]), vec![0]);
    }

    #[test]
    fn encode_decode_is_identity_on_mulaw_alphabet() {
        for b in 0u16..=255 {
            let b = b as u8;
            // 0x7F is negative zero: it decodes to 0, which re-encodes as
            // the positive-zero code 0xFF.
            if b == 0x7F {
                continue;
            }
            let decoded = decode_mulaw(&[b]);
            let reencoded = encode_mulaw(&decoded);
            assert_eq!(reencoded, vec![b], "byte {b:#04x} did not round-trip");
        }
        assert_eq!(encode_mulaw(&decode_mulaw(&[0x7F])), vec![0xFF]);
    }

    #[test]
    fn decode_is_odd_symmetric() {
        // Flipping the sign bit of the complemented code negates the sample.
        for b in 0u8..0x80 {
            let pos = decode_mulaw(&[!b])[0] as i32;
            let neg = decode_mulaw(&[!(b | 0x80)])[0] as i32;
            assert_eq!(pos, -neg);
        }
    }

    #[test]
    fn quantization_error_is_bounded() {
        // One μ-law step at |x| is at most 2^(e+4); a much looser uniform
        // bound suffices to catch structural mistakes.
        for x in (-32000i32..32000).step_by(97) {
            let x = x as i16;
            let y = decode_mulaw(&encode_mulaw(&[x]))[0] as i32;
            assert!((y - x as i32).abs() <= 1024, "x={x} decoded to {y}");
        }
    }

    #[test]
    fn clip_applies_above_threshold() {
        let top = encode_mulaw(&[32_635]);
        assert_eq!(encode_mulaw(&[32_700]), top);
        assert_eq!(encode_mulaw(&[i16::MAX]), top);
        let bottom = encode_mulaw(&[-32_635]);
        assert_eq!(encode_mulaw(&[i16::MIN]), bottom);
    }

    #[test]
    fn upsample_triples_length() {
        assert_eq!(upsample_8k_to_24k(&[100, 200]).len(), 6);
        assert_eq!(upsample_8k_to_24k(&[5]), vec![5, 5, 5]);
    }

    #[test]
    fn upsample_interpolates_between_neighbors() {
        let out = upsample_8k_to_24k(&[0, 300]);
        assert_eq!(out, vec![0, 100, 200, 300, 300, 300]);
    }

    #[test]
    fn upsample_rounds_interpolants() {
        // (2*0 + 100)/3 = 33.33 -> 33, (0 + 2*100)/3 = 66.67 -> 67
        let out = upsample_8k_to_24k(&[0, 100]);
        assert_eq!(out, vec![0, 33, 67, 100, 100, 100]);
    }

    #[test]
    fn downsample_takes_every_third() {
        assert_eq!(downsample_24k_to_8k(&[1, 2, 3, 4, 5, 6]), vec![1, 4]);
        // Trailing remainder below a full group is discarded.
        assert_eq!(downsample_24k_to_8k(&[1, 2, 3, 4]), vec![1, 4]);
        assert_eq!(downsample_24k_to_8k(&[9, 9]), vec![9]);
    }

    #[test]
    fn downsample_inverts_upsample() {
        let original: Vec<i16> = (-50..50).map(|n| (n * 331) as i16).collect();
        let round_trip = downsample_24k_to_8k(&upsample_8k_to_24k(&original));
        assert_eq!(round_trip, original);
    }

    #[test]
    fn constant_signal_survives_resampling() {
        let constant = vec![1234i16; 160];
        let up = upsample_8k_to_24k(&constant);
        assert!(up.iter().all(|&s| s == 1234));
        assert_eq!(downsample_24k_to_8k(&up), constant);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(decode_mulaw(&[]).is_empty());
        assert!(encode_mulaw(&[]).is_empty());
        assert!(upsample_8k_to_24k(&[]).is_empty());
        assert!(downsample_24k_to_8k(&[]).is_empty());
        assert!(pcm_to_le_bytes(&[]).is_empty());
        assert!(le_bytes_to_pcm(&[]).is_empty());
    }

    #[test]
    fn pcm_bytes_are_little_endian() {
        assert_eq!(pcm_to_le_bytes(&[0x0102]), vec![0x02, 0x01]);
        assert_eq!(pcm_to_le_bytes(&[-2]), vec![0xFE, 0xFF]);
        assert_eq!(le_bytes_to_pcm(&[0x02, 0x01]), vec![0x0102]);
        // Odd trailing byte is dropped.
        assert_eq!(le_bytes_to_pcm(&[0x02, 0x01, 0x55]), vec![0x0102]);
    }

    #[test]
    fn telephony_frame_transcodes_to_llm_frame() {
        // A 20 ms telephony frame is 160 μ-law bytes; toward the LLM that is
        // 480 samples of PCM16 at 24 kHz, i.e. 960 bytes.
        let frame = vec![0xFFu8; 160];
        let pcm = upsample_8k_to_24k(&decode_mulaw(&frame));
        assert_eq!(pcm.len(), 480);
        assert_eq!(pcm_to_le_bytes(&pcm).len(), 960);
    }
}
