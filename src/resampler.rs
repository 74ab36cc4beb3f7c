// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Linear-interpolation sample-rate conversion between the 8 kHz radio
//! line and 16 kHz Zello leg. Not anti-aliased by design — at a 2x ratio
//! linear interpolation is adequate for voice intelligibility and is much
//! cheaper than a proper polyphase resampler.

/// Resample `input` from `in_rate` Hz to `out_rate` Hz using linear
/// interpolation. Output length is `floor(len * out_rate / in_rate)`.
#[must_use]
pub fn resample(input: &[i16], in_rate: u32, out_rate: u32) -> Vec<i16> {
    if in_rate == out_rate || input.is_empty() {
        return input.to_vec();
    }

    let len = input.len();
    let out_len = (len as u64 * u64::from(out_rate) / u64::from(in_rate)) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let p = f64::from(i as u32) * f64::from(in_rate) / f64::from(out_rate);
        let floor = p.floor() as usize;
        let frac = p - p.floor();

        let sample = if floor + 1 >= len {
            f64::from(input[floor.min(len - 1)])
        } else {
            let a = f64::from(input[floor]);
            let b = f64::from(input[floor + 1]);
            (1.0 - frac) * a + frac * b
        };

        out.push(sample.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16);
    }

    out
}

/// Upsample 8 kHz radio PCM to 16 kHz for the Zello leg.
#[must_use]
pub fn upsample_8k_to_16k(input: &[i16]) -> Vec<i16> {
    resample(input, 8000, 16000)
}

/// Downsample 16 kHz Zello PCM to 8 kHz for the radio leg.
#[must_use]
pub fn downsample_16k_to_8k(input: &[i16]) -> Vec<i16> {
    resample(input, 16000, 8000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_at_equal_rates() {
        let samples: Vec<i16> = (0..200).map(|i| (i * 37) as i16).collect();
        assert_eq!(resample(&samples, 8000, 8000), samples);
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn length_matches_formula() {
        let samples = vec![0i16; 160];
        assert_eq!(resample(&samples, 8000, 16000).len(), 320);

        let samples = vec![0i16; 960];
        assert_eq!(resample(&samples, 16000, 8000).len(), 480);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(resample(&[], 8000, 16000).is_empty());
    }

    #[test]
    fn upsample_roundtrip_preserves_constant_signal() {
        let samples = vec![1000i16; 160];
        let up = upsample_8k_to_16k(&samples);
        assert_eq!(up.len(), 320);
        assert!(up.iter().all(|&s| (s - 1000).abs() <= 1));
    }

    #[test]
    fn last_sample_does_not_read_past_end() {
        let samples = vec![5i16, 10, 15];
        // out_rate > in_rate pushes some source positions to the last index
        let out = resample(&samples, 8000, 16000);
        assert_eq!(out.len(), 6);
    }
}
