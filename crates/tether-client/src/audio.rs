//! Ogg Opus inspection for outgoing voice notes.
//!
//! The platform renders voice messages with a duration and a 64-byte
//! amplitude envelope. Instead of decoding Opus frames, the duration is
//! read from the container's granule positions and the envelope is
//! synthesized deterministically from it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Envelope length the platform expects for voice messages.
pub const WAVEFORM_LEN: usize = 64;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const MAX_DURATION_SECS: u32 = 300;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("not a valid Ogg file (missing OggS signature)")]
    NotOgg,
}

/// Extract the duration of an Ogg Opus buffer and synthesize its
/// waveform envelope.
pub fn analyze_ogg_opus(data: &[u8]) -> Result<(u32, [u8; WAVEFORM_LEN]), AudioError> {
    if data.len() < 4 || &data[0..4] != b"OggS" {
        return Err(AudioError::NotOgg);
    }

    let mut last_granule: u64 = 0;
    let mut sample_rate = DEFAULT_SAMPLE_RATE;
    let mut pre_skip: u16 = 0;
    let mut found_opus_head = false;

    let mut i = 0;
    while i + 27 < data.len() {
        if &data[i..i + 4] != b"OggS" {
            i += 1;
            continue;
        }

        let granule_pos = u64_le(&data[i + 6..i + 14]);
        let page_seq = u32_le(&data[i + 18..i + 22]);
        let num_segments = data[i + 26] as usize;

        if i + 27 + num_segments >= data.len() {
            break;
        }
        let segment_table = &data[i + 27..i + 27 + num_segments];
        let page_size = 27 + num_segments + segment_table.iter().map(|&l| l as usize).sum::<usize>();

        // OpusHead lives in one of the first pages and carries the
        // pre-skip and sample rate needed for the duration formula.
        if !found_opus_head && page_seq <= 1 {
            let page_end = (i + page_size).min(data.len());
            let page = &data[i..page_end];
            if let Some(head) = find(page, b"OpusHead") {
                // Past the magic: version(1), channels(1), pre-skip(2),
                // sample rate(4).
                let fields = head + 8;
                if fields + 8 <= page.len() {
                    pre_skip = u16_le(&page[fields + 2..fields + 4]);
                    sample_rate = u32_le(&page[fields + 4..fields + 8]);
                    found_opus_head = true;
                }
            }
        }

        if granule_pos != 0 {
            last_granule = granule_pos;
        }

        i += page_size;
    }

    let duration = if last_granule > 0 {
        let samples = last_granule.saturating_sub(pre_skip as u64);
        (samples as f64 / sample_rate as f64).ceil() as u32
    } else {
        // No usable granule position; fall back to a size-based guess.
        (data.len() as f64 / 2000.0) as u32
    };
    let duration = duration.clamp(1, MAX_DURATION_SECS);

    Ok((duration, placeholder_waveform(duration)))
}

/// Synthetic envelope for voice messages: layered sine waves with seeded
/// jitter and a fade at both ends, stable for a given duration.
fn placeholder_waveform(duration: u32) -> [u8; WAVEFORM_LEN] {
    let mut waveform = [0u8; WAVEFORM_LEN];
    let mut rng = StdRng::seed_from_u64(duration as u64);

    let base_amplitude = 35.0;
    let frequency_factor = f64::from(duration.min(120)) / 30.0;

    for (i, slot) in waveform.iter_mut().enumerate() {
        let pos = i as f64 / WAVEFORM_LEN as f64;

        let mut val = base_amplitude * (pos * std::f64::consts::PI * frequency_factor * 8.0).sin();
        val += (base_amplitude / 2.0) * (pos * std::f64::consts::PI * frequency_factor * 16.0).sin();
        val += (rng.gen::<f64>() - 0.5) * 15.0;

        let fade = (pos * std::f64::consts::PI).sin();
        val *= 0.7 + 0.3 * fade;

        // Center on the typical voice baseline.
        val += 50.0;

        *slot = val.clamp(0.0, 100.0) as u8;
    }

    waveform
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn u16_le(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn u64_le(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal single-page Ogg stream carrying an OpusHead packet and a
    /// final granule position.
    fn ogg_fixture(granule: u64, sample_rate: u32, pre_skip: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"OpusHead");
        body.push(1); // version
        body.push(1); // channels
        body.extend_from_slice(&pre_skip.to_le_bytes());
        body.extend_from_slice(&sample_rate.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]); // output gain + mapping

        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.push(0); // version
        page.push(0); // header type
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&[0u8; 4]); // serial
        page.extend_from_slice(&0u32.to_le_bytes()); // page sequence
        page.extend_from_slice(&[0u8; 4]); // checksum
        page.push(1); // one segment
        page.push(body.len() as u8);
        page.extend_from_slice(&body);
        // Trailing page so the parser sees a complete segment table.
        page.extend_from_slice(&[0u8; 32]);
        page
    }

    #[test]
    fn rejects_non_ogg_input() {
        assert!(matches!(analyze_ogg_opus(b"RIFF1234"), Err(AudioError::NotOgg)));
        assert!(matches!(analyze_ogg_opus(b""), Err(AudioError::NotOgg)));
    }

    #[test]
    fn duration_from_granule_position() {
        // 10 seconds of 48 kHz samples.
        let data = ogg_fixture(480_000, 48_000, 0);
        let (duration, waveform) = analyze_ogg_opus(&data).unwrap();
        assert_eq!(duration, 10);
        assert_eq!(waveform.len(), WAVEFORM_LEN);
    }

    #[test]
    fn pre_skip_is_subtracted() {
        // One second plus a pre-skip that rounds the duration up without it.
        let data = ogg_fixture(48_000 + 312, 48_000, 312);
        let (duration, _) = analyze_ogg_opus(&data).unwrap();
        assert_eq!(duration, 1);
    }

    #[test]
    fn duration_is_clamped() {
        let data = ogg_fixture(48_000 * 1000, 48_000, 0);
        let (duration, _) = analyze_ogg_opus(&data).unwrap();
        assert_eq!(duration, MAX_DURATION_SECS);
    }

    #[test]
    fn waveform_is_deterministic_and_bounded() {
        let a = placeholder_waveform(30);
        let b = placeholder_waveform(30);
        assert_eq!(a, b);
        assert_ne!(a, placeholder_waveform(31));
        assert!(a.iter().all(|&v| v <= 100));
        // The envelope is not flat.
        assert!(a.iter().any(|&v| v != a[0]));
    }
}
