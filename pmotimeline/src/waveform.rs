//! Rendu de waveform : pics min/max par bucket.
//!
//! Le rendu mixe les canaux en mono puis émet, par bucket de frames, une
//! paire `(min, max)` en i16 little-endian. Assez compact pour être persisté
//! tel quel sous la clé `<prefix>-wave-<id>` et redessiné à n'importe quel
//! zoom raisonnable.

use pmopcm::{convert, StreamSpec};

/// Rend les pics d'un buffer brut entrelacé. Retourne 4 octets par bucket.
pub fn render_peaks(data: &[u8], spec: &StreamSpec, bucket_frames: usize) -> Vec<u8> {
    if data.is_empty() || bucket_frames == 0 {
        return Vec::new();
    }
    let channels = spec.channels as usize;
    let Ok(samples) = convert::bytes_to_f64_samples(data, spec.format.kind()) else {
        return Vec::new();
    };
    let frames = samples.len() / channels;

    let mut out = Vec::with_capacity((frames / bucket_frames + 1) * 4);
    let mut frame = 0;
    while frame < frames {
        let end = (frame + bucket_frames).min(frames);
        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        for f in frame..end {
            let mut acc = 0.0;
            for ch in 0..channels {
                acc += samples[f * channels + ch];
            }
            let mono = acc / channels as f64;
            lo = lo.min(mono);
            hi = hi.max(mono);
        }
        out.extend_from_slice(&quantize_peak(lo).to_le_bytes());
        out.extend_from_slice(&quantize_peak(hi).to_le_bytes());
        frame = end;
    }
    out
}

fn quantize_peak(value: f64) -> i16 {
    (value * 32_767.0).round().clamp(-32_768.0, 32_767.0) as i16
}
