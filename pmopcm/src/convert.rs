//! Conversions d'échantillons PCM.
//!
//! Passerelles octets ↔ échantillons i32 (sign-étendus selon l'encodage),
//! réordonnancement interleavé ↔ planar, et requantification d'un format
//! vers un autre en passant par un f64 normalisé [-1.0, 1.0].

use bytes::Bytes;

use crate::{PcmChunk, PcmError, SampleFormat, SampleKind, StreamSpec};

/// Décode des octets little-endian en échantillons i32 entrelacés.
///
/// Les encodages 16 et 24 bits sont sign-étendus sur 32 bits, comme dans le
/// reste de la chaîne. `F32` n'a pas de représentation i32 exacte et est
/// refusé.
pub fn bytes_to_i32_samples(data: &[u8], kind: SampleKind) -> Result<Vec<i32>, PcmError> {
    if kind.is_float() {
        return Err(PcmError::UnsupportedFormat(
            "float samples have no exact i32 representation".into(),
        ));
    }
    let bytes_per = kind.bytes_per_sample();
    if data.len() % bytes_per != 0 {
        return Err(PcmError::Misaligned {
            len: data.len(),
            expected: bytes_per,
        });
    }

    let mut samples = Vec::with_capacity(data.len() / bytes_per);
    match kind {
        SampleKind::I16 => {
            for pair in data.chunks_exact(2) {
                samples.push(i16::from_le_bytes([pair[0], pair[1]]) as i32);
            }
        }
        SampleKind::I24 => {
            for quad in data.chunks_exact(4) {
                let raw = i32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
                samples.push((raw << 8) >> 8);
            }
        }
        SampleKind::I32 => {
            for quad in data.chunks_exact(4) {
                samples.push(i32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]));
            }
        }
        SampleKind::F32 => unreachable!(),
    }
    Ok(samples)
}

/// Encode des échantillons i32 entrelacés vers des octets little-endian.
pub fn i32_samples_to_bytes(samples: &[i32], kind: SampleKind) -> Result<Vec<u8>, PcmError> {
    if kind.is_float() {
        return Err(PcmError::UnsupportedFormat(
            "float samples have no exact i32 representation".into(),
        ));
    }
    let mut out = Vec::with_capacity(samples.len() * kind.bytes_per_sample());
    match kind {
        SampleKind::I16 => {
            for &s in samples {
                out.extend_from_slice(&(s as i16).to_le_bytes());
            }
        }
        SampleKind::I24 => {
            for &s in samples {
                let clipped = (s << 8) >> 8;
                out.extend_from_slice(&clipped.to_le_bytes());
            }
        }
        SampleKind::I32 => {
            for &s in samples {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        SampleKind::F32 => unreachable!(),
    }
    Ok(out)
}

/// Réordonne `L R L R …` en `L L … R R …`.
pub fn interleaved_to_planar(data: &[u8], channels: u16, bytes_per_sample: usize) -> Vec<u8> {
    reorder(data, channels, bytes_per_sample, true)
}

/// Réordonne `L L … R R …` en `L R L R …`.
pub fn planar_to_interleaved(data: &[u8], channels: u16, bytes_per_sample: usize) -> Vec<u8> {
    reorder(data, channels, bytes_per_sample, false)
}

fn reorder(data: &[u8], channels: u16, bytes_per_sample: usize, to_planar: bool) -> Vec<u8> {
    let channels = channels as usize;
    let frame_bytes = channels * bytes_per_sample;
    assert_eq!(
        data.len() % frame_bytes,
        0,
        "sample data must hold whole frames"
    );
    let frames = data.len() / frame_bytes;
    let plane_bytes = frames * bytes_per_sample;

    let mut out = vec![0u8; data.len()];
    for frame in 0..frames {
        for ch in 0..channels {
            let interleaved = (frame * channels + ch) * bytes_per_sample;
            let planar = ch * plane_bytes + frame * bytes_per_sample;
            let (src, dst) = if to_planar {
                (interleaved, planar)
            } else {
                (planar, interleaved)
            };
            out[dst..dst + bytes_per_sample].copy_from_slice(&data[src..src + bytes_per_sample]);
        }
    }
    out
}

/// Lit un échantillon normalisé [-1.0, 1.0] à l'offset octet donné.
fn read_normalized(data: &[u8], offset: usize, kind: SampleKind) -> f64 {
    match kind {
        SampleKind::I16 => {
            i16::from_le_bytes([data[offset], data[offset + 1]]) as f64 / kind.max_amplitude()
        }
        SampleKind::I24 | SampleKind::I32 => {
            let raw = i32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            let raw = if matches!(kind, SampleKind::I24) {
                (raw << 8) >> 8
            } else {
                raw
            };
            raw as f64 / kind.max_amplitude()
        }
        SampleKind::F32 => f32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as f64,
    }
}

/// Quantifie un f64 normalisé vers l'encodage cible.
fn write_normalized(out: &mut Vec<u8>, value: f64, kind: SampleKind) {
    match kind {
        SampleKind::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        _ => {
            let max = kind.max_amplitude();
            let scaled = (value * max).round().clamp(-max, max - 1.0);
            match kind {
                SampleKind::I16 => out.extend_from_slice(&(scaled as i16).to_le_bytes()),
                _ => out.extend_from_slice(&(scaled as i32).to_le_bytes()),
            }
        }
    }
}

/// Décode des octets en échantillons f64 normalisés [-1.0, 1.0].
///
/// Accepte tous les encodages, y compris `F32`.
pub fn bytes_to_f64_samples(data: &[u8], kind: SampleKind) -> Result<Vec<f64>, PcmError> {
    let step = kind.bytes_per_sample();
    if data.len() % step != 0 {
        return Err(PcmError::Misaligned {
            len: data.len(),
            expected: step,
        });
    }
    let count = data.len() / step;
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        samples.push(read_normalized(data, i * step, kind));
    }
    Ok(samples)
}

/// Convertit un chunk vers un autre format (encodage et/ou layout).
///
/// La conversion d'encodage passe par un f64 normalisé ; la conversion de
/// layout est un pur réordonnancement. Un chunk déjà au format demandé est
/// retourné tel quel (clone de pointeur).
pub fn convert_format(chunk: &PcmChunk, target: SampleFormat) -> Result<PcmChunk, PcmError> {
    let spec = chunk.spec();
    if spec.format == target {
        return Ok(chunk.clone());
    }

    let src_kind = spec.format.kind();
    let dst_kind = target.kind();

    // Repasser en interleavé avant toute requantification.
    let interleaved: Vec<u8> = if spec.format.is_planar() {
        planar_to_interleaved(chunk.data(), spec.channels, src_kind.bytes_per_sample())
    } else {
        chunk.data().to_vec()
    };

    let converted = if src_kind == dst_kind {
        interleaved
    } else {
        let count = interleaved.len() / src_kind.bytes_per_sample();
        let mut out = Vec::with_capacity(count * dst_kind.bytes_per_sample());
        let step = src_kind.bytes_per_sample();
        for i in 0..count {
            let v = read_normalized(&interleaved, i * step, src_kind);
            write_normalized(&mut out, v, dst_kind);
        }
        out
    };

    let final_data = if target.is_planar() {
        interleaved_to_planar(&converted, spec.channels, dst_kind.bytes_per_sample())
    } else {
        converted
    };

    PcmChunk::new(
        StreamSpec::new(target, spec.sample_rate, spec.channels),
        Bytes::from(final_data),
    )
}

/// Applique un gain en décibels, format inchangé.
pub fn apply_gain(chunk: &PcmChunk, gain_db: f64) -> Result<PcmChunk, PcmError> {
    if gain_db.abs() < f64::EPSILON {
        return Ok(chunk.clone());
    }
    let spec = chunk.spec();
    let kind = spec.format.kind();
    let linear = 10f64.powf(gain_db / 20.0);

    let data = chunk.data();
    let count = data.len() / kind.bytes_per_sample();
    let step = kind.bytes_per_sample();
    let mut out = Vec::with_capacity(data.len());
    for i in 0..count {
        let v = read_normalized(data, i * step, kind) * linear;
        write_normalized(&mut out, v, kind);
    }
    PcmChunk::new(spec, Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_bytes_roundtrip() {
        let samples = vec![0i32, 1, -1, 32_767, -32_768];
        let bytes = i32_samples_to_bytes(&samples, SampleKind::I16).unwrap();
        assert_eq!(bytes.len(), samples.len() * 2);
        let back = bytes_to_i32_samples(&bytes, SampleKind::I16).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn test_i24_sign_extension() {
        let samples = vec![8_388_607i32, -8_388_608];
        let bytes = i32_samples_to_bytes(&samples, SampleKind::I24).unwrap();
        let back = bytes_to_i32_samples(&bytes, SampleKind::I24).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn test_float_bytes_rejected() {
        assert!(bytes_to_i32_samples(&[0u8; 4], SampleKind::F32).is_err());
        assert!(i32_samples_to_bytes(&[0], SampleKind::F32).is_err());
    }

    #[test]
    fn test_planar_roundtrip() {
        // 3 frames stéréo i16 : L0 R0 L1 R1 L2 R2
        let interleaved: Vec<u8> = vec![1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0];
        let planar = interleaved_to_planar(&interleaved, 2, 2);
        assert_eq!(planar, vec![1, 0, 3, 0, 5, 0, 2, 0, 4, 0, 6, 0]);
        let back = planar_to_interleaved(&planar, 2, 2);
        assert_eq!(back, interleaved);
    }

    #[test]
    fn test_convert_kind_i16_to_f32_and_back() {
        let chunk = PcmChunk::from_i16_samples(vec![0, 16_384, -16_384, 32_767], 48_000, 1);
        let f32_chunk =
            convert_format(&chunk, SampleFormat::interleaved(SampleKind::F32)).unwrap();
        assert_eq!(f32_chunk.frames(), 4);
        let back = convert_format(&f32_chunk, SampleFormat::interleaved(SampleKind::I16)).unwrap();
        assert_eq!(back.data(), chunk.data());
    }

    #[test]
    fn test_convert_layout_only() {
        let chunk = PcmChunk::from_i16_samples(vec![1, 2, 3, 4], 48_000, 2);
        let planar =
            convert_format(&chunk, SampleFormat::planar(SampleKind::I16)).unwrap();
        assert_eq!(planar.frames(), 2);
        let back =
            convert_format(&planar, SampleFormat::interleaved(SampleKind::I16)).unwrap();
        assert_eq!(back.data(), chunk.data());
    }

    #[test]
    fn test_apply_gain_doubles_amplitude() {
        let chunk = PcmChunk::from_i16_samples(vec![1000, -1000], 48_000, 1);
        let louder = apply_gain(&chunk, 6.020_599_913_279_624).unwrap();
        let samples = bytes_to_i32_samples(louder.data(), SampleKind::I16).unwrap();
        assert_eq!(samples, vec![2000, -2000]);
    }
}
