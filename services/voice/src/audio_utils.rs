use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate the OpenAI realtime API expects for PCM16 input.
pub const OPENAI_REALTIME_API_PCM16_SAMPLE_RATE: f64 = 24000.0;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Feeds arbitrarily sized mono buffers through a fixed-chunk resampler,
/// carrying leftover samples over to the next call.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Same input and output rates pass samples through untouched.
    pub fn new(in_rate: f64, out_rate: f64, chunk_size: usize) -> anyhow::Result<Self> {
        let inner = if (in_rate - out_rate).abs() < f64::EPSILON {
            None
        } else {
            Some(create_resampler(in_rate, out_rate, chunk_size)?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = &mut self.inner else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= resampler.input_frames_next() {
            let frames = resampler.input_frames_next();
            let chunk: Vec<f32> = self.pending.drain(..frames).collect();
            let processed = resampler.process(&[chunk], None)?;
            if let Some(channel) = processed.first() {
                out.extend_from_slice(channel);
            }
        }
        Ok(out)
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => samples
            .chunks_exact(usize::from(n))
            .map(|frame| frame.iter().sum::<f32>() / f32::from(n))
            .collect(),
    }
}

/// Encodes a slice of f32 samples into a base64 string (converting to i16 PCM first).
pub fn encode_f32_to_base64_i16(pcm32: &[f32]) -> String {
    let pcm16: Vec<u8> = pcm32
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn decode(encoded: &str) -> Vec<i16> {
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap()
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(16000.0, 24000.0, 1024).is_ok());
    }

    #[test]
    fn test_stream_resampler_halves_rate() {
        let mut resampler = StreamResampler::new(48000.0, 24000.0, 480).unwrap();
        let mut produced = 0;
        // Uneven buffer sizes, as a capture device delivers them.
        for size in [100, 700, 333, 1267, 480, 1920] {
            produced += resampler.push(&vec![0.25; size]).unwrap().len();
        }
        // 4800 input frames in ten full chunks, roughly 240 frames out per chunk.
        assert!((2200..=2420).contains(&produced), "produced {produced}");
    }

    #[test]
    fn test_stream_resampler_passthrough() {
        let mut resampler = StreamResampler::new(24000.0, 24000.0, 480).unwrap();
        assert_eq!(resampler.push(&[0.1, 0.2]).unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_downmix() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = downmix(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert_abs_diff_eq!(mono[0], 0.5);
        assert_abs_diff_eq!(mono[1], 0.5);
        assert_abs_diff_eq!(mono[2], 0.0);
        assert_eq!(downmix(&[0.3, 0.4], 1), vec![0.3, 0.4]);
    }

    #[test]
    fn test_encode_f32_to_base64_i16() {
        let decoded = decode(&encode_f32_to_base64_i16(&[0.5, -1.0, 0.0, 2.0]));
        assert_eq!(decoded, vec![16384, i16::MIN, 0, i16::MAX]);
        assert!(encode_f32_to_base64_i16(&[]).is_empty());
    }
}
