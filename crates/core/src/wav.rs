//! RIFF/WAVE container encoding for raw PCM audio.
//!
//! The realtime session streams model audio as headerless PCM16 fragments.
//! Once an item's audio is complete, it is wrapped in a canonical 44-byte
//! WAV header so that ordinary players can open the result.

/// Size of the canonical PCM WAV header emitted by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// Sample rate of PCM16 audio produced by the OpenAI Realtime API.
pub const REALTIME_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Describes the layout of the raw PCM samples being wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// 16-bit mono PCM at the given sample rate.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }
}

impl Default for WavSpec {
    fn default() -> Self {
        Self::pcm16_mono(REALTIME_PCM16_SAMPLE_RATE)
    }
}

/// Wraps raw interleaved PCM samples in a RIFF/WAVE container.
///
/// The output is always `WAV_HEADER_LEN + pcm.len()` bytes long. An empty
/// buffer still yields a valid, silent file with a zero-length data chunk.
pub fn encode_wav(pcm: &[u8], spec: WavSpec) -> Vec<u8> {
    let data_size = pcm.len() as u32;
    let chunk_size = 36 + data_size;

    let mut buffer = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    // RIFF header
    buffer.extend_from_slice(b"RIFF");
    buffer.extend_from_slice(&chunk_size.to_le_bytes());
    buffer.extend_from_slice(b"WAVE");

    // fmt subchunk
    buffer.extend_from_slice(b"fmt ");
    buffer.extend_from_slice(&16u32.to_le_bytes());
    buffer.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buffer.extend_from_slice(&spec.channels.to_le_bytes());
    buffer.extend_from_slice(&spec.sample_rate.to_le_bytes());
    buffer.extend_from_slice(&spec.byte_rate().to_le_bytes());
    buffer.extend_from_slice(&spec.block_align().to_le_bytes());
    buffer.extend_from_slice(&spec.bits_per_sample.to_le_bytes());

    // data subchunk
    buffer.extend_from_slice(b"data");
    buffer.extend_from_slice(&data_size.to_le_bytes());
    buffer.extend_from_slice(pcm);

    buffer
}
