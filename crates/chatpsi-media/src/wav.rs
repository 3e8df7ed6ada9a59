//! Minimal RIFF/WAVE writer (16-bit PCM).

use bytes::{BufMut, Bytes, BytesMut};

use crate::microphone::AudioFormat;

const HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;

/// Encode `samples` (interleaved, nominally in `[-1.0, 1.0]`) as a WAV file.
/// Out-of-range samples are clipped.
pub fn encode_wav(samples: &[f32], format: AudioFormat) -> Bytes {
    let block_align = format.channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = format.sample_rate * u32::from(block_align);
    let data_len = (samples.len() * 2) as u32;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + data_len as usize);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len);
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1); // PCM
    buf.put_u16_le(format.channels);
    buf.put_u32_le(format.sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(BITS_PER_SAMPLE);

    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        buf.put_i16_le((clamped * i16::MAX as f32) as i16);
    }

    buf.freeze()
}
