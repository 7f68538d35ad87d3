//! WAV encoding for playback and decoding for `/voice` input, on `hound`.

use std::io::Cursor;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::protocol::AudioFrame;

/// Highest sample rate accepted for playback or input.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Reject rates no player can handle before they reach a WAV header.
pub fn check_sample_rate(sample_rate: u32) -> Result<()> {
    if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
        anyhow::bail!("Unsupported sample rate {sample_rate} Hz (expected 1..={MAX_SAMPLE_RATE})");
    }
    Ok(())
}

/// Encode a mono frame as 16-bit PCM WAV.
pub fn encode(frame: &AudioFrame) -> Result<Vec<u8>> {
    check_sample_rate(frame.sample_rate)?;
    let spec = WavSpec {
        channels: 1,
        sample_rate: frame.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    let mut writer =
        WavWriter::new(Cursor::new(&mut bytes), spec).context("Failed to start WAV stream")?;
    for sample in &frame.samples {
        let v = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(v).context("Failed to write WAV sample")?;
    }
    writer.finalize().context("Failed to finish WAV stream")?;
    Ok(bytes)
}

/// Decode a PCM or float WAV. Multi-channel audio is mixed down to mono.
pub fn decode(bytes: &[u8]) -> Result<AudioFrame> {
    let mut reader = WavReader::new(Cursor::new(bytes)).context("Not a readable WAV file")?;
    let spec = reader.spec();
    check_sample_rate(spec.sample_rate)?;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("Corrupt WAV sample data")?,
        SampleFormat::Int => {
            let scale = (1i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("Corrupt WAV sample data")?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = interleaved
        .chunks_exact(channels)
        .map(|group| group.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok(AudioFrame {
        sample_rate: spec.sample_rate,
        samples,
    })
}
