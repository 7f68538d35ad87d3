use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::SpeechService;
use crate::audio::wav::check_sample_rate;
use crate::protocol::AudioFrame;

/// Speech service reached over HTTP. Waveforms travel as base64-encoded
/// little-endian `f32` samples.
pub struct RemoteSpeech {
    http: Client,
    base_url: String,
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    sample_rate: u32,
    samples: String,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    text: String,
}

#[derive(Serialize)]
struct PrepareRequest<'a> {
    tts: &'a str,
    stt: &'a str,
}

impl RemoteSpeech {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ask the service to load its models onto the given devices.
    /// May take a long time on first run.
    pub async fn prepare(&self, tts_device: &str, stt_device: &str) -> Result<()> {
        info!("Preparing speech models (tts={tts_device}, stt={stt_device})");
        self.post(
            "prepare",
            &PrepareRequest {
                tts: tts_device,
                stt: stt_device,
            },
        )
        .await?;
        Ok(())
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach speech service at {url}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Speech service error {status}: {body}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl SpeechService for RemoteSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioFrame> {
        debug!("Synthesizing {} chars", text.len());
        let wire: WireFrame = self
            .post("text2speech", &SynthesizeRequest { text })
            .await?
            .json()
            .await
            .context("Malformed text2speech response")?;
        frame_from_wire(wire)
    }

    async fn recognize(&self, frame: &AudioFrame) -> Result<String> {
        let wire = WireFrame {
            sample_rate: frame.sample_rate,
            samples: encode_samples(&frame.samples),
        };
        let resp: RecognizeResponse = self
            .post("speech2text", &wire)
            .await?
            .json()
            .await
            .context("Malformed speech2text response")?;
        Ok(resp.text)
    }
}

fn frame_from_wire(wire: WireFrame) -> Result<AudioFrame> {
    check_sample_rate(wire.sample_rate).context("Speech service returned unusable audio")?;
    Ok(AudioFrame {
        sample_rate: wire.sample_rate,
        samples: decode_samples(&wire.samples)?,
    })
}

fn encode_samples(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

fn decode_samples(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded)
        .context("Waveform is not valid base64")?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!("Waveform length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
