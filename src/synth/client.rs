//! Aivis Cloud HTTP client
//!
//! One blocking request per chunk. The service streams audio back, but it is
//! also known to answer some failures with a JSON error object and a 200
//! status, so the body is sniffed before being handed to the player.

use super::types::{
    AudioBlob, EmbeddedApiError, ModelSearchResponse, SynthesisRequest, VoiceParams,
};
use crate::{Result, SpeakerError};
use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use std::io::Read;
use std::time::Duration;

/// Public API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.aivis-project.com/v1";

/// Size of each progressive read from the response body
const READ_CHUNK_SIZE: usize = 8192;

/// Anything that can turn one chunk of text into audio
///
/// The sequencer only sees this trait, which keeps it independent of HTTP.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<AudioBlob>;
}

impl<S: Synthesizer + ?Sized> Synthesizer for Box<S> {
    fn synthesize(&self, text: &str) -> Result<AudioBlob> {
        (**self).synthesize(text)
    }
}

/// Thin typed wrapper over the Aivis Cloud REST API
#[derive(Clone)]
pub struct AivisClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AivisClient {
    /// Create a client for the public endpoint
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client for a custom endpoint (tests, proxies)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SpeakerError::Config(
                "API key is missing: pass --api-key or set AIVIS_API_KEY".to_string(),
            ));
        }

        let http = Client::builder()
            .user_agent(concat!("aivis-speaker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Synthesize `text` and return the complete audio body
    pub fn synthesize_speech(&self, text: &str, params: &VoiceParams) -> Result<AudioBlob> {
        let url = format!("{}/tts/synthesize", self.base_url);
        info!("Synthesizing {} chars with model {}", text.chars().count(), params.model_uuid);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SynthesisRequest::new(text, params))
            .send()?;

        let response = Self::check_status(response)?;

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            debug!("Response Content-Type: {:?}", content_type);
        }

        let bytes = Self::read_body(response)?;
        Self::check_embedded_error(&bytes)?;

        let blob = AudioBlob::new(bytes, params.format);
        if blob.is_empty() {
            return Err(SpeakerError::Other("API returned an empty audio body".to_string()));
        }

        debug!("Received {} bytes of {} audio", blob.len(), params.format);
        Ok(blob)
    }

    /// List public voice models, most downloaded first
    pub fn list_models(&self, limit: u32) -> Result<ModelSearchResponse> {
        let url = format!("{}/aivm-models/search", self.base_url);
        let limit = limit.to_string();

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("limit", limit.as_str()), ("sort", "download")])
            .send()?;

        let response = Self::check_status(response)?;
        Ok(response.json()?)
    }

    /// Map a non-2xx response onto the API error taxonomy
    fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().unwrap_or_default();
        let err = SpeakerError::api(status.as_u16(), detail.trim());
        warn!("{}", err);
        Err(err)
    }

    /// Drain the body in fixed-size reads as the server streams it
    fn read_body(mut response: Response) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = response.read(&mut buf)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..n]);
        }
        Ok(bytes)
    }

    /// Detect `{"status_code": .., "detail": ..}` disguised as a success
    fn check_embedded_error(bytes: &[u8]) -> Result<()> {
        if bytes.first() != Some(&b'{') {
            return Ok(());
        }

        match serde_json::from_slice::<EmbeddedApiError>(bytes) {
            Ok(embedded) => {
                let err = SpeakerError::api(embedded.status_code, embedded.detail_text());
                warn!("Error object inside a success response: {}", err);
                Err(err)
            }
            // Not our error shape; let the player have it
            Err(_) => Ok(()),
        }
    }
}

/// [`AivisClient`] bound to one set of voice parameters
pub struct AivisSynthesizer {
    client: AivisClient,
    params: VoiceParams,
}

impl AivisSynthesizer {
    pub fn new(client: AivisClient, params: VoiceParams) -> Self {
        Self { client, params }
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }
}

impl Synthesizer for AivisSynthesizer {
    fn synthesize(&self, text: &str) -> Result<AudioBlob> {
        self.client.synthesize_speech(text, &self.params)
    }
}
