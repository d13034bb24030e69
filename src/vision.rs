use crate::capture::CaptureContext;
use crate::event::VisionEvent;
use crate::settings::env_flag_enabled;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Local;
use reqwest::Client;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const USE_STUB_ENV: &str = "USE_STUB";
pub const USE_STUB_NO_EVENT_ENV: &str = "USE_STUB_NOEVENT";

const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;
const MAX_IMAGE_DIMENSION: u32 = 10_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait EventExtractor: Send + Sync {
    /// `Ok(None)` means the model looked and found no event.
    async fn extract_event(
        &self,
        image_path: &Path,
        context: &CaptureContext,
    ) -> Result<Option<VisionEvent>>;
}

/// Offline extractor returning a canned event (or none).
#[derive(Debug, Clone)]
pub struct StubExtractor {
    pub event: Option<VisionEvent>,
    pub delay: Duration,
}

impl StubExtractor {
    pub fn sample() -> Self {
        Self {
            event: Some(VisionEvent {
                title: Some("Sample Meeting".to_string()),
                date: Some("2024-11-15".to_string()),
                time: Some("10:30".to_string()),
                description: Some("Quarterly business review.".to_string()),
                participants: Some("Alice, Bob, Charlie".to_string()),
                location: Some("Conference Room A".to_string()),
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn no_event() -> Self {
        Self {
            event: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl EventExtractor for StubExtractor {
    async fn extract_event(
        &self,
        _image_path: &Path,
        context: &CaptureContext,
    ) -> Result<Option<VisionEvent>> {
        info!(stage = "llm", provider = "stub", app = %context.app_name, "using stub extractor");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.event.clone().filter(VisionEvent::is_valid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    OpenAi,
    Stub,
    StubNoEvent,
}

impl ExtractorKind {
    /// Command-line flags win; otherwise `USE_STUB_NOEVENT` / `USE_STUB` decide.
    pub fn resolve(stub: bool, no_event: bool) -> Self {
        let env = |name: &str| {
            std::env::var(name)
                .map(|value| env_flag_enabled(&value))
                .unwrap_or(false)
        };
        Self::from_flags(stub || env(USE_STUB_ENV), no_event || env(USE_STUB_NO_EVENT_ENV))
    }

    fn from_flags(stub: bool, no_event: bool) -> Self {
        match (stub, no_event) {
            (_, true) => ExtractorKind::StubNoEvent,
            (true, false) => ExtractorKind::Stub,
            (false, false) => ExtractorKind::OpenAi,
        }
    }
}

/// Falls back to the stub when no API key is configured.
pub fn build_extractor(kind: ExtractorKind, model: &str) -> Result<Arc<dyn EventExtractor>> {
    match kind {
        ExtractorKind::Stub => Ok(Arc::new(StubExtractor::sample())),
        ExtractorKind::StubNoEvent => Ok(Arc::new(StubExtractor::no_event())),
        ExtractorKind::OpenAi => match std::env::var(OPENAI_API_KEY_ENV) {
            Ok(api_key) if !api_key.trim().is_empty() => Ok(Arc::new(OpenAiExtractor::new(
                api_key.trim().to_string(),
                model.to_string(),
            )?)),
            _ => {
                warn!(
                    stage = "llm",
                    "{OPENAI_API_KEY_ENV} is not set, falling back to the stub extractor"
                );
                Ok(Arc::new(StubExtractor::sample()))
            }
        },
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiExtractor {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiExtractor {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl EventExtractor for OpenAiExtractor {
    async fn extract_event(
        &self,
        image_path: &Path,
        context: &CaptureContext,
    ) -> Result<Option<VisionEvent>> {
        let image_bytes = std::fs::read(image_path)
            .with_context(|| format!("failed to read screenshot {}", image_path.display()))?;
        validate_image(&image_bytes)?;

        let base64_image = general_purpose::STANDARD.encode(&image_bytes);
        let data_url = format!("data:image/png;base64,{base64_image}");

        let body = json!({
            "model": self.model,
            "input": [
                {
                    "role": "user",
                    "content": [
                        {"type": "input_text", "text": extraction_prompt(context)},
                        {"type": "input_image", "image_url": data_url}
                    ]
                }
            ]
        });

        info!(stage = "llm", provider = "openai", model = %self.model, "requesting extraction");
        let response = self
            .client
            .post("https://api.openai.com/v1/responses")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call OpenAI Responses API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {status}: {body}");
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode OpenAI response JSON")?;

        let Some(text) = extract_text(&json) else {
            bail!("OpenAI response contained no text output");
        };
        let event = parse_event_json(&text)?;
        match &event {
            Some(event) => info!(stage = "llm", title = ?event.title, date = ?event.date, "event extracted"),
            None => info!(stage = "llm", "no calendar event in screenshot"),
        }
        Ok(event)
    }
}

fn validate_image(bytes: &[u8]) -> Result<()> {
    if bytes.len() as u64 > MAX_IMAGE_BYTES {
        bail!("screenshot is {} bytes, over the {} byte limit", bytes.len(), MAX_IMAGE_BYTES);
    }
    let image = image::load_from_memory(bytes).context("screenshot is not a readable image")?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        bail!("screenshot has invalid dimensions {width}x{height}");
    }
    if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        warn!(stage = "llm", width, height, "screenshot is unusually large");
    }
    Ok(())
}

fn extraction_prompt(context: &CaptureContext) -> String {
    let now = Local::now();
    format!(
        "Analyze this screenshot and extract any calendar event information you find. \
Use the app and window context to decide which part of the screen matters; in chat apps only \
look at the active conversation and include the visible participant names.\n\
Contextual metadata:\n\
- App Name: {app}\n\
- Bundle ID: {bundle}\n\
- Window Title: {window}\n\
- System Date: {date}\n\
- System Time: {time}\n\
- System Time Zone: {zone}\n\n\
Return only a JSON object with these fields (null when not found), with dates and times in the \
system time zone:\n\
- title: string\n\
- date: string (ISO date like \"2024-11-05\")\n\
- time: string (like \"14:00\")\n\
- description: string\n\
- participants: string\n\
- location: string\n\n\
If no calendar event is found, return null.",
        app = context.app_name,
        bundle = context.bundle_id.as_deref().unwrap_or("unknown"),
        window = context.window_title,
        date = now.format("%Y-%m-%d"),
        time = now.format("%H:%M:%S"),
        zone = now.format("%:z"),
    )
}

/// Reads the model's answer: a JSON object, possibly fenced in markdown, or
/// a literal `null`.
fn parse_event_json(text: &str) -> Result<Option<VisionEvent>> {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let candidate = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(_) => {
            let start = trimmed.find('{');
            let end = trimmed.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&trimmed[start..=end])
                        .context("model returned malformed JSON")?
                }
                _ => bail!("model returned no JSON object"),
            }
        }
    };

    if candidate.is_null() {
        return Ok(None);
    }
    let event: VisionEvent =
        serde_json::from_value(candidate).context("model JSON is not an event object")?;
    if !event.is_valid() {
        warn!(stage = "llm", ?event, "extracted event is missing title or date");
        return Ok(None);
    }
    Ok(Some(event))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_text(root: &Value) -> Option<String> {
    if let Some(value) = root.get("output_text") {
        if let Some(text) = value.as_str() {
            return Some(text.to_string());
        }
    }

    let output = root.get("output")?.as_array()?;
    let mut fragments = Vec::new();

    for item in output {
        let content = item.get("content").and_then(Value::as_array);
        if let Some(content_parts) = content {
            for part in content_parts {
                let part_type = part.get("type").and_then(Value::as_str).unwrap_or_default();
                if matches!(part_type, "output_text" | "text") {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        fragments.push(text.trim().to_string());
                    }
                }
            }
        }
    }

    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join("\n"))
    }
}
