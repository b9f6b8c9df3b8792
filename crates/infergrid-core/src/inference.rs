//! Typed inference requests and responses.
//!
//! Each gateway endpoint deserializes one of the parameter structs below and
//! validates it before anything reaches the router. Defaults for omitted
//! generation knobs are applied at dispatch time.

use serde::{Deserialize, Serialize};

use crate::catalog::ProviderKind;
use crate::error::{PlatformError, PlatformResult};

pub const DEFAULT_IMAGE_SIZE: u32 = 1024;
pub const DEFAULT_STEPS: u32 = 50;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
pub const DEFAULT_IMAGE_COUNT: u32 = 1;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_STYLE_STRENGTH: f64 = 0.8;

const MAX_IMAGE_SIZE: u32 = 4096;
const MIN_IMAGE_SIZE: u32 = 64;
const MAX_IMAGE_COUNT: u32 = 10;

// ── Parameters ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextToImageParams {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageEditParams {
    /// Source image, as a URL or base64 payload.
    pub image: String,
    pub prompt: String,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StylizeParams {
    pub image: String,
    pub style: String,
    /// 0.0 keeps the source, 1.0 applies the style fully.
    #[serde(default)]
    pub strength: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextGenerationParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

impl TextGenerationParams {
    /// Conversation to send, with a bare prompt promoted to a user turn.
    pub fn conversation(&self) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        if let Some(prompt) = &self.prompt {
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: prompt.clone(),
            });
        }
        messages
    }
}

/// A validated request for one feature family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceParams {
    TextToImage(TextToImageParams),
    ImageEdit(ImageEditParams),
    Stylization(StylizeParams),
    TextGeneration(TextGenerationParams),
}

impl InferenceParams {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::TextToImage(_) => "text_to_image",
            Self::ImageEdit(_) => "image_edit",
            Self::Stylization(_) => "stylization",
            Self::TextGeneration(_) => "text_generation",
        }
    }

    /// Reject malformed parameters before routing.
    pub fn validate(&self) -> PlatformResult<()> {
        match self {
            Self::TextToImage(p) => {
                require_text("prompt", &p.prompt)?;
                for (name, value) in [("width", p.width), ("height", p.height)] {
                    if let Some(v) = value
                        && !(MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&v)
                    {
                        return Err(invalid(format!(
                            "{name} must be between {MIN_IMAGE_SIZE} and {MAX_IMAGE_SIZE}"
                        )));
                    }
                }
                if let Some(steps) = p.steps
                    && !(1..=150).contains(&steps)
                {
                    return Err(invalid("steps must be between 1 and 150"));
                }
                if let Some(scale) = p.guidance_scale
                    && !(0.0..=30.0).contains(&scale)
                {
                    return Err(invalid("guidance_scale must be between 0 and 30"));
                }
                check_count(p.count)
            }
            Self::ImageEdit(p) => {
                require_text("image", &p.image)?;
                require_text("prompt", &p.prompt)?;
                check_count(p.count)
            }
            Self::Stylization(p) => {
                require_text("image", &p.image)?;
                require_text("style", &p.style)?;
                if let Some(s) = p.strength
                    && !(0.0..=1.0).contains(&s)
                {
                    return Err(invalid("strength must be between 0 and 1"));
                }
                Ok(())
            }
            Self::TextGeneration(p) => {
                if p.conversation().iter().all(|m| m.content.trim().is_empty()) {
                    return Err(invalid("prompt or messages is required"));
                }
                if p.max_tokens == Some(0) {
                    return Err(invalid("max_tokens must be positive"));
                }
                if let Some(t) = p.temperature
                    && !(0.0..=2.0).contains(&t)
                {
                    return Err(invalid("temperature must be between 0 and 2"));
                }
                if let Some(top_p) = p.top_p
                    && !(top_p > 0.0 && top_p <= 1.0)
                {
                    return Err(invalid("top_p must be in (0, 1]"));
                }
                Ok(())
            }
        }
    }
}

fn invalid(msg: impl Into<String>) -> PlatformError {
    PlatformError::InvalidRequest(msg.into())
}

fn require_text(name: &str, value: &str) -> PlatformResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{name} is required")));
    }
    Ok(())
}

fn check_count(count: Option<u32>) -> PlatformResult<()> {
    match count {
        Some(n) if n == 0 || n > MAX_IMAGE_COUNT => Err(invalid(format!(
            "count must be between 1 and {MAX_IMAGE_COUNT}"
        ))),
        _ => Ok(()),
    }
}

// ── Provider output ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextOutput {
    pub text: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub tokens_input: u32,
    #[serde(default)]
    pub tokens_output: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub images: Vec<GeneratedImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceOutput {
    Text(TextOutput),
    Images(ImageOutput),
}

// ── Response ───────────────────────────────────────────────────

/// Wall-clock milestones of one routed request, in epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub received_at: u64,
    pub dispatched_at: u64,
    pub completed_at: u64,
    /// Time spent before dispatch (resolution, filtering, selection).
    pub wait_ms: u64,
    pub exec_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub feature: String,
    pub provider_kind: ProviderKind,
    pub provider_id: String,
    /// Registered instance that served a self-hosted request.
    #[serde(default)]
    pub instance_id: Option<String>,
    pub output: InferenceOutput,
    pub fallback_used: bool,
    pub timing: Timing,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub image_count: u32,
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_to_image_requires_prompt() {
        let p = InferenceParams::TextToImage(TextToImageParams::default());
        assert!(matches!(p.validate(), Err(PlatformError::InvalidRequest(_))));
    }

    #[test]
    fn text_to_image_bounds() {
        let mut params = TextToImageParams {
            prompt: "a lighthouse at dusk".into(),
            ..Default::default()
        };
        assert!(InferenceParams::TextToImage(params.clone()).validate().is_ok());

        params.width = Some(10_000);
        assert!(InferenceParams::TextToImage(params.clone()).validate().is_err());

        params.width = Some(512);
        params.count = Some(0);
        assert!(InferenceParams::TextToImage(params).validate().is_err());
    }

    #[test]
    fn stylization_strength_range() {
        let p = StylizeParams {
            image: "https://img/1.png".into(),
            style: "ukiyo-e".into(),
            strength: Some(1.5),
        };
        assert!(InferenceParams::Stylization(p).validate().is_err());
    }

    #[test]
    fn text_generation_accepts_prompt_or_messages() {
        let prompt_only = TextGenerationParams {
            prompt: Some("hello".into()),
            ..Default::default()
        };
        assert!(InferenceParams::TextGeneration(prompt_only).validate().is_ok());

        let messages_only = TextGenerationParams {
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            ..Default::default()
        };
        assert!(InferenceParams::TextGeneration(messages_only).validate().is_ok());

        let empty = TextGenerationParams::default();
        assert!(InferenceParams::TextGeneration(empty).validate().is_err());
    }

    #[test]
    fn prompt_is_appended_as_user_turn() {
        let p = TextGenerationParams {
            prompt: Some("summarise".into()),
            messages: vec![ChatMessage {
                role: "system".into(),
                content: "be brief".into(),
            }],
            ..Default::default()
        };
        let conv = p.conversation();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[1].role, "user");
    }

    #[test]
    fn params_are_tagged_by_kind() {
        let json = r#"{"kind":"image_edit","image":"b64","prompt":"remove the car"}"#;
        let p: InferenceParams = serde_json::from_str(json).unwrap();
        assert_eq!(p.kind_name(), "image_edit");
    }
}
