//! Provider capability and the vendor-keyed factory.
//!
//! A provider implements whichever inference capabilities its vendor
//! offers; the rest answer with a non-retryable `unsupported` error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use infergrid_core::inference::*;
use infergrid_core::{PlatformError, PlatformResult};
use tracing::debug;

use crate::http_provider::HttpProvider;

/// Vendor name under which self-hosted instances are dispatched.
pub const SELF_HOSTED_VENDOR: &str = "self_hosted";

/// Vendor name for generic JSON-over-HTTP endpoints.
pub const HTTP_VENDOR: &str = "http";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed to build a client for one call.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: None,
            model: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn unsupported(vendor: &str, capability: &str) -> PlatformError {
    PlatformError::provider("unsupported", format!("{vendor} does not support {capability}"), false)
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Vendor name, for logs and errors.
    fn name(&self) -> &str;

    async fn generate_text(&self, _params: &TextGenerationParams) -> PlatformResult<TextOutput> {
        Err(unsupported(self.name(), "text generation"))
    }

    async fn generate_image(&self, _params: &TextToImageParams) -> PlatformResult<ImageOutput> {
        Err(unsupported(self.name(), "image generation"))
    }

    async fn edit_image(&self, _params: &ImageEditParams) -> PlatformResult<ImageOutput> {
        Err(unsupported(self.name(), "image editing"))
    }

    async fn stylize_image(&self, _params: &StylizeParams) -> PlatformResult<ImageOutput> {
        Err(unsupported(self.name(), "image stylization"))
    }

    async fn health_check(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}

/// Fill unset parameters with platform defaults.
pub fn with_defaults(params: &InferenceParams) -> InferenceParams {
    let mut params = params.clone();
    match &mut params {
        InferenceParams::TextToImage(p) => {
            p.width.get_or_insert(DEFAULT_IMAGE_SIZE);
            p.height.get_or_insert(DEFAULT_IMAGE_SIZE);
            p.steps.get_or_insert(DEFAULT_STEPS);
            p.guidance_scale.get_or_insert(DEFAULT_GUIDANCE_SCALE);
            p.count.get_or_insert(DEFAULT_IMAGE_COUNT);
        }
        InferenceParams::ImageEdit(p) => {
            p.count.get_or_insert(DEFAULT_IMAGE_COUNT);
        }
        InferenceParams::Stylization(p) => {
            p.strength.get_or_insert(DEFAULT_STYLE_STRENGTH);
        }
        InferenceParams::TextGeneration(p) => {
            p.max_tokens.get_or_insert(DEFAULT_MAX_TOKENS);
            p.temperature.get_or_insert(DEFAULT_TEMPERATURE);
            p.top_p.get_or_insert(DEFAULT_TOP_P);
        }
    }
    params
}

/// Call the capability matching `params`, after applying defaults.
pub async fn dispatch(provider: &dyn Provider, params: &InferenceParams) -> PlatformResult<InferenceOutput> {
    match with_defaults(params) {
        InferenceParams::TextToImage(p) => provider.generate_image(&p).await.map(InferenceOutput::Images),
        InferenceParams::ImageEdit(p) => provider.edit_image(&p).await.map(InferenceOutput::Images),
        InferenceParams::Stylization(p) => provider.stylize_image(&p).await.map(InferenceOutput::Images),
        InferenceParams::TextGeneration(p) => provider.generate_text(&p).await.map(InferenceOutput::Text),
    }
}

pub type ProviderBuilder = Arc<dyn Fn(ProviderSettings) -> Arc<dyn Provider> + Send + Sync>;

/// Builds provider clients by vendor name.
#[derive(Clone, Default)]
pub struct ProviderFactory {
    builders: HashMap<String, ProviderBuilder>,
}

impl ProviderFactory {
    /// A factory with no vendors.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that speaks plain HTTP JSON for `self_hosted` and `http`.
    pub fn with_http() -> Self {
        let mut factory = Self::new();
        for vendor in [SELF_HOSTED_VENDOR, HTTP_VENDOR] {
            factory.register(vendor, |settings| Arc::new(HttpProvider::new(settings)) as Arc<dyn Provider>);
        }
        factory
    }

    pub fn register<F>(&mut self, vendor: &str, builder: F)
    where
        F: Fn(ProviderSettings) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        debug!(%vendor, "provider registered");
        self.builders.insert(vendor.to_string(), Arc::new(builder));
    }

    pub fn create(&self, vendor: &str, settings: ProviderSettings) -> PlatformResult<Arc<dyn Provider>> {
        let builder = self
            .builders
            .get(vendor)
            .ok_or_else(|| PlatformError::Unavailable(format!("unsupported vendor: {vendor}")))?;
        Ok(builder(settings))
    }

    pub fn supports(&self, vendor: &str) -> bool {
        self.builders.contains_key(vendor)
    }

    /// Registered vendor names, sorted.
    pub fn vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self.builders.keys().cloned().collect();
        vendors.sort();
        vendors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TextOnly;

    #[async_trait]
    impl Provider for TextOnly {
        fn name(&self) -> &str {
            "text_only"
        }

        async fn generate_text(&self, params: &TextGenerationParams) -> PlatformResult<TextOutput> {
            Ok(TextOutput {
                text: format!("max_tokens={}", params.max_tokens.unwrap_or_default()),
                finish_reason: Some("stop".into()),
                tokens_input: 3,
                tokens_output: 5,
            })
        }
    }

    #[tokio::test]
    async fn dispatch_applies_defaults() {
        let params = InferenceParams::TextGeneration(TextGenerationParams {
            prompt: Some("hi".into()),
            ..Default::default()
        });
        match dispatch(&TextOnly, &params).await.unwrap() {
            InferenceOutput::Text(out) => assert_eq!(out.text, "max_tokens=1000"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_capability_is_not_retryable() {
        let params = InferenceParams::Stylization(StylizeParams {
            image: "img".into(),
            style: "anime".into(),
            strength: None,
        });
        let err = dispatch(&TextOnly, &params).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("image stylization"));
    }

    #[test]
    fn image_defaults() {
        let params = InferenceParams::TextToImage(TextToImageParams {
            prompt: "a cat".into(),
            width: Some(512),
            ..Default::default()
        });
        let InferenceParams::TextToImage(p) = with_defaults(&params) else {
            panic!("variant changed");
        };
        assert_eq!(p.width, Some(512));
        assert_eq!(p.height, Some(DEFAULT_IMAGE_SIZE));
        assert_eq!(p.steps, Some(DEFAULT_STEPS));
        assert_eq!(p.guidance_scale, Some(DEFAULT_GUIDANCE_SCALE));
        assert_eq!(p.count, Some(1));
    }

    #[test]
    fn factory_lookup() {
        let mut factory = ProviderFactory::new();
        factory.register("text_only", |_| Arc::new(TextOnly) as Arc<dyn Provider>);
        assert!(factory.supports("text_only"));
        assert!(factory.create("text_only", ProviderSettings::default()).is_ok());
        assert!(matches!(
            factory.create("nope", ProviderSettings::default()),
            Err(PlatformError::Unavailable(_))
        ));
        assert_eq!(
            ProviderFactory::with_http().vendors(),
            vec!["http".to_string(), "self_hosted".to_string()]
        );
    }
}
