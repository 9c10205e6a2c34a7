//! Adapters to hosted services: Gemini models and Google Maps Platform.

pub mod gemini_api_agent;
pub mod maps_client;
pub mod offline_demo_agent;

pub use gemini_api_agent::{DEFAULT_GEMINI_MODEL, GeminiApiAgent};
pub use maps_client::GoogleMapsClient;
pub use offline_demo_agent::{DEMO_BACKEND_NAME, OfflineDemoAgent};

use civic_core::config::{GeminiConfig, ModelSettings};
use civic_core::inference::{InferenceBackend, InferenceGateway};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Inference gateways for each kind of model call.
#[derive(Debug, Clone)]
pub struct ModelGateways {
    /// Chat models in fallback order.
    pub chat: InferenceGateway,
    pub vision_analysis: InferenceGateway,
    pub image_generation: InferenceGateway,
    /// True when no usable Gemini key was configured.
    pub demo_mode: bool,
}

/// Builds the gateways from configuration.
///
/// A missing or placeholder key selects the offline demo agent for every
/// gateway.
pub fn build_gateways(
    gemini: Option<&GeminiConfig>,
    models: &ModelSettings,
    budget: Duration,
) -> ModelGateways {
    let Some(gemini) = gemini.filter(|g| !g.is_placeholder()) else {
        info!("No Gemini API key configured, using offline demo agent");
        let demo: Arc<dyn InferenceBackend> = Arc::new(OfflineDemoAgent::new());
        let gateway = InferenceGateway::new(budget).with_backend(demo);
        return ModelGateways {
            chat: gateway.clone(),
            vision_analysis: gateway.clone(),
            image_generation: gateway,
            demo_mode: true,
        };
    };

    let client = Client::new();
    let agent = |model: &str| -> Arc<dyn InferenceBackend> {
        Arc::new(GeminiApiAgent::new(gemini.api_key.clone(), model).with_client(client.clone()))
    };

    let chat_models: Vec<&str> = if models.chat.is_empty() {
        vec![DEFAULT_GEMINI_MODEL]
    } else {
        models.chat.iter().map(String::as_str).collect()
    };
    let chat = InferenceGateway::from_backends(
        chat_models.into_iter().map(&agent).collect(),
        budget,
    );

    ModelGateways {
        chat,
        vision_analysis: InferenceGateway::new(budget).with_backend(agent(&models.vision_analysis)),
        image_generation: InferenceGateway::new(budget)
            .with_backend(agent(&models.image_generation)),
        demo_mode: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_key_selects_demo() {
        let config = GeminiConfig {
            api_key: "dummy-key".to_string(),
        };
        let gateways = build_gateways(Some(&config), &ModelSettings::default(), Duration::from_secs(1));
        assert!(gateways.demo_mode);
        assert_eq!(gateways.chat.backend_names(), vec![DEMO_BACKEND_NAME.to_string()]);

        let gateways = build_gateways(None, &ModelSettings::default(), Duration::from_secs(1));
        assert!(gateways.demo_mode);
    }

    #[test]
    fn test_chat_models_in_order() {
        let config = GeminiConfig {
            api_key: "AIza-test".to_string(),
        };
        let gateways = build_gateways(Some(&config), &ModelSettings::default(), Duration::from_secs(1));
        assert!(!gateways.demo_mode);
        assert_eq!(
            gateways.chat.backend_names(),
            vec!["gemini-2.5-flash".to_string(), "gemini-2.0-flash".to_string()]
        );
    }
}
