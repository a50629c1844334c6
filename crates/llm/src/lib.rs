use std::sync::Arc;

mod events;
mod provider;
mod pump;
mod rig_adapter;

pub use events::{StreamEventMapped, StreamEventPayload, TurnId};
pub use provider::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_GEMINI_MODEL, DEFAULT_PROVIDER_ID, LlmProvider,
    ProviderConfig, ProviderError, ProviderEventStream, ProviderResult, ProviderStreamHandle,
    ProviderWorker, StreamRequest, make_event_stream,
};
pub use rig_adapter::{RIG_GEMINI_PROVIDER_ID, RigProviderAdapter};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" | "rig-gemini" => {
            config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
