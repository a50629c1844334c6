use futures::StreamExt;
use futures::stream::BoxStream;
use rig::completion::{CompletionError, CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::events::StreamEventMapped;
use crate::provider::{
    CompletionsFailedSnafu, EmptyMessageSnafu, HttpClientSnafu, LlmProvider, ProviderConfig,
    ProviderResult, ProviderStreamHandle, ProviderWorker, StreamRequest, UnconfiguredSnafu,
    make_event_stream,
};
use crate::pump::pump_fragments;

pub const RIG_GEMINI_PROVIDER_ID: &str = "gemini";

type FragmentStream = BoxStream<'static, Result<Option<String>, CompletionError>>;

/// Gemini text generation through Rig's streaming completion API.
///
/// The client itself is built lazily inside the worker, so a provider without a
/// credential never touches the network.
pub struct RigProviderAdapter {
    config: ProviderConfig,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    async fn open_stream(
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<FragmentStream> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(config.model_id.clone());

        let mut builder = model.completion_request(RigMessage::user(request.message.clone()));
        if !config.system_instruction.trim().is_empty() {
            builder = builder.preamble(config.system_instruction.clone());
        }

        let stream = builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })?;

        Ok(stream
            .map(|item| item.map(Self::fragment_text))
            .boxed())
    }

    fn fragment_text<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(text.text),
            // Reasoning, tool calls and the final usage frame are not part of the reply.
            _ => None,
        }
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::Sender<StreamEventMapped>,
        cancel_rx: oneshot::Receiver<()>,
    ) {
        let turn = request.turn;
        let fragments = match Self::open_stream(&config, &request).await {
            Ok(fragments) => fragments,
            Err(error) => {
                tracing::error!(
                    turn = ?turn,
                    provider_id = %config.provider_id,
                    model_id = %config.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                let _ = event_tx.send(StreamEventMapped::failed(turn)).await;
                return;
            }
        };

        let exit = pump_fragments(turn, fragments, event_tx, cancel_rx, config.stream_timeout).await;
        tracing::debug!(turn = ?turn, exit = ?exit, "provider stream worker exited");
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig Gemini"
    }

    fn default_model(&self) -> &str {
        &self.config.model_id
    }

    fn is_configured(&self) -> bool {
        self.config.has_credential()
    }

    fn stream_reply(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            self.config.has_credential(),
            UnconfiguredSnafu {
                stage: "stream-reply",
                provider_id: self.config.provider_id.clone(),
            }
        );
        ensure!(
            !request.message.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "stream-reply",
                turn: request.turn,
            }
        );

        let (event_tx, stream, cancel_rx) =
            make_event_stream(request.turn, self.config.channel_capacity);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TurnId;
    use crate::provider::ProviderError;

    fn request(message: &str) -> StreamRequest {
        StreamRequest::new(TurnId::new(1), message)
    }

    #[test]
    fn missing_credential_is_reported_before_any_worker_exists() {
        let adapter = RigProviderAdapter::new(ProviderConfig::new("gemini", "", ""));

        assert!(!adapter.is_configured());
        let error = match adapter.stream_reply(request("Can we book a call?")) {
            Ok(_) => panic!("stream must not open without a credential"),
            Err(error) => error,
        };
        assert!(error.is_unconfigured());
    }

    #[test]
    fn whitespace_message_is_rejected() {
        let adapter = RigProviderAdapter::new(ProviderConfig::new("gemini", "key", ""));

        let error = match adapter.stream_reply(request("  \t ")) {
            Ok(_) => panic!("blank message must be rejected"),
            Err(error) => error,
        };
        assert!(matches!(error, ProviderError::EmptyMessage { .. }));
    }

    #[test]
    fn configured_adapter_hands_out_a_handle_for_the_requested_turn() {
        let adapter = RigProviderAdapter::new(
            ProviderConfig::new("gemini", "key", "").with_model("gemini-2.0-flash"),
        );

        let handle = adapter
            .stream_reply(request("What services do you offer?"))
            .expect("configured adapter should return a handle");

        // The worker is never polled here, so no request leaves the process.
        assert_eq!(handle.stream.turn(), TurnId::new(1));
        assert_eq!(adapter.default_model(), "gemini-2.0-flash");
    }
}
