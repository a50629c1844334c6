use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use crate::events::{StreamEventMapped, TurnId};

pub const DEFAULT_PROVIDER_ID: &str = "gemini";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Immutable client configuration, built once at startup and injected into the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_id: String,
    pub system_instruction: String,
    pub stream_timeout: Option<Duration>,
    pub channel_capacity: usize,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_id: DEFAULT_GEMINI_MODEL.to_string(),
            system_instruction: String::new(),
            stream_timeout: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into().trim().to_string();
        if !model_id.is_empty() {
            self.model_id = model_id;
        }
        self
    }

    pub fn with_system_instruction(mut self, system_instruction: impl Into<String>) -> Self {
        self.system_instruction = system_instruction.into();
        self
    }

    pub fn with_stream_timeout(mut self, stream_timeout: Duration) -> Self {
        self.stream_timeout = Some(stream_timeout);
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        // tokio panics on a zero-capacity bounded channel.
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// One single-turn generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub turn: TurnId,
    pub message: String,
}

impl StreamRequest {
    pub fn new(turn: TurnId, message: impl Into<String>) -> Self {
        Self {
            turn,
            message: message.into(),
        }
    }
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("provider '{provider_id}' has no API key configured"))]
    Unconfigured {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request for {turn:?} has an empty message"))]
    EmptyMessage { stage: &'static str, turn: TurnId },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

impl ProviderError {
    pub fn is_unconfigured(&self) -> bool {
        matches!(self, Self::Unconfigured { .. })
    }
}

/// Receiving half of one turn's fragment channel.
///
/// Dropping the stream signals cancellation to the producing worker.
pub struct ProviderEventStream {
    turn: TurnId,
    events: mpsc::Receiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub(crate) fn new(
        turn: TurnId,
        events: mpsc::Receiver<StreamEventMapped>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            turn,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<StreamEventMapped> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn is_configured(&self) -> bool;
    fn stream_reply(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

/// Creates the bounded event channel shared by a provider worker and its consumer.
///
/// Public so alternative providers (and test doubles) can produce handles with the
/// same cancellation semantics as the built-in adapter.
pub fn make_event_stream(
    turn: TurnId,
    capacity: usize,
) -> (
    mpsc::Sender<StreamEventMapped>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(turn, event_rx, cancel_tx),
        cancel_rx,
    )
}
