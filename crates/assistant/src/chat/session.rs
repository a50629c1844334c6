use std::sync::Arc;

use hsb_llm::{LlmProvider, ProviderEventStream, StreamEventMapped, StreamRequest, TurnId};
use snafu::{ResultExt, Snafu};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::chat::controller::{ConversationController, EventOutcome};
use crate::chat::events::{ConversationSnapshot, SessionCommand};
use crate::chat::message::FailureKind;
use crate::persona::Persona;

pub const COMMAND_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("chat session has already shut down on `{stage}`"))]
    Closed { stage: &'static str },
    #[snafu(display("chat session task failed on `{stage}`, {source}"))]
    Join {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Handle to one mounted chat widget.
///
/// The conversation lives on a dedicated task; the handle only sends commands and reads
/// published snapshots. Dropping every handle (or calling [`ChatSession::close`]) cancels
/// the in-flight request and discards the conversation.
pub struct ChatSession {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<ConversationSnapshot>,
    task: JoinHandle<()>,
}

impl ChatSession {
    pub fn spawn(provider: Arc<dyn LlmProvider>, persona: Arc<Persona>) -> Self {
        let controller = ConversationController::new(persona);
        let (snapshot_tx, snapshots) = watch::channel(controller.snapshot());
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        tracing::debug!(
            provider_id = %provider.id(),
            configured = provider.is_configured(),
            "chat session started"
        );

        let task = tokio::spawn(
            SessionLoop {
                controller,
                provider,
                snapshot_tx,
            }
            .run(command_rx),
        );

        Self {
            commands,
            snapshots,
            task,
        }
    }

    /// Queues a submission. Blank input and submissions during an in-flight turn are
    /// dropped by the session without touching the conversation.
    pub async fn submit(&self, input: impl Into<String>) -> SessionResult<()> {
        self.commands
            .send(SessionCommand::Submit(input.into()))
            .await
            .map_err(|_| SessionError::Closed { stage: "submit" })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        (*self.snapshots.borrow()).clone()
    }

    /// Cancels any in-flight turn and waits for the session task to finish.
    pub async fn close(self) -> SessionResult<()> {
        // A send error only means the task already stopped; joining still reports panics.
        let _ = self.commands.send(SessionCommand::Close).await;
        self.task.await.context(JoinSnafu { stage: "close" })
    }
}

/// Stream state kept outside the controller.
struct ActiveTurn {
    turn: TurnId,
    stream: ProviderEventStream,
    worker: JoinHandle<()>,
}

struct SessionLoop {
    controller: ConversationController,
    provider: Arc<dyn LlmProvider>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
}

impl SessionLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut active: Option<ActiveTurn> = None;

        loop {
            tokio::select! {
                // Input is handled before stream events so a submit queued mid-stream is
                // judged against the state the user saw when sending it.
                biased;

                command = commands.recv() => match command {
                    Some(SessionCommand::Submit(input)) => {
                        if let Some(started) = self.handle_submit(&input) {
                            active = Some(started);
                        }
                    }
                    Some(SessionCommand::Close) | None => {
                        self.cancel_active(active.take());
                        break;
                    }
                },
                event = next_turn_event(&mut active) => match event {
                    Some(event) => {
                        if let EventOutcome::Finished(outcome) = self.handle_stream_event(event) {
                            tracing::debug!(outcome = ?outcome, "turn finished");
                            active = None;
                        }
                    }
                    None => self.handle_stream_closed(active.take()),
                },
            }
        }

        tracing::debug!("chat session stopped");
    }

    fn handle_submit(&mut self, input: &str) -> Option<ActiveTurn> {
        let pending = match self.controller.begin_turn(input) {
            Ok(pending) => pending,
            Err(rejection) => {
                tracing::debug!(rejection = ?rejection, "submission rejected");
                return None;
            }
        };

        // User message and placeholder become visible before any network activity.
        self.publish();

        let turn = pending.turn;
        match self
            .provider
            .stream_reply(StreamRequest::new(turn, pending.prompt))
        {
            Ok(handle) => {
                let worker = tokio::spawn(handle.worker);
                Some(ActiveTurn {
                    turn,
                    stream: handle.stream,
                    worker,
                })
            }
            Err(error) => {
                let kind = if error.is_unconfigured() {
                    FailureKind::Unconfigured
                } else {
                    FailureKind::Transport
                };
                tracing::warn!(turn = ?turn, error = %error, "could not start provider stream");
                self.controller.fail_turn(turn, kind);
                self.publish();
                None
            }
        }
    }

    fn handle_stream_event(&mut self, event: StreamEventMapped) -> EventOutcome {
        let outcome = self.controller.apply_stream_event(event);
        if outcome != EventOutcome::Ignored {
            self.publish();
        }
        outcome
    }

    fn handle_stream_closed(&mut self, active: Option<ActiveTurn>) {
        let Some(active) = active else {
            return;
        };

        tracing::warn!(turn = ?active.turn, "provider stream ended before a terminal event");
        if self.controller.fail_turn(active.turn, FailureKind::Transport) {
            self.publish();
        }
    }

    fn cancel_active(&mut self, active: Option<ActiveTurn>) {
        let Some(mut active) = active else {
            return;
        };

        // The worker sees the cancel signal and drops the upstream request itself.
        active.stream.cancel();
        drop(active.worker);

        if self.controller.cancel_turn(active.turn) {
            tracing::debug!(turn = ?active.turn, "in-flight turn cancelled on close");
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.controller.snapshot());
    }
}

async fn next_turn_event(active: &mut Option<ActiveTurn>) -> Option<StreamEventMapped> {
    match active {
        Some(active) => active.stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use hsb_llm::{
        ProviderConfig, ProviderResult, ProviderStreamHandle, ProviderWorker,
        RigProviderAdapter, StreamEventPayload, make_event_stream,
    };

    use super::*;
    use crate::chat::message::{Role, TurnOutcome};
    use crate::persona::{DEFAULT_BOOKING_URL, TRANSPORT_FALLBACK};

    /// Provider whose events are fed one by one by the test.
    struct ScriptedProvider {
        feed: Mutex<Option<mpsc::Receiver<StreamEventPayload>>>,
        calls: AtomicUsize,
        cancelled: Arc<AtomicBool>,
    }

    impl ScriptedProvider {
        fn new() -> (Arc<Self>, mpsc::Sender<StreamEventPayload>) {
            let (feed_tx, feed_rx) = mpsc::channel(8);
            let provider = Arc::new(Self {
                feed: Mutex::new(Some(feed_rx)),
                calls: AtomicUsize::new(0),
                cancelled: Arc::new(AtomicBool::new(false)),
            });
            (provider, feed_tx)
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn stream_reply(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut feed = self
                .feed
                .lock()
                .expect("feed lock")
                .take()
                .expect("scripted provider serves a single turn");
            let cancelled = Arc::clone(&self.cancelled);
            let turn = request.turn;
            let (event_tx, stream, mut cancel_rx) = make_event_stream(turn, 4);

            let worker: ProviderWorker = Box::pin(async move {
                loop {
                    tokio::select! {
                        _ = &mut cancel_rx => {
                            cancelled.store(true, Ordering::SeqCst);
                            return;
                        }
                        payload = feed.recv() => match payload {
                            Some(payload) => {
                                if event_tx.send(StreamEventMapped { turn, payload }).await.is_err() {
                                    return;
                                }
                            }
                            None => return,
                        },
                    }
                }
            });

            Ok(ProviderStreamHandle { stream, worker })
        }
    }

    async fn wait_for(
        snapshots: &mut watch::Receiver<ConversationSnapshot>,
        predicate: impl Fn(&ConversationSnapshot) -> bool,
    ) -> ConversationSnapshot {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let snapshot = snapshots.borrow_and_update();
                    if predicate(&snapshot) {
                        return (*snapshot).clone();
                    }
                }
                snapshots.changed().await.expect("session alive");
            }
        })
        .await
        .expect("snapshot condition reached in time")
    }

    fn last_text(snapshot: &ConversationSnapshot) -> &str {
        snapshot
            .last_message()
            .map(|message| message.text.as_str())
            .unwrap_or_default()
    }

    fn persona() -> Arc<Persona> {
        Arc::new(Persona::default())
    }

    #[tokio::test]
    async fn healthy_stream_renders_each_fragment_then_completes() {
        let (provider, feed) = ScriptedProvider::new();
        let session = ChatSession::spawn(provider.clone(), persona());
        let mut snapshots = session.subscribe();

        session.submit("What services do you offer?").await.unwrap();
        let started = wait_for(&mut snapshots, |s| s.messages.len() == 3).await;
        assert!(started.is_loading);
        assert_eq!(started.messages[1].role, Role::User);
        assert!(last_text(&started).is_empty());

        let mut expected = String::new();
        for fragment in [
            "We offer ",
            "tax prep, bookkeeping, ",
            "payroll, and consulting.",
        ] {
            expected.push_str(fragment);
            feed.send(StreamEventPayload::Delta(fragment.to_string()))
                .await
                .unwrap();
            let partial = wait_for(&mut snapshots, |s| last_text(s) == expected).await;
            assert!(partial.is_loading);
        }

        feed.send(StreamEventPayload::Done).await.unwrap();
        let done = wait_for(&mut snapshots, |s| !s.is_loading).await;

        let reply = done.last_message().expect("assistant reply");
        assert_eq!(
            reply.text,
            "We offer tax prep, bookkeeping, payroll, and consulting."
        );
        assert!(!reply.is_error);
        assert_eq!(done.last_outcome, Some(TurnOutcome::Completed));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_credential_uses_unconfigured_fallback_without_network() {
        let provider = Arc::new(RigProviderAdapter::new(ProviderConfig::new("gemini", "", "")));
        let session = ChatSession::spawn(provider, persona());
        let mut snapshots = session.subscribe();

        session.submit("Can we book a call?").await.unwrap();
        let done = wait_for(&mut snapshots, |s| {
            s.messages.len() == 3 && !s.is_loading
        })
        .await;

        let reply = done.last_message().expect("assistant reply");
        assert_eq!(reply.text, Persona::default().unconfigured_fallback());
        assert!(reply.text.contains(DEFAULT_BOOKING_URL));
        assert!(reply.is_error);
        assert_eq!(
            done.last_outcome,
            Some(TurnOutcome::Failed(FailureKind::Unconfigured))
        );

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn mid_stream_failure_replaces_partial_text() {
        let (provider, feed) = ScriptedProvider::new();
        let session = ChatSession::spawn(provider, persona());
        let mut snapshots = session.subscribe();

        session.submit("Help").await.unwrap();
        feed.send(StreamEventPayload::Delta("Sure, ".to_string()))
            .await
            .unwrap();
        wait_for(&mut snapshots, |s| last_text(s) == "Sure, ").await;

        feed.send(StreamEventPayload::Failed).await.unwrap();
        let done = wait_for(&mut snapshots, |s| !s.is_loading).await;

        let reply = done.last_message().expect("assistant reply");
        assert_eq!(reply.text, TRANSPORT_FALLBACK);
        assert!(reply.is_error);
        assert_eq!(done.messages.iter().filter(|m| m.is_error).count(), 1);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_event_counts_as_failure() {
        let (provider, feed) = ScriptedProvider::new();
        let session = ChatSession::spawn(provider, persona());
        let mut snapshots = session.subscribe();

        session.submit("Help").await.unwrap();
        feed.send(StreamEventPayload::Delta("Sure, ".to_string()))
            .await
            .unwrap();
        wait_for(&mut snapshots, |s| last_text(s) == "Sure, ").await;
        drop(feed);

        let done = wait_for(&mut snapshots, |s| !s.is_loading).await;
        assert_eq!(last_text(&done), TRANSPORT_FALLBACK);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn submissions_during_streaming_are_ignored() {
        let (provider, feed) = ScriptedProvider::new();
        let session = ChatSession::spawn(provider.clone(), persona());
        let mut snapshots = session.subscribe();

        session.submit("first").await.unwrap();
        wait_for(&mut snapshots, |s| s.is_loading).await;

        session.submit("second").await.unwrap();
        session.submit("   ").await.unwrap();
        feed.send(StreamEventPayload::Delta("answer".to_string()))
            .await
            .unwrap();
        feed.send(StreamEventPayload::Done).await.unwrap();

        let done = wait_for(&mut snapshots, |s| !s.is_loading).await;
        assert_eq!(done.messages.len(), 3);
        assert_eq!(done.messages[1].text, "first");
        assert_eq!(last_text(&done), "answer");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn blank_submission_publishes_nothing() {
        let (provider, _feed) = ScriptedProvider::new();
        let session = ChatSession::spawn(provider.clone(), persona());
        let before = session.snapshot();

        session.submit(" \n ").await.unwrap();
        session.close().await.unwrap();

        assert_eq!(before.messages.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn closing_mid_stream_cancels_the_worker() {
        let (provider, feed) = ScriptedProvider::new();
        let session = ChatSession::spawn(provider.clone(), persona());
        let mut snapshots = session.subscribe();

        session.submit("Help").await.unwrap();
        feed.send(StreamEventPayload::Delta("Sure, ".to_string()))
            .await
            .unwrap();
        wait_for(&mut snapshots, |s| last_text(s) == "Sure, ").await;

        session.close().await.unwrap();

        let last = (*snapshots.borrow()).clone();
        assert!(!last.is_loading);
        assert_eq!(last.last_outcome, Some(TurnOutcome::Cancelled));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !provider.cancelled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker observed cancellation");

        // Reopening the widget starts from a fresh conversation.
        let (fresh_provider, _fresh_feed) = ScriptedProvider::new();
        let reopened = ChatSession::spawn(fresh_provider, persona());
        assert_eq!(reopened.snapshot().messages.len(), 1);
        reopened.close().await.unwrap();
    }
}
