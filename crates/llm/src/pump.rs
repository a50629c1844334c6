use std::fmt::Display;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::events::{StreamEventMapped, TurnId};

/// How a pump run ended, mostly useful for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpExit {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    ConsumerGone,
}

/// Forwards upstream text fragments into the turn's event channel.
///
/// `None` items stand for upstream content that carries no text (tool calls, final
/// usage frames) and are skipped along with empty strings. Exactly one terminal event
/// is sent unless the run was cancelled or the consumer went away.
pub(crate) async fn pump_fragments<S, E>(
    turn: TurnId,
    mut fragments: S,
    event_tx: mpsc::Sender<StreamEventMapped>,
    mut cancel_rx: oneshot::Receiver<()>,
    timeout: Option<Duration>,
) -> PumpExit
where
    S: Stream<Item = Result<Option<String>, E>> + Unpin,
    E: Display,
{
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let mut forwarded = 0usize;

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(turn = ?turn, forwarded, "provider stream cancelled");
                return PumpExit::Cancelled;
            }
            next = next_before_deadline(&mut fragments, deadline) => {
                match next {
                    None => {
                        tracing::warn!(
                            turn = ?turn,
                            forwarded,
                            timeout = ?timeout,
                            "provider stream exceeded its deadline"
                        );
                        let _ = event_tx.send(StreamEventMapped::failed(turn)).await;
                        return PumpExit::TimedOut;
                    }
                    Some(None) => break,
                    Some(Some(Ok(Some(text)))) if !text.is_empty() => {
                        forwarded += 1;
                        if event_tx.send(StreamEventMapped::delta(turn, text)).await.is_err() {
                            return PumpExit::ConsumerGone;
                        }
                    }
                    Some(Some(Ok(_))) => {}
                    Some(Some(Err(error))) => {
                        tracing::warn!(
                            turn = ?turn,
                            forwarded,
                            error = %error,
                            "provider stream emitted an error chunk"
                        );
                        let _ = event_tx.send(StreamEventMapped::failed(turn)).await;
                        return PumpExit::Failed;
                    }
                }
            }
        }
    }

    tracing::debug!(turn = ?turn, forwarded, "provider stream finished");
    if event_tx.send(StreamEventMapped::done(turn)).await.is_err() {
        return PumpExit::ConsumerGone;
    }
    PumpExit::Completed
}

/// Outer `None` means the deadline passed first.
async fn next_before_deadline<S>(stream: &mut S, deadline: Option<Instant>) -> Option<Option<S::Item>>
where
    S: Stream + Unpin,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, stream.next()).await.ok(),
        None => Some(stream.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamEventPayload;
    use crate::provider::make_event_stream;

    async fn collect(stream: &mut crate::provider::ProviderEventStream) -> Vec<StreamEventPayload> {
        let mut payloads = Vec::new();
        while let Some(event) = stream.recv().await {
            payloads.push(event.payload);
        }
        payloads
    }

    #[tokio::test]
    async fn forwards_text_in_order_and_suppresses_empty_fragments() {
        let turn = TurnId::new(1);
        let (event_tx, mut stream, cancel_rx) = make_event_stream(turn, 8);
        let upstream = futures::stream::iter(vec![
            Ok::<_, String>(Some("We offer ".to_string())),
            Ok(Some(String::new())),
            Ok(None),
            Ok(Some("tax prep.".to_string())),
        ]);

        let exit = pump_fragments(turn, upstream, event_tx, cancel_rx, None).await;

        assert_eq!(exit, PumpExit::Completed);
        assert_eq!(
            collect(&mut stream).await,
            vec![
                StreamEventPayload::Delta("We offer ".to_string()),
                StreamEventPayload::Delta("tax prep.".to_string()),
                StreamEventPayload::Done,
            ]
        );
    }

    #[tokio::test]
    async fn upstream_error_ends_with_single_failure_and_hides_detail() {
        let turn = TurnId::new(2);
        let (event_tx, mut stream, cancel_rx) = make_event_stream(turn, 8);
        let upstream = futures::stream::iter(vec![
            Ok(Some("Sure, ".to_string())),
            Err("503 upstream overloaded".to_string()),
            Ok(Some("never delivered".to_string())),
        ]);

        let exit = pump_fragments(turn, upstream, event_tx, cancel_rx, None).await;

        assert_eq!(exit, PumpExit::Failed);
        assert_eq!(
            collect(&mut stream).await,
            vec![
                StreamEventPayload::Delta("Sure, ".to_string()),
                StreamEventPayload::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn empty_upstream_completes_without_deltas() {
        let turn = TurnId::new(3);
        let (event_tx, mut stream, cancel_rx) = make_event_stream(turn, 8);
        let upstream = futures::stream::iter(Vec::<Result<Option<String>, String>>::new());

        pump_fragments(turn, upstream, event_tx, cancel_rx, None).await;

        assert_eq!(collect(&mut stream).await, vec![StreamEventPayload::Done]);
    }

    #[tokio::test]
    async fn cancellation_stops_without_terminal_event() {
        let turn = TurnId::new(4);
        let (event_tx, mut stream, cancel_rx) = make_event_stream(turn, 8);
        let upstream = futures::stream::pending::<Result<Option<String>, String>>();

        assert!(stream.cancel());
        let exit = pump_fragments(turn, upstream, event_tx, cancel_rx, None).await;

        assert_eq!(exit, PumpExit::Cancelled);
        assert!(collect(&mut stream).await.is_empty());
    }

    #[tokio::test]
    async fn stalled_upstream_fails_after_deadline() {
        let turn = TurnId::new(5);
        let (event_tx, mut stream, cancel_rx) = make_event_stream(turn, 8);
        let upstream = futures::stream::iter(vec![Ok::<_, String>(Some("partial".to_string()))])
            .chain(futures::stream::pending());

        let exit = pump_fragments(
            turn,
            upstream,
            event_tx,
            cancel_rx,
            Some(Duration::from_millis(50)),
        )
        .await;

        assert_eq!(exit, PumpExit::TimedOut);
        assert_eq!(
            collect(&mut stream).await,
            vec![
                StreamEventPayload::Delta("partial".to_string()),
                StreamEventPayload::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn dropped_consumer_stops_the_pump() {
        let turn = TurnId::new(6);
        let (event_tx, stream, _cancel_rx) = make_event_stream(turn, 1);
        // Keep the cancel signal silent so only the closed channel can stop the pump.
        let (_keep_alive, cancel_rx) = oneshot::channel();
        drop(stream);
        let upstream = futures::stream::iter(vec![Ok::<_, String>(Some("a".to_string()))]);

        let exit = pump_fragments(turn, upstream, event_tx, cancel_rx, None).await;

        assert_eq!(exit, PumpExit::ConsumerGone);
    }
}
