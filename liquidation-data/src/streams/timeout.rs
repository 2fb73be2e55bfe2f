//! Idle read timeout for exchange WebSocket streams.
//!
//! Some exchanges stop sending frames on a half-dead connection without ever closing it.
//! [`TimeoutStream`] ends the stream when nothing has been received for the configured period,
//! which the feed session treats like any other disconnect.

use crate::exchange::{ExchangeId, WsMessage};
use futures::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;

/// Default read timeout for exchange WebSocket streams (2 minutes).
pub const DEFAULT_WS_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper that terminates the inner stream if no item is received within
/// `timeout_duration`.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    exchange: ExchangeId,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
    timed_out: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, exchange: ExchangeId, timeout_duration: Duration) -> Self {
        Self {
            inner,
            exchange,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
            timed_out: false,
        }
    }

    /// Whether the stream ended because the read timeout elapsed.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    type Item = Result<WsMessage, tungstenite::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.timed_out {
            return Poll::Ready(None);
        }

        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline
                    .as_mut()
                    .reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        exchange = %self.exchange,
                        timeout_secs = timeout_duration.as_secs(),
                        "WebSocket read timeout - no data received, triggering reconnection"
                    );
                    self.timed_out = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    fn channel_stream(
        rx: mpsc::UnboundedReceiver<Result<WsMessage, tungstenite::Error>>,
    ) -> impl Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin {
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_ends_when_idle() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = TimeoutStream::new(
            channel_stream(rx),
            ExchangeId::BybitPerpetualsUsd,
            Duration::from_secs(5),
        );

        tx.send(Ok(WsMessage::text("first"))).unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            WsMessage::text("first")
        );
        assert!(!stream.timed_out());

        // Nothing else is sent, so the paused clock auto-advances to the deadline
        assert!(stream.next().await.is_none());
        assert!(stream.timed_out());

        // Terminated streams stay terminated
        tx.send(Ok(WsMessage::text("late"))).unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_deadline_resets_on_item() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = TimeoutStream::new(
            channel_stream(rx),
            ExchangeId::Okx,
            Duration::from_secs(5),
        );

        for index in 0..3 {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(4)).await;
                let _ = tx.send(Ok(WsMessage::text(format!("frame-{index}"))));
            });
            assert!(stream.next().await.is_some(), "frame {index} should arrive");
        }

        assert!(!stream.timed_out());
    }
}
