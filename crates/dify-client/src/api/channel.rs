//! Cancellable rendezvous channel between a streaming task and its caller.
//!
//! The producer's [`ChunkSender::send`] completes only once the consumer has
//! taken the item, or returns early when the cancellation token fires. The
//! consumer side, [`ChunkStream`], ends (yields `None`) once the sender is
//! dropped, which happens on every exit path of the producing task.
//!
//! Internally this is a capacity-1 `mpsc` carrying each item together with a
//! `oneshot` acknowledgement, so at most one item is ever in flight and the
//! producer cannot run ahead of a slow consumer.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

struct Handoff<T> {
    item: T,
    ack: oneshot::Sender<()>,
}

/// Outcome of a single [`ChunkSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The consumer received the item.
    Delivered,
    /// Cancellation fired before the consumer took the item.
    Cancelled,
    /// The consumer went away.
    Closed,
}

/// Write half, owned by the background task.
pub struct ChunkSender<T> {
    tx: mpsc::Sender<Handoff<T>>,
    cancel: CancellationToken,
}

/// Read half, owned by the caller.
///
/// Dropping the stream cancels the producing task.
pub struct ChunkStream<T> {
    rx: mpsc::Receiver<Handoff<T>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

/// Create a channel whose producer observes `cancel`.
///
/// The producer watches a child of `cancel`; the child is also cancelled when
/// the returned [`ChunkStream`] is dropped. Cancelling the child never
/// propagates back to the caller's token.
pub fn rendezvous<T>(cancel: &CancellationToken) -> (ChunkSender<T>, ChunkStream<T>) {
    let (tx, rx) = mpsc::channel(1);
    let child = cancel.child_token();
    let sender = ChunkSender {
        tx,
        cancel: child.clone(),
    };
    let stream = ChunkStream {
        rx,
        cancel: child.clone(),
        _guard: child.drop_guard(),
    };
    (sender, stream)
}

impl<T> ChunkSender<T> {
    /// Hand `item` to the consumer, racing cancellation at both the enqueue
    /// and the acknowledgement step.
    pub async fn send(&self, item: T) -> Delivery {
        let (ack, acked) = oneshot::channel();
        let handoff = Handoff { item, ack };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Delivery::Cancelled,
            sent = self.tx.send(handoff) => {
                if sent.is_err() {
                    return Delivery::Closed;
                }
            }
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Delivery::Cancelled,
            ack = acked => match ack {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
        }
    }

    /// Resolves when the request has been cancelled or the consumer dropped
    /// its stream.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Whether cancellation has already fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> ChunkStream<T> {
    /// Receive the next item, or `None` once the producer has closed the
    /// channel.
    pub async fn recv(&mut self) -> Option<T> {
        let handoff = self.rx.recv().await?;
        // The producer may have been cancelled meanwhile; nobody is waiting.
        let _ = handoff.ack.send(());
        Some(handoff.item)
    }

    /// Cancel the producing task. `recv` may still return the one item that
    /// was in flight, then `None`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream to completion.
    pub async fn collect_all(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }
}

impl<T> Stream for ChunkStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(handoff)) => {
                let _ = handoff.ack.send(());
                Poll::Ready(Some(handoff.item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for ChunkStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn items_arrive_in_order_then_close() {
        let token = CancellationToken::new();
        let (tx, stream) = rendezvous::<u32>(&token);

        tokio::spawn(async move {
            for i in 0..5 {
                assert_eq!(tx.send(i).await, Delivery::Delivered);
            }
        });

        assert_eq!(stream.collect_all().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn producer_waits_for_consumer() {
        let token = CancellationToken::new();
        let (tx, mut stream) = rendezvous::<u32>(&token);
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_in_task = sent.clone();

        tokio::spawn(async move {
            for i in 0..3 {
                if tx.send(i).await != Delivery::Delivered {
                    return;
                }
                sent_in_task.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 0, "send completed before recv");

        assert_eq!(stream.recv().await, Some(0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_unblocks_pending_send() {
        let token = CancellationToken::new();
        let (tx, stream) = rendezvous::<u32>(&token);

        let producer = tokio::spawn(async move { tx.send(7).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer stuck after cancel")
            .unwrap();
        assert_eq!(outcome, Delivery::Cancelled);
        drop(stream);
    }

    #[tokio::test]
    async fn dropping_stream_cancels_producer() {
        let token = CancellationToken::new();
        let (tx, stream) = rendezvous::<u32>(&token);
        drop(stream);

        assert!(tx.is_cancelled());
        assert_eq!(tx.send(1).await, Delivery::Cancelled);
        assert!(!token.is_cancelled(), "caller token must not be cancelled");
    }

    #[tokio::test]
    async fn stream_cancel_is_local() {
        let token = CancellationToken::new();
        let (tx, stream) = rendezvous::<u32>(&token);
        stream.cancel();
        tokio::time::timeout(Duration::from_secs(1), tx.cancelled())
            .await
            .unwrap();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn closes_when_sender_dropped() {
        let token = CancellationToken::new();
        let (tx, mut stream) = rendezvous::<u32>(&token);
        drop(tx);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn works_as_futures_stream() {
        let token = CancellationToken::new();
        let (tx, stream) = rendezvous::<&'static str>(&token);
        tokio::spawn(async move {
            tx.send("a").await;
            tx.send("b").await;
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec!["a", "b"]);
    }
}
