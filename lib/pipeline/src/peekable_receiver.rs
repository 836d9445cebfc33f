use std::collections::VecDeque;

use tokio::sync::mpsc;

/// Wraps an `mpsc::Receiver`, letting a component re-deliver items ahead of
/// whatever is already queued on the channel.
///
/// Used when a pipeline stage needs to reschedule messages at the start of
/// its own input (e.g. a stage that consumed an item but determined it
/// needs to be retried before moving on).
pub struct PeekableReceiver<T> {
    receiver: mpsc::Receiver<T>,
    prepended: VecDeque<T>,
}

impl<T> PeekableReceiver<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            receiver,
            prepended: VecDeque::new(),
        }
    }

    /// Returns a receiver that yields `items`, in order, before anything
    /// already pending on the underlying channel.
    pub fn prepend(mut self, items: Vec<T>) -> Self {
        for item in items.into_iter().rev() {
            self.prepended.push_front(item);
        }
        self
    }

    /// Receives the next item, preferring anything prepended over the
    /// underlying channel.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(item) = self.prepended.pop_front() {
            return Some(item);
        }
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepended_items_come_first() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(3).await.unwrap();
        drop(tx);

        let mut receiver = PeekableReceiver::new(rx).prepend(vec![1, 2]);
        assert_eq!(receiver.recv().await, Some(1));
        assert_eq!(receiver.recv().await, Some(2));
        assert_eq!(receiver.recv().await, Some(3));
        assert_eq!(receiver.recv().await, None);
    }
}
