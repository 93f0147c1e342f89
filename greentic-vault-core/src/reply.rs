//! Single-use reply slots.
//!
//! A [`ReplySlot`] is fulfilled at most once; the matching [`ReplyWaiter`]
//! resolves with that value or with cancellation, whichever comes first.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("reply slot already fulfilled")]
    AlreadyFulfilled,
    #[error("reply receiver dropped")]
    ReceiverDropped,
    #[error("reply slot dropped without a value")]
    Abandoned,
    #[error("request cancelled")]
    Cancelled,
}

pub struct ReplySlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

pub struct ReplyWaiter<T> {
    rx: oneshot::Receiver<T>,
}

/// Creates a connected slot/waiter pair.
pub fn channel<T>() -> (ReplySlot<T>, ReplyWaiter<T>) {
    let (tx, rx) = oneshot::channel();
    (
        ReplySlot {
            tx: Mutex::new(Some(tx)),
        },
        ReplyWaiter { rx },
    )
}

impl<T> ReplySlot<T> {
    /// Delivers `value`. Only the first call can succeed.
    pub fn fulfill(&self, value: T) -> Result<(), ReplyError> {
        let tx = self.tx.lock().take().ok_or(ReplyError::AlreadyFulfilled)?;
        tx.send(value).map_err(|_| ReplyError::ReceiverDropped)
    }

    pub fn is_fulfilled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl<T> std::fmt::Debug for ReplySlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySlot")
            .field("fulfilled", &self.is_fulfilled())
            .finish()
    }
}

impl<T> ReplyWaiter<T> {
    pub async fn wait(self, cancel: &CancelToken) -> Result<T, ReplyError> {
        tokio::select! {
            biased;
            value = self.rx => value.map_err(|_| ReplyError::Abandoned),
            _ = cancel.cancelled() => Err(ReplyError::Cancelled),
        }
    }

    /// Returns the value if one was already delivered, without waiting.
    pub fn try_take(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_fulfill_is_rejected() {
        let (slot, waiter) = channel::<u32>();
        slot.fulfill(1).expect("first");
        assert_eq!(slot.fulfill(2), Err(ReplyError::AlreadyFulfilled));
        assert_eq!(waiter.wait(&CancelToken::new()).await, Ok(1));
    }

    #[tokio::test]
    async fn cancellation_wins_over_silence() {
        let (_slot, waiter) = channel::<u32>();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(waiter.wait(&cancel).await, Err(ReplyError::Cancelled));
    }

    #[tokio::test]
    async fn dropped_slot_abandons_waiter() {
        let (slot, waiter) = channel::<u32>();
        drop(slot);
        assert_eq!(
            waiter.wait(&CancelToken::new()).await,
            Err(ReplyError::Abandoned)
        );
    }

    #[test]
    fn fulfill_after_waiter_dropped() {
        let (slot, waiter) = channel::<u32>();
        drop(waiter);
        assert_eq!(slot.fulfill(3), Err(ReplyError::ReceiverDropped));
        assert!(slot.is_fulfilled());
    }
}
