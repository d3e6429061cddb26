use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Request was dropped before it resolved")]
pub struct Cancelled;

/// A value that becomes available later. Resolves at most once.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

/// The single resolution point of a [`Pending`].
#[derive(Debug)]
pub struct Resolver<T> {
    tx: oneshot::Sender<T>,
}

pub fn pending<T>() -> (Resolver<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Pending { rx })
}

impl<T> Resolver<T> {
    /// Returns false when nobody waits for the value anymore.
    pub fn resolve(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Pending<T> {
    pub fn resolved(value: T) -> Self {
        let (resolver, pending) = pending();
        resolver.resolve(value);
        pending
    }

    /// Takes the value if it is ready, without waiting.
    pub fn try_take(&mut self) -> Option<Result<T, Cancelled>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(Cancelled)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map_err(|_| Cancelled)
    }
}
