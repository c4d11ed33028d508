use std::any::Any;
use std::cell::RefCell;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};

/// Defers store callbacks to the next tick of the service's timeline.
///
/// Providers may call back synchronously, re-entrantly, or from their own threads.
/// Callbacks only enqueue through a [`CallbackSender`]; their effects run when the
/// owner calls [`DeferredCallbackQueue::drain`].
pub struct DeferredCallbackQueue<T> {
    sender: mpsc::UnboundedSender<T>,
    receiver: RefCell<mpsc::UnboundedReceiver<T>>,
    notify: Arc<Notify>,
}

/// Thread-safe enqueue side of a [`DeferredCallbackQueue`].
pub struct CallbackSender<T> {
    sender: mpsc::UnboundedSender<T>,
    notify: Arc<Notify>,
}

impl<T> Clone for CallbackSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            notify: self.notify.clone(),
        }
    }
}

impl<T> CallbackSender<T> {
    /// Appends an action. Returns `false` if the owning queue is gone.
    pub fn enqueue(&self, action: T) -> bool {
        if self.sender.send(action).is_err() {
            tracing::debug!("Callback queue closed, dropping deferred callback");
            return false;
        }
        self.notify.notify_one();
        true
    }
}

impl<T> Default for DeferredCallbackQueue<T> {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: RefCell::new(receiver),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl<T> DeferredCallbackQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> CallbackSender<T> {
        CallbackSender {
            sender: self.sender.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn enqueue(&self, action: T) {
        self.sender().enqueue(action);
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.borrow().is_empty()
    }

    /// Runs every action queued before the call, in FIFO order.
    ///
    /// A failing or panicking action is logged and does not stop the rest. Actions
    /// enqueued while draining run on the next drain. Returns the number of actions run.
    pub fn drain<E: Display>(&self, mut run: impl FnMut(T) -> Result<(), E>) -> usize {
        let batch: Vec<T> = {
            let mut receiver = self.receiver.borrow_mut();
            let mut batch = Vec::new();
            while let Ok(action) = receiver.try_recv() {
                batch.push(action);
            }
            batch
        };

        let count = batch.len();
        for (index, action) in batch.into_iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| run(action))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(index, error = %e, "Failed to invoke deferred callback");
                }
                Err(panic) => {
                    tracing::error!(
                        index,
                        panic = panic_message(panic.as_ref()),
                        "Deferred callback panicked"
                    );
                }
            }
        }
        count
    }

    /// Resolves once at least one action is queued.
    pub async fn wait(&self) {
        while self.is_empty() {
            self.notify.notified().await;
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Action = Box<dyn FnOnce() -> Result<(), String>>;

    #[test]
    fn test_drain_runs_in_fifo_order() {
        let queue: DeferredCallbackQueue<usize> = DeferredCallbackQueue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }

        let mut seen = Vec::new();
        let count = queue.drain(|i| {
            seen.push(i);
            Ok::<_, String>(())
        });

        assert_eq!(count, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failing_action_does_not_stop_the_rest() {
        let queue: DeferredCallbackQueue<Action> = DeferredCallbackQueue::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for i in 0..4 {
            let seen = seen.clone();
            queue.enqueue(Box::new(move || {
                if i == 1 {
                    return Err("boom".to_string());
                }
                if i == 2 {
                    panic!("callback panicked");
                }
                seen.borrow_mut().push(i);
                Ok(())
            }));
        }

        let count = queue.drain(|action| action());

        assert_eq!(count, 4);
        assert_eq!(*seen.borrow(), vec![0, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_actions_enqueued_during_drain_run_next_tick() {
        let queue: Rc<DeferredCallbackQueue<u32>> = Rc::new(DeferredCallbackQueue::new());
        queue.enqueue(1);

        let inner = queue.clone();
        let first = queue.drain(|n| {
            inner.enqueue(n + 1);
            Ok::<_, String>(())
        });
        assert_eq!(first, 1);
        assert!(!queue.is_empty());

        let mut seen = Vec::new();
        queue.drain(|n| {
            seen.push(n);
            Ok::<_, String>(())
        });
        assert_eq!(seen, vec![2]);
    }

    #[tokio::test]
    async fn test_sender_crosses_threads() {
        let queue: DeferredCallbackQueue<String> = DeferredCallbackQueue::new();
        let sender = queue.sender();

        std::thread::spawn(move || {
            sender.enqueue("from store thread".to_string());
        })
        .join()
        .unwrap();

        queue.wait().await;
        let mut seen = Vec::new();
        queue.drain(|s| {
            seen.push(s);
            Ok::<_, String>(())
        });
        assert_eq!(seen, vec!["from store thread".to_string()]);
    }

    #[test]
    fn test_sender_reports_closed_queue() {
        let queue: DeferredCallbackQueue<u8> = DeferredCallbackQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert!(!sender.enqueue(1));
    }
}
