use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use log::{debug, error, warn};

use crate::error::readable_thread_panic_error;

pub const DISPLAY_THREAD_NAME: &str = "display";

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs observer callbacks on the consumer's display thread.
pub trait Dispatcher: Send + Sync + 'static {
    /// Queues a job. Jobs run one at a time, in the order they were queued.
    fn dispatch(&self, job: Job);
}

/// A dedicated OS thread that runs every dispatched job in FIFO order.
pub struct DisplayThread {
    sender: UnboundedSender<Job>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DisplayThread {
    pub fn spawn() -> io::Result<Self> {
        let (sender, mut receiver) = unbounded::<Job>();

        let thread = thread::Builder::new()
            .name(DISPLAY_THREAD_NAME.to_string())
            .spawn(move || {
                futures::executor::block_on(async move {
                    while let Some(job) = receiver.next().await {
                        // a panicking observer must not take the other channels down with it
                        if let Err(err) = catch_unwind(AssertUnwindSafe(job)) {
                            error!("Observer callback failed: {}", readable_thread_panic_error(&err));
                        }
                    }
                });
                debug!("Display thread stopped");
            })?;

        Ok(DisplayThread {
            sender,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn is_current_thread() -> bool {
        thread::current().name() == Some(DISPLAY_THREAD_NAME)
    }

    /// Resolves once every job queued before this call has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel::<()>();
        self.dispatch(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.await;
    }
}

impl Dispatcher for DisplayThread {
    fn dispatch(&self, job: Job) {
        if self.sender.unbounded_send(job).is_err() {
            warn!("Display thread is gone, dropping observer callback");
        }
    }
}

impl Drop for DisplayThread {
    fn drop(&mut self) {
        self.sender.close_channel();

        let handle = self.thread.lock().expect("Failed to lock display thread handle").take();
        if let Some(handle) = handle {
            // the last reference might be released by a job on the display thread itself
            if handle.thread().id() != thread::current().id() {
                if let Err(err) = handle.join() {
                    error!("Failed to join display thread: {}", readable_thread_panic_error(&err));
                }
            }
        }
    }
}
