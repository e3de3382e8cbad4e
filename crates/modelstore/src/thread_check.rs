//! Thread-discipline support
//!
//! A [`PersistenceManager`](crate::PersistenceManager) is meant to be driven
//! from one place: either a designated [`SerialQueue`] or the thread that
//! created it. [`ThreadMonitor`] reports calls made from anywhere else. The
//! check is advisory; operations still run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, warn};

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread that runs submitted jobs one at a time, in order.
pub struct SerialQueue {
    label: String,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker_label = label.clone();
        let worker = thread::Builder::new().name(label.clone()).spawn(move || {
            for job in receiver {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!(queue = %worker_label, "Job panicked on serial queue");
                }
            }
            debug!(queue = %worker_label, "Serial queue drained");
        })?;
        let thread_id = worker.thread().id();
        Ok(Self {
            label,
            sender: Some(sender),
            worker: Some(worker),
            thread_id,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the caller is running on this queue.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Enqueue `job` without waiting. Returns `false` if the queue has shut
    /// down.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match &self.sender {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Run `job` on the queue and wait for its result. Runs inline when
    /// already on the queue. `None` if the job panicked or the queue is gone.
    pub fn dispatch_sync<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return catch_unwind(AssertUnwindSafe(job)).ok();
        }
        let (tx, rx) = mpsc::channel();
        let sent = self.dispatch(move || {
            let _ = tx.send(job());
        });
        if !sent {
            return None;
        }
        rx.recv().ok()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once pending jobs finish.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if !self.is_current() {
                let _ = worker.join();
            }
        }
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

/// A call made from the wrong thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyAdvisory {
    OutsideSerialQueue {
        operation: &'static str,
        queue: String,
    },
    OffPrimaryThread {
        operation: &'static str,
    },
}

impl fmt::Display for ConcurrencyAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyAdvisory::OutsideSerialQueue { operation, queue } => write!(
                f,
                "{operation} called outside serial queue '{queue}'"
            ),
            ConcurrencyAdvisory::OffPrimaryThread { operation } => {
                write!(f, "{operation} called off the thread that owns the manager")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadMonitor {
    enabled: bool,
    primary: ThreadId,
    serial: Option<(String, ThreadId)>,
}

impl ThreadMonitor {
    /// The calling thread becomes the primary thread.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            primary: thread::current().id(),
            serial: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_serial_queue(&mut self, queue: &SerialQueue) {
        self.serial = Some((queue.label().to_string(), queue.thread_id()));
    }

    pub fn clear_serial_queue(&mut self) {
        self.serial = None;
    }

    /// Advisory for `operation` called from the current thread, logged at
    /// warn level. `None` when the call is in the right place.
    pub fn check(&self, operation: &'static str) -> Option<ConcurrencyAdvisory> {
        if !self.enabled {
            return None;
        }
        let current = thread::current().id();
        let advisory = match &self.serial {
            Some((label, id)) if *id != current => ConcurrencyAdvisory::OutsideSerialQueue {
                operation,
                queue: label.clone(),
            },
            Some(_) => return None,
            None if current != self.primary => ConcurrencyAdvisory::OffPrimaryThread { operation },
            None => return None,
        };
        warn!(%advisory, "Thread discipline violation");
        Some(advisory)
    }
}
