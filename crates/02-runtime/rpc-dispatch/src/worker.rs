//! Follow-up worker.
//!
//! Handlers running on the receive thread must not issue outbound calls
//! themselves. They enqueue a job here instead; one worker thread drains the
//! queue in order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::{RpcError, RpcResult};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct FollowUpQueue {
    tx: Mutex<Option<Sender<Job>>>,
}

impl FollowUpQueue {
    /// Enqueues without blocking. Fails once the queue is closed or full.
    pub(crate) fn submit(&self, job: Job) -> RpcResult<()> {
        let tx = self.tx.lock().clone().ok_or(RpcError::Shutdown)?;
        tx.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => RpcError::internal("follow-up queue full"),
            TrySendError::Disconnected(_) => RpcError::Shutdown,
        })
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

pub(crate) fn spawn(capacity: usize) -> RpcResult<(FollowUpQueue, JoinHandle<()>)> {
    let (tx, rx) = if capacity == 0 {
        unbounded()
    } else {
        bounded(capacity)
    };
    let handle = thread::Builder::new()
        .name("rpc-followup".into())
        .spawn(move || run(rx))?;
    Ok((
        FollowUpQueue {
            tx: Mutex::new(Some(tx)),
        },
        handle,
    ))
}

fn run(rx: Receiver<Job>) {
    debug!("follow-up worker started");
    for job in rx {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("follow-up job panicked");
        }
    }
    debug!("follow-up worker exited");
}
