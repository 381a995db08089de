//! Keyed tensor exchange between host-side producers and consumers.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use rpc_dispatch::{RpcError, RpcResult};
use transport_codecs::TensorBlob;

/// A tensor published under a rendezvous key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RendezValue {
    pub tensor: TensorBlob,
    /// The producer was on a dead branch; the tensor carries no data.
    pub is_dead: bool,
}

pub type RecvCallback = Box<dyn FnOnce(RpcResult<RendezValue>) + Send + 'static>;

pub trait Rendezvous: Send + Sync {
    fn send(&self, key: &str, value: RendezValue) -> RpcResult<()>;

    /// Delivers the value for `key` to `done`, possibly on another thread and
    /// possibly before returning.
    fn recv_async(&self, key: &str, done: RecvCallback);
}

#[derive(Default)]
struct Table {
    ready: HashMap<String, VecDeque<RendezValue>>,
    waiters: HashMap<String, VecDeque<RecvCallback>>,
    aborted: Option<String>,
}

/// In-process rendezvous: values and waiters meet by key in FIFO order.
#[derive(Default)]
pub struct LocalRendezvous {
    table: Mutex<Table>,
}

impl LocalRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every current waiter and every later send or receive.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let waiters: Vec<RecvCallback> = {
            let mut table = self.table.lock();
            table.aborted = Some(reason.clone());
            table.ready.clear();
            table.waiters.drain().flat_map(|(_, queue)| queue).collect()
        };
        debug!(waiters = waiters.len(), "rendezvous aborted: {reason}");
        for waiter in waiters {
            waiter(Err(aborted(&reason)));
        }
    }

    pub fn pending_values(&self) -> usize {
        self.table.lock().ready.values().map(VecDeque::len).sum()
    }

    pub fn pending_waiters(&self) -> usize {
        self.table.lock().waiters.values().map(VecDeque::len).sum()
    }
}

fn aborted(reason: &str) -> RpcError {
    RpcError::internal(format!("rendezvous aborted: {reason}"))
}

impl Rendezvous for LocalRendezvous {
    fn send(&self, key: &str, value: RendezValue) -> RpcResult<()> {
        let waiter = {
            let mut table = self.table.lock();
            if let Some(reason) = &table.aborted {
                return Err(aborted(reason));
            }
            let waiter = table.waiters.get_mut(key).and_then(VecDeque::pop_front);
            if waiter.is_none() {
                table
                    .ready
                    .entry(key.to_owned())
                    .or_default()
                    .push_back(value.clone());
            }
            waiter
        };
        if let Some(waiter) = waiter {
            waiter(Ok(value));
        }
        Ok(())
    }

    fn recv_async(&self, key: &str, done: RecvCallback) {
        let ready = {
            let mut table = self.table.lock();
            if let Some(reason) = &table.aborted {
                Err(aborted(reason))
            } else {
                match table.ready.get_mut(key).and_then(VecDeque::pop_front) {
                    Some(value) => Ok(value),
                    None => {
                        table
                            .waiters
                            .entry(key.to_owned())
                            .or_default()
                            .push_back(done);
                        return;
                    }
                }
            }
        };
        done(ready);
    }
}
