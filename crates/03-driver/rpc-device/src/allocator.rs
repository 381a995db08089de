use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::{AddrHandle, ExecClient};

/// Raw allocation interface the host runtime calls into.
pub trait RawAllocator: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` when the allocation failed.
    fn allocate_raw(&self, alignment: usize, num_bytes: usize) -> Option<AddrHandle>;

    fn deallocate_raw(&self, handle: AddrHandle);
}

/// Forwards every allocation to the executor.
pub struct RpcAllocator {
    client: Arc<ExecClient>,
}

impl RpcAllocator {
    pub fn new(client: Arc<ExecClient>) -> Self {
        Self { client }
    }
}

impl RawAllocator for RpcAllocator {
    fn name(&self) -> &str {
        "rpc"
    }

    fn allocate_raw(&self, alignment: usize, num_bytes: usize) -> Option<AddrHandle> {
        match self.client.allocate(alignment as u64, num_bytes as u64) {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(alignment, num_bytes, "remote allocation failed: {err}");
                None
            }
        }
    }

    fn deallocate_raw(&self, handle: AddrHandle) {
        if let Err(err) = self.client.deallocate(handle) {
            error!(handle, "remote deallocation failed: {err}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneTimeState {
    Fresh,
    Allocated,
    Released,
}

/// Hands out a single executor-produced handle, once.
pub struct OneTimeAllocator {
    handle: AddrHandle,
    state: Mutex<OneTimeState>,
}

impl OneTimeAllocator {
    pub fn new(handle: AddrHandle) -> Self {
        Self {
            handle,
            state: Mutex::new(OneTimeState::Fresh),
        }
    }

    pub fn handle(&self) -> AddrHandle {
        self.handle
    }

    pub fn is_released(&self) -> bool {
        *self.state.lock() == OneTimeState::Released
    }
}

impl RawAllocator for OneTimeAllocator {
    fn name(&self) -> &str {
        "one-time"
    }

    fn allocate_raw(&self, _alignment: usize, _num_bytes: usize) -> Option<AddrHandle> {
        let mut state = self.state.lock();
        if *state != OneTimeState::Fresh {
            warn!(handle = self.handle, "one-time allocator already used");
            return None;
        }
        *state = OneTimeState::Allocated;
        Some(self.handle)
    }

    fn deallocate_raw(&self, handle: AddrHandle) {
        if handle != self.handle {
            error!(
                expected = self.handle,
                handle, "one-time allocator asked to free a foreign handle"
            );
            return;
        }
        *self.state.lock() = OneTimeState::Released;
    }
}
