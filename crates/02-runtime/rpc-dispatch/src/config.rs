use serde::{Deserialize, Serialize};

use transport_codecs::OpLibrary;

pub const DEFAULT_EXECUTOR_ADDR: &str = "tcp://localhost:5501";
pub const DEFAULT_IDENTITY_PREFIX: &str = "rexec::recv::";
pub const DEFAULT_WORKER_QUEUE: usize = 1024;

/// Settings for one executor client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub executor_addr: String,
    /// Prefix of the randomly suffixed receive identity.
    pub identity_prefix: String,
    /// Library stamped into every outgoing envelope.
    pub library: OpLibrary,
    /// Dump the pending table before every receive.
    pub trace_pending: bool,
    /// Capacity of the follow-up queue; zero means unbounded.
    pub worker_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executor_addr: DEFAULT_EXECUTOR_ADDR.to_owned(),
            identity_prefix: DEFAULT_IDENTITY_PREFIX.to_owned(),
            library: OpLibrary::Host,
            trace_pending: false,
            worker_queue: DEFAULT_WORKER_QUEUE,
        }
    }
}

impl ClientConfig {
    pub fn with_executor_addr(mut self, addr: impl Into<String>) -> Self {
        self.executor_addr = addr.into();
        self
    }

    pub fn with_identity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.identity_prefix = prefix.into();
        self
    }

    pub fn with_library(mut self, library: OpLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn with_trace_pending(mut self, enabled: bool) -> Self {
        self.trace_pending = enabled;
        self
    }

    pub fn with_worker_queue(mut self, capacity: usize) -> Self {
        self.worker_queue = capacity;
        self
    }
}
