use std::collections::{HashMap, HashSet};

use transport_codecs::{PayloadKind, RendezItem, ResultCode};

/// Canned behaviour for the mock executor, keyed by request kind.
#[derive(Debug, Clone)]
pub struct Script {
    pub(crate) results: HashMap<PayloadKind, ResultCode>,
    pub(crate) omit_body: HashSet<PayloadKind>,
    pub(crate) corrupt_body: HashSet<PayloadKind>,
    pub(crate) silent: HashSet<PayloadKind>,
    pub(crate) rendez_keys: Vec<String>,
    pub(crate) rendez_sends: Vec<RendezItem>,
    pub(crate) alloc_base: u64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
            omit_body: HashSet::new(),
            corrupt_body: HashSet::new(),
            silent: HashSet::new(),
            rendez_keys: Vec::new(),
            rendez_sends: Vec::new(),
            alloc_base: 0xABCD,
        }
    }
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers requests of `request` kind with a non-zero result code.
    pub fn fail(mut self, request: PayloadKind, code: i32, message: impl Into<String>) -> Self {
        self.results
            .insert(request, ResultCode::error(code, message));
        self
    }

    /// Replies to `request` with a header-only message.
    pub fn omit_body(mut self, request: PayloadKind) -> Self {
        self.omit_body.insert(request);
        self
    }

    /// Replies to `request` with bytes that do not decode.
    pub fn corrupt_body(mut self, request: PayloadKind) -> Self {
        self.corrupt_body.insert(request);
        self
    }

    /// Records `request` but never answers it.
    pub fn silent(mut self, request: PayloadKind) -> Self {
        self.silent.insert(request);
        self
    }

    /// Each run asks the host for these keys before it completes.
    pub fn rendez_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rendez_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Each run response carries these tensors for the host.
    pub fn rendez_sends(mut self, items: Vec<RendezItem>) -> Self {
        self.rendez_sends = items;
        self
    }

    /// First handle returned by allocations; later ones count up from it.
    pub fn alloc_base(mut self, base: u64) -> Self {
        self.alloc_base = base;
        self
    }

    pub(crate) fn result_for(&self, request: PayloadKind) -> ResultCode {
        self.results.get(&request).cloned().unwrap_or_default()
    }
}
