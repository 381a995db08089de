//! Table of calls awaiting replies or pushes, keyed by sequence number.
//!
//! Entries own their callbacks. Dropping an entry delivers
//! [`RpcError::Cancelled`] to whatever it still holds, so every path that
//! removes an entry (retirement, send failure, shutdown) notifies its
//! callbacks exactly once. Callbacks never run while the table lock is held.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use transport_codecs::{Payload, PayloadKind};

use crate::{RpcError, RpcResult};

/// What a callback receives: the decoded body, or `None` for a header-only
/// reply to a call registered without a reply kind.
pub type Reply = Option<Payload>;

/// Retires a call. Runs at most once.
pub type DoneCallback = Box<dyn FnOnce(RpcResult<Reply>) + Send + 'static>;

/// Handles pushes of one type for a call. May run many times.
pub type TypedCallback = Arc<dyn Fn(RpcResult<Reply>) + Send + Sync + 'static>;

#[derive(Default)]
pub(crate) struct PendingCall {
    reply: Option<PayloadKind>,
    done: Option<DoneCallback>,
    typed: HashMap<String, TypedCallback>,
}

impl PendingCall {
    pub(crate) fn terminal(reply: Option<PayloadKind>, done: DoneCallback) -> Self {
        Self {
            reply,
            done: Some(done),
            typed: HashMap::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.done.is_none() && self.typed.is_empty()
    }

    fn describe(&self, seq: u64) -> PendingSummary {
        let mut typed: Vec<String> = self.typed.keys().cloned().collect();
        typed.sort();
        PendingSummary {
            seq,
            reply: self.reply,
            has_done: self.done.is_some(),
            typed,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            done(Err(RpcError::Cancelled));
        }
        for (_, callback) in self.typed.drain() {
            callback(Err(RpcError::Cancelled));
        }
    }
}

/// Diagnostic view of one pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub seq: u64,
    pub reply: Option<PayloadKind>,
    pub has_done: bool,
    pub typed: Vec<String>,
}

impl fmt::Display for PendingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq {}:", self.seq)?;
        match self.reply {
            Some(kind) => write!(f, " reply={kind}")?,
            None => write!(f, " reply=<none>")?,
        }
        write!(f, " done={}", self.has_done)?;
        if !self.typed.is_empty() {
            write!(f, " typed=[{}]", self.typed.join(", "))?;
        }
        Ok(())
    }
}

/// How the receive loop should deliver one inbound message.
pub(crate) enum Dispatch {
    NotFound,
    /// The entry exists but holds nothing that can take this message.
    NoCallback,
    Typed(TypedCallback),
    /// The entry was removed; `retired` cancels leftover typed callbacks when dropped.
    Terminal {
        done: DoneCallback,
        reply: Option<PayloadKind>,
        retired: PendingCall,
    },
}

#[derive(Default)]
pub(crate) struct PendingTable {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingTable {
    pub(crate) fn insert(&self, seq: u64, call: PendingCall) {
        let replaced = self.calls.lock().insert(seq, call);
        if replaced.is_some() {
            warn!(seq, "sequence reused while an entry was pending");
        }
    }

    /// Attaches a typed callback, creating the entry if needed.
    pub(crate) fn add_typed(&self, seq: u64, type_name: String, callback: TypedCallback) {
        let previous = {
            let mut calls = self.calls.lock();
            calls
                .entry(seq)
                .or_default()
                .typed
                .insert(type_name, callback)
        };
        if let Some(previous) = previous {
            previous(Err(RpcError::Cancelled));
        }
    }

    /// Selects the callback for a message of `type_name` under `seq`.
    ///
    /// Typed callbacks take precedence and stay registered. Otherwise the
    /// entry is removed and its terminal callback handed out.
    pub(crate) fn take_for(&self, seq: u64, type_name: &str) -> Dispatch {
        let mut calls = self.calls.lock();
        let Some(call) = calls.get(&seq) else {
            return Dispatch::NotFound;
        };
        if let Some(callback) = call.typed.get(type_name) {
            return Dispatch::Typed(Arc::clone(callback));
        }
        if call.done.is_none() {
            return Dispatch::NoCallback;
        }
        let Some(mut retired) = calls.remove(&seq) else {
            return Dispatch::NotFound;
        };
        drop(calls);
        match retired.done.take() {
            Some(done) => Dispatch::Terminal {
                done,
                reply: retired.reply,
                retired,
            },
            None => Dispatch::NoCallback,
        }
    }

    /// Removes `seq`, cancelling its callbacks. Returns whether it existed.
    pub(crate) fn erase_with_cancellation(&self, seq: u64) -> bool {
        let removed = self.calls.lock().remove(&seq);
        match removed {
            Some(call) => {
                debug!(seq, "pending call cancelled");
                drop(call);
                true
            }
            None => false,
        }
    }

    /// Removes every entry, cancelling callbacks. Returns how many were removed.
    pub(crate) fn drain_with_cancellation(&self) -> usize {
        let drained: SmallVec<[PendingCall; 8]> = {
            let mut calls = self.calls.lock();
            calls.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        drop(drained);
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn contains(&self, seq: u64) -> bool {
        self.calls.lock().contains_key(&seq)
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingSummary> {
        let mut entries: Vec<PendingSummary> = self
            .calls
            .lock()
            .iter()
            .map(|(seq, call)| call.describe(*seq))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use transport_codecs::AllocResponse;

    fn recorder() -> (Arc<PlMutex<Vec<String>>>, impl Fn(&str, RpcResult<Reply>)) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let record = move |tag: &str, result: RpcResult<Reply>| {
            let outcome = match result {
                Ok(Some(payload)) => payload.type_name().to_owned(),
                Ok(None) => "empty".to_owned(),
                Err(err) => err.to_string(),
            };
            sink.lock().push(format!("{tag}:{outcome}"));
        };
        (log, record)
    }

    #[test]
    fn typed_callback_wins_and_stays() {
        let table = PendingTable::default();
        table.insert(
            1,
            PendingCall::terminal(Some(PayloadKind::AllocResponse), Box::new(|_| {})),
        );
        table.add_typed(1, "push".into(), Arc::new(|_| {}));

        assert!(matches!(table.take_for(1, "push"), Dispatch::Typed(_)));
        assert!(matches!(table.take_for(1, "push"), Dispatch::Typed(_)));
        assert!(table.contains(1));
    }

    #[test]
    fn terminal_retirement_cancels_leftover_typed() {
        let (log, record) = recorder();
        let record = Arc::new(record);
        let table = PendingTable::default();
        let done_record = Arc::clone(&record);
        table.insert(
            4,
            PendingCall::terminal(
                Some(PayloadKind::AllocResponse),
                Box::new(move |r| done_record("done", r)),
            ),
        );
        let typed_record = Arc::clone(&record);
        table.add_typed(4, "push".into(), Arc::new(move |r| typed_record("push", r)));

        let Dispatch::Terminal {
            done,
            reply,
            retired,
        } = table.take_for(4, "reply")
        else {
            panic!("expected terminal dispatch");
        };
        assert!(!table.contains(4));
        assert_eq!(reply, Some(PayloadKind::AllocResponse));
        done(Ok(Some(AllocResponse::default().into())));
        drop(retired);

        assert_eq!(
            *log.lock(),
            vec![
                "done:executor.AllocResponse".to_owned(),
                "push:call cancelled".to_owned()
            ]
        );
    }

    #[test]
    fn typed_only_entry_reports_no_callback_for_other_types() {
        let table = PendingTable::default();
        table.add_typed(9, "push".into(), Arc::new(|_| {}));
        assert!(matches!(table.take_for(9, "other"), Dispatch::NoCallback));
        assert!(table.contains(9));
        assert!(matches!(table.take_for(10, "push"), Dispatch::NotFound));
    }

    #[test]
    fn drain_cancels_every_callback_once() {
        let (log, record) = recorder();
        let record = Arc::new(record);
        let table = PendingTable::default();
        for seq in 0..3u64 {
            let record = Arc::clone(&record);
            table.insert(
                seq,
                PendingCall::terminal(None, Box::new(move |r| record("done", r))),
            );
        }
        assert_eq!(table.drain_with_cancellation(), 3);
        assert_eq!(table.len(), 0);
        assert_eq!(log.lock().len(), 3);
        assert!(log.lock().iter().all(|line| line == "done:call cancelled"));
    }

    #[test]
    fn snapshot_describes_entries() {
        let table = PendingTable::default();
        table.insert(
            2,
            PendingCall::terminal(Some(PayloadKind::RunResponse), Box::new(|_| {})),
        );
        table.add_typed(2, "executor.RendezRecvRequest".into(), Arc::new(|_| {}));
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].to_string(),
            "seq 2: reply=executor.RunResponse done=true typed=[executor.RendezRecvRequest]"
        );
    }
}
