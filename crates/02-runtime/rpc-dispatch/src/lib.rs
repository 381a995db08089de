//! Asynchronous RPC dispatch for a remote executor.
//!
//! Calls are multiplexed over one transport connection. Each outbound call
//! gets a fresh sequence number; replies and executor pushes carry that
//! number back and are routed to the callbacks registered for it.
//!
//! * [`RpcClient`] – owns the send path, the receive thread and the follow-up worker.
//! * [`CallStarter`] – a prepared call; typed callbacks attach before it is sent.
//! * [`ClientHandle`] – weak handle usable from callbacks and follow-up jobs.
//! * [`Notification`] – one-shot wait used by synchronous calls.

mod client;
mod config;
mod error;
pub mod identity;
mod notify;
mod pending;
mod recv_loop;
mod starter;
mod worker;

pub use client::{ClientHandle, RpcClient};
pub use config::{ClientConfig, DEFAULT_EXECUTOR_ADDR, DEFAULT_IDENTITY_PREFIX, DEFAULT_WORKER_QUEUE};
pub use error::{RpcError, RpcResult};
pub use notify::Notification;
pub use pending::{DoneCallback, PendingSummary, Reply, TypedCallback};
pub use starter::CallStarter;
pub use worker::Job;
