//! Executor-backed device layer.
//!
//! * [`ExecClient`] – session, memory, transfer and run operations; non-zero
//!   result codes surface as [`rpc_dispatch::RpcError::Aborted`].
//! * [`RpcDevice`] – a device bound to one executor session.
//! * [`RpcAllocator`] / [`OneTimeAllocator`] – raw allocator shims over executor handles.
//! * [`KernelSerializer`] / [`Rendezvous`] – host collaborators a run needs.

mod allocator;
mod client;
mod device;
mod kernel;
mod rendezvous;
mod run;

pub use allocator::{OneTimeAllocator, RawAllocator, RpcAllocator};
pub use client::{
    AddrHandle, ExecClient, EXTEND_SESSION, LIST_DEVICES, PARTIAL_RUN_SETUP, RESET, RUN_STEP,
};
pub use device::RpcDevice;
pub use kernel::KernelSerializer;
pub use rendezvous::{LocalRendezvous, RecvCallback, RendezValue, Rendezvous};
