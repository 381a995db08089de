//! Scriptable in-process executor for exercising the RPC client end to end.
//!
//! [`MockExecutor`] serves the router side of a [`transport::MemTransport`],
//! answers every request kind with canned results from a [`Script`], and
//! records what it received so tests can assert on the wire traffic.

mod executor;
mod script;

pub use executor::{MockExecutor, Received};
pub use script::Script;
