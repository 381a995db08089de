//! ZeroMQ DEALER backend.
//!
//! Outbound traffic goes through one DEALER socket connected to the executor.
//! Replies arrive on a second DEALER socket carrying the caller's routing
//! identity, so the executor can address it from its ROUTER side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::{Frame, FrameSink, FrameSource, Transport, TransportError, TransportResult};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ZmqTransport {
    ctx: zmq::Context,
    addr: String,
    closed: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ZmqTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            ctx: zmq::Context::new(),
            addr: addr.into(),
            closed: Arc::new(AtomicBool::new(false)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often a blocked source re-checks for shutdown.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn dealer(&self) -> TransportResult<zmq::Socket> {
        let socket = self
            .ctx
            .socket(zmq::DEALER)
            .map_err(|err| self.connect_error(err))?;
        socket.set_linger(0).map_err(|err| self.connect_error(err))?;
        Ok(socket)
    }

    fn connect_error(&self, err: zmq::Error) -> TransportError {
        TransportError::Connect {
            addr: self.addr.clone(),
            reason: err.to_string(),
        }
    }
}

impl Transport for ZmqTransport {
    fn open_sink(&self) -> TransportResult<Box<dyn FrameSink>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let socket = self.dealer()?;
        socket
            .connect(&self.addr)
            .map_err(|err| self.connect_error(err))?;
        debug!(addr = %self.addr, "send socket connected");
        Ok(Box::new(ZmqSink { socket }))
    }

    fn open_source(&self, identity: &[u8]) -> TransportResult<Box<dyn FrameSource>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let socket = self.dealer()?;
        socket
            .set_identity(identity)
            .map_err(|err| self.connect_error(err))?;
        let timeout_ms = i32::try_from(self.poll_interval.as_millis()).unwrap_or(i32::MAX);
        socket
            .set_rcvtimeo(timeout_ms)
            .map_err(|err| self.connect_error(err))?;
        socket
            .connect(&self.addr)
            .map_err(|err| self.connect_error(err))?;
        debug!(
            addr = %self.addr,
            identity = %String::from_utf8_lossy(identity),
            "receive socket connected"
        );
        Ok(Box::new(ZmqSource {
            socket,
            closed: Arc::clone(&self.closed),
        }))
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct ZmqSink {
    socket: zmq::Socket,
}

impl FrameSink for ZmqSink {
    fn send_multipart(&mut self, frames: &[&[u8]]) -> TransportResult<()> {
        self.socket
            .send_multipart(frames.iter().copied(), 0)
            .map_err(|err| match err {
                zmq::Error::ETERM => TransportError::Closed,
                other => TransportError::Send(other.to_string()),
            })
    }
}

struct ZmqSource {
    socket: zmq::Socket,
    closed: Arc<AtomicBool>,
}

impl FrameSource for ZmqSource {
    fn recv_frame(&mut self) -> TransportResult<Frame> {
        loop {
            match self.socket.recv_bytes(0) {
                Ok(data) => {
                    let more = self
                        .socket
                        .get_rcvmore()
                        .map_err(|err| TransportError::Recv(err.to_string()))?;
                    return Ok(Frame::new(data, more));
                }
                Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(TransportError::Closed);
                    }
                }
                Err(zmq::Error::ETERM) => return Err(TransportError::Closed),
                Err(err) => return Err(TransportError::Recv(err.to_string())),
            }
        }
    }
}
