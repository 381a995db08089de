//! In-process transport with a router-style server end.
//!
//! Every sink opened on a [`MemTransport`] delivers whole multipart messages to
//! the paired [`MemRouter`], tagged with the sink's peer number. The router
//! answers by addressing a source identity, mirroring how an executor replies
//! to the client's receive socket.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::trace;

use crate::{Frame, FrameSink, FrameSource, Multipart, Transport, TransportError, TransportResult};

/// A message captured by the router together with the sink that sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedMessage {
    pub peer: u64,
    pub frames: Multipart,
}

struct Shared {
    inbound: Sender<RoutedMessage>,
    routes: Mutex<HashMap<Vec<u8>, Sender<Multipart>>>,
    // Dropping the sender disconnects every clone of the receiver, which wakes
    // all blocked sources at once.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    next_peer: AtomicU64,
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        matches!(
            self.shutdown_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }
}

/// Client side of the in-process transport.
#[derive(Clone)]
pub struct MemTransport {
    shared: Arc<Shared>,
}

/// Server side of the in-process transport.
pub struct MemRouter {
    inbound: Receiver<RoutedMessage>,
    shared: Arc<Shared>,
}

impl MemTransport {
    /// Creates a connected transport/router pair.
    pub fn pair() -> (MemTransport, MemRouter) {
        let (inbound_tx, inbound_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();
        let shared = Arc::new(Shared {
            inbound: inbound_tx,
            routes: Mutex::new(HashMap::new()),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            next_peer: AtomicU64::new(1),
        });
        (
            MemTransport {
                shared: Arc::clone(&shared),
            },
            MemRouter {
                inbound: inbound_rx,
                shared,
            },
        )
    }
}

impl Transport for MemTransport {
    fn open_sink(&self) -> TransportResult<Box<dyn FrameSink>> {
        if self.shared.is_shut_down() {
            return Err(TransportError::Closed);
        }
        let peer = self.shared.next_peer.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemSink {
            peer,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn open_source(&self, identity: &[u8]) -> TransportResult<Box<dyn FrameSource>> {
        if self.shared.is_shut_down() {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = unbounded();
        self.shared.routes.lock().insert(identity.to_vec(), tx);
        Ok(Box::new(MemSource {
            rx,
            shutdown: self.shared.shutdown_rx.clone(),
            pending: VecDeque::new(),
        }))
    }

    fn shutdown(&self) {
        self.shared.shutdown_tx.lock().take();
    }
}

struct MemSink {
    peer: u64,
    shared: Arc<Shared>,
}

impl FrameSink for MemSink {
    fn send_multipart(&mut self, frames: &[&[u8]]) -> TransportResult<()> {
        if self.shared.is_shut_down() {
            return Err(TransportError::Closed);
        }
        let message = RoutedMessage {
            peer: self.peer,
            frames: frames.iter().map(|frame| frame.to_vec()).collect(),
        };
        self.shared
            .inbound
            .send(message)
            .map_err(|_| TransportError::Disconnected)
    }
}

struct MemSource {
    rx: Receiver<Multipart>,
    shutdown: Receiver<()>,
    pending: VecDeque<Vec<u8>>,
}

impl FrameSource for MemSource {
    fn recv_frame(&mut self) -> TransportResult<Frame> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Ok(Frame::new(data, !self.pending.is_empty()));
            }
            select! {
                recv(self.rx) -> message => match message {
                    Ok(frames) => self.pending.extend(frames),
                    Err(_) => return Err(TransportError::Disconnected),
                },
                recv(self.shutdown) -> _ => return Err(TransportError::Closed),
            }
        }
    }
}

impl MemRouter {
    /// Blocks until a client sink delivers a message.
    pub fn recv(&self) -> TransportResult<RoutedMessage> {
        self.inbound.recv().map_err(|_| TransportError::Disconnected)
    }

    /// Waits up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> TransportResult<Option<RoutedMessage>> {
        match self.inbound.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Option<RoutedMessage> {
        self.inbound.try_recv().ok()
    }

    /// Delivers a multipart message to the source opened with `identity`.
    pub fn send_to(&self, identity: &[u8], frames: Multipart) -> TransportResult<()> {
        let route = self
            .shared
            .routes
            .lock()
            .get(identity)
            .cloned()
            .ok_or_else(|| {
                TransportError::UnknownRoute(String::from_utf8_lossy(identity).into_owned())
            })?;
        trace!(
            identity = %String::from_utf8_lossy(identity),
            frames = frames.len(),
            "router send"
        );
        route
            .send(frames)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Identities of every source opened so far.
    pub fn identities(&self) -> Vec<Vec<u8>> {
        self.shared.routes.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_multipart;
    use smallvec::smallvec;
    use std::thread;

    #[test]
    fn sink_messages_reach_router_whole() {
        let (transport, router) = MemTransport::pair();
        let mut sink = transport.open_sink().expect("sink");
        sink.send_multipart(&[b"", b"env", b"body"]).expect("send");
        let message = router.recv().expect("recv");
        assert_eq!(message.frames.len(), 3);
        assert!(message.frames[0].is_empty());
        assert_eq!(message.frames[2], b"body");
    }

    #[test]
    fn router_replies_by_identity() {
        let (transport, router) = MemTransport::pair();
        let mut source = transport.open_source(b"recv-1").expect("source");
        router
            .send_to(b"recv-1", smallvec![vec![], b"reply".to_vec()])
            .expect("route");
        let frames = read_multipart(source.as_mut()).expect("frames");
        assert_eq!(frames.as_slice(), &[vec![], b"reply".to_vec()]);

        let err = router.send_to(b"nobody", smallvec![vec![]]).unwrap_err();
        assert!(matches!(err, TransportError::UnknownRoute(_)));
    }

    #[test]
    fn shutdown_wakes_blocked_source() {
        let (transport, _router) = MemTransport::pair();
        let mut source = transport.open_source(b"recv").expect("source");
        let waiter = thread::spawn(move || source.recv_frame());
        thread::sleep(Duration::from_millis(20));
        transport.shutdown();
        let result = waiter.join().expect("join");
        assert_eq!(result, Err(TransportError::Closed));

        assert!(matches!(transport.open_sink(), Err(TransportError::Closed)));
    }

    #[test]
    fn send_fails_once_router_is_gone() {
        let (transport, router) = MemTransport::pair();
        let mut sink = transport.open_sink().expect("sink");
        drop(router);
        assert_eq!(
            sink.send_multipart(&[b""]),
            Err(TransportError::Disconnected)
        );
    }
}
