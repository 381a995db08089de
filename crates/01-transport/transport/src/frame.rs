use smallvec::SmallVec;

use crate::TransportResult;

/// One multipart message. Executor traffic is three frames wide in the common case.
pub type Multipart = SmallVec<[Vec<u8>; 4]>;

/// A single frame read off a [`FrameSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    /// Another frame of the same multipart message follows.
    pub more: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, more: bool) -> Self {
        Self { data, more }
    }
}

/// Outbound half of a transport.
///
/// A sink is not required to be safe for concurrent use; callers serialize
/// access themselves so that the frames of one message are never interleaved
/// with another's.
pub trait FrameSink: Send {
    fn send_multipart(&mut self, frames: &[&[u8]]) -> TransportResult<()>;
}

/// Inbound half of a transport, addressed by the identity it was opened with.
pub trait FrameSource: Send {
    /// Blocks until the next frame arrives.
    ///
    /// Returns [`crate::TransportError::Closed`] once the owning transport has
    /// been shut down.
    fn recv_frame(&mut self) -> TransportResult<Frame>;
}

/// Connects sinks and sources to one executor endpoint.
pub trait Transport: Send + Sync + 'static {
    fn open_sink(&self) -> TransportResult<Box<dyn FrameSink>>;

    /// Opens a source whose traffic is routed by `identity`.
    fn open_source(&self, identity: &[u8]) -> TransportResult<Box<dyn FrameSource>>;

    /// Interrupts every blocked source. Sinks opened before the call must
    /// already be dropped or idle.
    fn shutdown(&self);
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn open_sink(&self) -> TransportResult<Box<dyn FrameSink>> {
        (**self).open_sink()
    }

    fn open_source(&self, identity: &[u8]) -> TransportResult<Box<dyn FrameSource>> {
        (**self).open_source(identity)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

/// Reads frames until the end of the current multipart message.
pub fn read_multipart(source: &mut dyn FrameSource) -> TransportResult<Multipart> {
    let mut parts = Multipart::new();
    loop {
        let frame = source.recv_frame()?;
        parts.push(frame.data);
        if !frame.more {
            return Ok(parts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<TransportResult<Frame>>);

    impl FrameSource for Scripted {
        fn recv_frame(&mut self) -> TransportResult<Frame> {
            self.0.pop_front().unwrap_or(Err(TransportError::Closed))
        }
    }

    #[test]
    fn read_multipart_stops_at_last_frame() {
        let mut source = Scripted(VecDeque::from(vec![
            Ok(Frame::new(vec![], true)),
            Ok(Frame::new(b"env".to_vec(), true)),
            Ok(Frame::new(b"body".to_vec(), false)),
            Ok(Frame::new(b"next".to_vec(), false)),
        ]));
        let first = read_multipart(&mut source).expect("first message");
        assert_eq!(first.len(), 3);
        assert_eq!(first[1], b"env");
        let second = read_multipart(&mut source).expect("second message");
        assert_eq!(second.as_slice(), &[b"next".to_vec()]);
    }

    #[test]
    fn read_multipart_propagates_close() {
        let mut source = Scripted(VecDeque::from(vec![Ok(Frame::new(vec![1], true))]));
        assert_eq!(read_multipart(&mut source), Err(TransportError::Closed));
    }
}
