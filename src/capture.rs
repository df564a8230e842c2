//! Body capture for request inspection
//!
//! Capture diverts bodies so their content can be read after the downstream
//! handler completes, without altering the bytes the client ultimately
//! receives. The inbound side records what the handler consumes so it can be
//! replayed; the outbound side substitutes an in-memory buffer for the real
//! writer and flushes it back in the pipeline's cleanup phase.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The inbound request-body stream.
///
/// A body is either fully buffered (rewindable), a plain stream (consumed
/// once, not rewindable), or a recording stream that keeps a replay copy of
/// everything read through it. [`RequestBody::enable_buffering`] upgrades a
/// plain stream to a recording one; buffered bodies are already rewindable.
pub enum RequestBody {
    /// Fully buffered body; rewindable.
    Buffered { bytes: Bytes, pos: usize },
    /// Plain stream; reads are destructive and rewinding is unsupported.
    Streaming { reader: BoxReader },
    /// Stream with a replay copy of every byte read so far.
    Recording {
        reader: BoxReader,
        copy: Vec<u8>,
        pos: usize,
    },
}

impl RequestBody {
    /// A body backed by in-memory bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        RequestBody::Buffered {
            bytes: bytes.into(),
            pos: 0,
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// A body backed by a reader. Not rewindable unless buffering is enabled
    /// before the first read.
    pub fn streaming(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        RequestBody::Streaming {
            reader: Box::new(reader),
        }
    }

    /// Upgrade a plain stream to a recording stream so it can be replayed
    /// after downstream consumption. No-op for already-rewindable bodies.
    pub fn enable_buffering(&mut self) {
        if matches!(self, RequestBody::Streaming { .. }) {
            let prev = std::mem::replace(self, RequestBody::empty());
            if let RequestBody::Streaming { reader } = prev {
                *self = RequestBody::Recording {
                    reader,
                    copy: Vec::new(),
                    pos: 0,
                };
            }
        }
    }

    /// Whether this body can be rewound and re-read.
    pub fn is_rewindable(&self) -> bool {
        !matches!(self, RequestBody::Streaming { .. })
    }

    /// Reset the read position to zero. Returns false when the body does not
    /// support rewinding.
    pub fn rewind(&mut self) -> bool {
        match self {
            RequestBody::Buffered { pos, .. } | RequestBody::Recording { pos, .. } => {
                *pos = 0;
                true
            }
            RequestBody::Streaming { .. } => false,
        }
    }

    /// Read the remaining content of the body.
    pub async fn read_to_end(&mut self) -> io::Result<Bytes> {
        match self {
            RequestBody::Buffered { bytes, pos } => {
                let rest = bytes.slice(*pos..);
                *pos = bytes.len();
                Ok(rest)
            }
            RequestBody::Streaming { reader } => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).await?;
                Ok(Bytes::from(out))
            }
            RequestBody::Recording { reader, copy, pos } => {
                reader.read_to_end(copy).await?;
                let rest = Bytes::copy_from_slice(&copy[*pos..]);
                *pos = copy.len();
                Ok(rest)
            }
        }
    }

    /// Full body content as text, for telemetry.
    ///
    /// Rewinds to position zero and decodes everything as UTF-8 (lossy).
    /// Degrades to an empty string when the body cannot be rewound or read;
    /// capture never fails the request.
    pub async fn captured_text(&mut self) -> String {
        if !self.rewind() {
            return String::new();
        }
        match self.read_to_end().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Buffered { bytes, pos } => f
                .debug_struct("Buffered")
                .field("len", &bytes.len())
                .field("pos", pos)
                .finish(),
            RequestBody::Streaming { .. } => f.debug_struct("Streaming").finish_non_exhaustive(),
            RequestBody::Recording { copy, pos, .. } => f
                .debug_struct("Recording")
                .field("copied", &copy.len())
                .field("pos", pos)
                .finish_non_exhaustive(),
        }
    }
}

/// The outbound response-body sink.
///
/// Normally writes pass straight through to the real writer. When armed, the
/// sink diverts writes into an in-memory buffer; [`BodySink::flush_captured`]
/// copies the accumulated bytes to the real writer and restores pass-through.
/// Flush is the mandatory cleanup step and runs on every pipeline exit path.
/// If an armed sink is dropped with bytes still buffered (the host cancelled
/// the request before cleanup could run), the flush is finished on a spawned
/// task so the diverted bytes are not stranded.
pub struct BodySink {
    writer: BoxWriter,
    capture: Option<Vec<u8>>,
}

impl BodySink {
    /// A pass-through sink over the real output writer.
    pub fn direct(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            capture: None,
        }
    }

    /// Divert writes to an in-memory buffer. No-op if already armed.
    pub fn arm(&mut self) {
        if self.capture.is_none() {
            self.capture = Some(Vec::new());
        }
    }

    /// Whether writes are currently diverted to the capture buffer.
    pub fn is_armed(&self) -> bool {
        self.capture.is_some()
    }

    /// Write body bytes. Buffered writes cannot fail; direct writes surface
    /// the writer's error.
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        match &mut self.capture {
            Some(buffer) => {
                buffer.extend_from_slice(buf);
                Ok(())
            }
            None => self.writer.write_all(buf).await,
        }
    }

    /// The captured bytes decoded as text, if armed.
    pub fn captured_text(&self) -> Option<String> {
        self.capture
            .as_ref()
            .map(|buffer| String::from_utf8_lossy(buffer).into_owned())
    }

    /// Copy the capture buffer to the real writer and restore pass-through.
    ///
    /// No-op when not armed. Pass-through is restored even when the copy
    /// fails, so a later write does not hit a stale buffer.
    pub async fn flush_captured(&mut self) -> io::Result<()> {
        let buffer = match self.capture.take() {
            Some(buffer) => buffer,
            None => return Ok(()),
        };
        self.writer.write_all(&buffer).await?;
        self.writer.flush().await
    }
}

// An armed sink holds bytes the client has not seen yet. When the sink is
// dropped without the cleanup flush having run, the remaining copy is handed
// to the runtime; outside a runtime the bytes are unrecoverable.
impl Drop for BodySink {
    fn drop(&mut self) {
        let buffer = match self.capture.take() {
            Some(buffer) if !buffer.is_empty() => buffer,
            _ => return,
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let mut writer = std::mem::replace(&mut self.writer, Box::new(tokio::io::sink()));
            handle.spawn(async move {
                let _ = writer.write_all(&buffer).await;
                let _ = writer.flush().await;
            });
        }
    }
}

impl std::fmt::Debug for BodySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.capture {
            None => f.debug_struct("Direct").finish_non_exhaustive(),
            Some(buffer) => f
                .debug_struct("Captured")
                .field("buffered", &buffer.len())
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    /// Test writer that exposes everything written to it.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl AsyncWrite for SharedSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    #[test]
    fn test_buffered_body_rewinds_and_rereads() {
        rt().block_on(async {
            let mut body = RequestBody::from_bytes("hello world");
            let first = body.read_to_end().await.unwrap();
            assert_eq!(&first[..], b"hello world");

            let drained = body.read_to_end().await.unwrap();
            assert!(drained.is_empty());

            assert!(body.rewind());
            let again = body.read_to_end().await.unwrap();
            assert_eq!(&again[..], b"hello world");
        });
    }

    #[test]
    fn test_streaming_body_is_not_rewindable() {
        rt().block_on(async {
            let mut body = RequestBody::streaming(Cursor::new(b"payload".to_vec()));
            assert!(!body.is_rewindable());
            assert!(!body.rewind());
            assert_eq!(body.captured_text().await, "");
        });
    }

    #[test]
    fn test_recording_body_replays_consumed_content() {
        rt().block_on(async {
            let mut body = RequestBody::streaming(Cursor::new(b"consumed once".to_vec()));
            body.enable_buffering();

            // Downstream consumes the whole stream.
            let read = body.read_to_end().await.unwrap();
            assert_eq!(&read[..], b"consumed once");

            // Capture can still see the full content afterwards.
            assert_eq!(body.captured_text().await, "consumed once");
        });
    }

    #[test]
    fn test_recording_body_captures_unread_remainder() {
        rt().block_on(async {
            let mut body = RequestBody::streaming(Cursor::new(b"never read".to_vec()));
            body.enable_buffering();
            // Downstream never touches the body; capture reads it all.
            assert_eq!(body.captured_text().await, "never read");
        });
    }

    #[test]
    fn test_enable_buffering_is_noop_for_buffered() {
        let mut body = RequestBody::from_bytes("abc");
        body.enable_buffering();
        assert!(matches!(body, RequestBody::Buffered { .. }));
    }

    #[test]
    fn test_direct_sink_passes_writes_through() {
        rt().block_on(async {
            let out = SharedSink::default();
            let mut sink = BodySink::direct(out.clone());
            sink.write(b"direct bytes").await.unwrap();
            assert_eq!(out.contents(), b"direct bytes");
            assert!(sink.captured_text().is_none());
        });
    }

    #[test]
    fn test_armed_sink_diverts_until_flush() {
        rt().block_on(async {
            let out = SharedSink::default();
            let mut sink = BodySink::direct(out.clone());
            sink.arm();

            sink.write(b"part one, ").await.unwrap();
            sink.write(b"part two").await.unwrap();

            // Nothing reaches the real writer until cleanup.
            assert!(out.contents().is_empty());
            assert_eq!(sink.captured_text().unwrap(), "part one, part two");

            sink.flush_captured().await.unwrap();
            assert_eq!(out.contents(), b"part one, part two");
            assert!(!sink.is_armed());
        });
    }

    #[test]
    fn test_flush_without_arming_is_noop() {
        rt().block_on(async {
            let out = SharedSink::default();
            let mut sink = BodySink::direct(out.clone());
            sink.flush_captured().await.unwrap();
            assert!(out.contents().is_empty());
        });
    }

    #[test]
    fn test_dropping_armed_sink_releases_buffered_bytes() {
        rt().block_on(async {
            let out = SharedSink::default();
            {
                let mut sink = BodySink::direct(out.clone());
                sink.arm();
                sink.write(b"salvaged").await.unwrap();
            }
            // The remaining copy runs on a spawned task.
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            assert_eq!(out.contents(), b"salvaged");
        });
    }

    #[test]
    fn test_dropping_flushed_sink_writes_nothing_more() {
        rt().block_on(async {
            let out = SharedSink::default();
            {
                let mut sink = BodySink::direct(out.clone());
                sink.arm();
                sink.write(b"once").await.unwrap();
                sink.flush_captured().await.unwrap();
            }
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            assert_eq!(out.contents(), b"once");
        });
    }

    #[test]
    fn test_writes_after_flush_go_direct() {
        rt().block_on(async {
            let out = SharedSink::default();
            let mut sink = BodySink::direct(out.clone());
            sink.arm();
            sink.write(b"buffered").await.unwrap();
            sink.flush_captured().await.unwrap();
            sink.write(b" + direct").await.unwrap();
            assert_eq!(out.contents(), b"buffered + direct");
        });
    }
}
