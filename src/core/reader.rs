//! Background reader bound to one stream generation.
//!
//! One reader thread exists per open connection. It accumulates bytes into
//! line-sized chunks and forwards them to the dispatch thread over a
//! channel; it never touches session state. Cancellation is a cooperative
//! atomic flag checked before each read, so shutdown latency is bounded by
//! the stream's read timeout.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::stream::ByteStream;
use crate::format::LINE_TERMINATOR;

/// Upper bound for a single read call.
pub const READ_CHUNK: usize = 64;

/// Events forwarded to the dispatch thread. Each event carries the stream
/// generation its reader was bound to, so chunks from a stream that has
/// since been replaced can be dropped.
#[derive(Debug)]
pub enum ReaderEvent {
    /// A complete line or a timeout-flushed partial chunk.
    Chunk { generation: u64, bytes: Vec<u8> },
    /// A hard (non-timeout) read failure. The reader has stopped.
    Fatal { generation: u64, error: io::Error },
}

/// Handle to a running reader thread.
///
/// Dropping the handle requests cancellation and joins the thread; by the
/// time the drop returns, the reader's stream handle has been released.
pub struct ReaderHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    generation: u64,
}

impl ReaderHandle {
    /// Spawn a reader over its own stream handle, bound to `generation`.
    pub fn spawn(
        mut stream: Box<dyn ByteStream>,
        generation: u64,
        events: Sender<ReaderEvent>,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let thread = thread::spawn(move || {
            run(stream.as_mut(), generation, &flag, &events);
            debug!("reader for generation {} stopped", generation);
        });
        Self {
            cancel,
            thread: Some(thread),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel and wait for the thread to exit.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The reader loop.
///
/// Timeouts flush the accumulation buffer; data is flushed as soon as the
/// buffer ends with the line terminator. A partial buffer left at
/// cancellation is discarded, not delivered.
fn run(
    stream: &mut dyn ByteStream,
    generation: u64,
    cancel: &AtomicBool,
    events: &Sender<ReaderEvent>,
) {
    let mut buf = [0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK);

    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        match stream.read(&mut buf) {
            // EOF-style "no data": treat like a timeout.
            Ok(0) => {
                if !flush_pending(&mut pending, generation, events) {
                    return;
                }
            }
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                if pending.ends_with(&[LINE_TERMINATOR])
                    && !flush_pending(&mut pending, generation, events)
                {
                    return;
                }
            }
            Err(e) if is_timeout(&e) => {
                if !flush_pending(&mut pending, generation, events) {
                    return;
                }
            }
            Err(e) => {
                let _ = events.send(ReaderEvent::Fatal {
                    generation,
                    error: e,
                });
                return;
            }
        }
    }
}

/// Send the accumulated bytes, if any. Returns false when the receiving
/// side is gone and the reader should stop.
fn flush_pending(pending: &mut Vec<u8>, generation: u64, events: &Sender<ReaderEvent>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let bytes = std::mem::take(pending);
    events
        .send(ReaderEvent::Chunk { generation, bytes })
        .is_ok()
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::ConnectionError;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::Mutex;

    enum Step {
        Data(&'static [u8]),
        /// Data delivered together with the stop signal, as when a command
        /// cancels the reader while a read is in flight.
        DataThenCancel(&'static [u8]),
        Timeout,
        Error(io::ErrorKind),
    }

    /// Stream that replays a script, then raises the cancel flag so `run`
    /// returns deterministically.
    struct ScriptedStream {
        steps: Mutex<VecDeque<Step>>,
        cancel: Arc<AtomicBool>,
    }

    impl ScriptedStream {
        fn new(steps: Vec<Step>, cancel: Arc<AtomicBool>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                cancel,
            }
        }
    }

    impl ByteStream for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let step = self.steps.lock().expect("lock").pop_front();
            match step {
                Some(Step::Data(data)) => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Some(Step::DataThenCancel(data)) => {
                    self.cancel.store(true, Ordering::SeqCst);
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Some(Step::Timeout) => Err(io::ErrorKind::TimedOut.into()),
                Some(Step::Error(kind)) => Err(io::Error::new(kind, "scripted failure")),
                None => {
                    self.cancel.store(true, Ordering::SeqCst);
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }

        fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn try_clone_reader(&self) -> Result<Box<dyn ByteStream>, ConnectionError> {
            Err(ConnectionError::Config("scripted stream".to_string()))
        }
    }

    fn run_script(steps: Vec<Step>) -> Vec<ReaderEvent> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stream = ScriptedStream::new(steps, Arc::clone(&cancel));
        let (tx, rx) = mpsc::channel();
        run(&mut stream, 1, &cancel, &tx);
        drop(tx);
        rx.try_iter().collect()
    }

    #[test]
    fn test_complete_line_flushed_once() {
        let events = run_script(vec![Step::Data(b"pong\n")]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ReaderEvent::Chunk { generation, bytes } => {
                assert_eq!(*generation, 1);
                assert_eq!(bytes, b"pong\n");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_no_line_loss_across_split_reads() {
        let events = run_script(vec![Step::Data(b"he"), Step::Data(b"llo"), Step::Data(b"!\n")]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ReaderEvent::Chunk { bytes, .. } => assert_eq!(bytes, b"hello!\n"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_flushes_partial_buffer() {
        let events = run_script(vec![Step::Data(b"> "), Step::Timeout]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ReaderEvent::Chunk { bytes, .. } => assert_eq!(bytes, b"> "),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_with_empty_buffer_is_silent() {
        let events = run_script(vec![Step::Timeout, Step::Timeout]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_hard_error_is_fatal() {
        let events = run_script(vec![Step::Error(io::ErrorKind::PermissionDenied)]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReaderEvent::Fatal { generation: 1, .. }));
    }

    #[test]
    fn test_cancellation_discards_partial_buffer() {
        let events = run_script(vec![Step::DataThenCancel(b"half a li")]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_handle_stop_joins_thread() {
        let cancel_probe = Arc::new(AtomicBool::new(false));
        let stream = ScriptedStream::new(vec![Step::Data(b"x\n")], Arc::clone(&cancel_probe));
        let (tx, rx) = mpsc::channel();
        let handle = ReaderHandle::spawn(Box::new(stream), 7, tx);
        assert_eq!(handle.generation(), 7);
        let event = rx.recv_timeout(std::time::Duration::from_secs(1)).expect("chunk");
        assert!(matches!(event, ReaderEvent::Chunk { generation: 7, .. }));
        handle.stop();
    }
}
