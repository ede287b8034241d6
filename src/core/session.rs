//! Session management.
//!
//! `SessionController` is the single owner of all mutable session state:
//! the active `Config`, the `Settings`, the connection flag, the write-side
//! stream handle and the stream generation counter. All command handling
//! runs on one dispatch thread, one completed input line at a time, so none
//! of this state needs a lock. The reader thread is the only other actor
//! and it communicates exclusively through the event channel drained by
//! `process_events`.

use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{error, info, warn};

use super::reader::{ReaderEvent, ReaderHandle};
use super::stream::{ByteStream, ConnectionError, PortOpener};
use crate::config::{Config, Settings};
use crate::fields;
use crate::format;
use crate::ui::{LineStyle, Surface};

/// What the caller should do after handing the session an input line or
/// draining reader events.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    /// `:exit`: shut down with success.
    Exit,
    /// Unrecoverable read failure: shut down with the given message.
    Fatal(String),
}

pub struct SessionController {
    config: Config,
    settings: Settings,
    connected: bool,
    /// Write side of the open stream. The reader owns its own clone.
    stream: Option<Box<dyn ByteStream>>,
    reader: Option<ReaderHandle>,
    /// Incremented on every successful open; reader events carrying an
    /// older generation belong to a closed stream and are dropped.
    generation: u64,
    opener: Box<dyn PortOpener>,
    events_tx: Sender<ReaderEvent>,
    events_rx: Receiver<ReaderEvent>,
}

impl SessionController {
    pub fn new(config: Config, opener: Box<dyn PortOpener>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            settings: Settings::default(),
            connected: false,
            stream: None,
            reader: None,
            generation: 0,
            opener,
            events_tx,
            events_rx,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Open a stream for the current config and start its reader.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        let config = self.config.clone();
        self.open_stream(&config)
    }

    fn open_stream(&mut self, config: &Config) -> Result<(), ConnectionError> {
        let stream = self.opener.open(config)?;
        let reader_stream = stream.try_clone_reader()?;
        self.generation += 1;
        self.reader = Some(ReaderHandle::spawn(
            reader_stream,
            self.generation,
            self.events_tx.clone(),
        ));
        self.stream = Some(stream);
        self.connected = true;
        info!("connected to {} (generation {})", config.path, self.generation);
        Ok(())
    }

    /// Stop the reader, flush and drop the stream. Idempotent.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            // Joins the reader thread; bounded by the read timeout.
            reader.stop();
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush();
            info!("closed stream (generation {})", self.generation);
        }
        self.connected = false;
    }

    /// Atomically replace the active config.
    ///
    /// On open failure the previous connection is restored best-effort and
    /// the original error is returned either way; a failed rollback leaves
    /// the session disconnected.
    pub fn reconfigure(&mut self, candidate: Config) -> Result<(), ConnectionError> {
        if candidate.path.is_empty() {
            // Nothing to connect to yet: adopt the config and stay
            // disconnected. Only reachable before the first connect, since
            // the path field rejects empty values.
            self.config = candidate;
            return Ok(());
        }

        let was_connected = self.connected;
        let previous = self.config.clone();
        self.close();

        match self.open_stream(&candidate) {
            Ok(()) => {
                self.config = candidate;
                Ok(())
            }
            Err(err) => {
                if was_connected {
                    if let Err(rollback_err) = self.open_stream(&previous) {
                        warn!("rollback to previous config failed: {}", rollback_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Drain pending reader events, rendering chunks onto the surface.
    ///
    /// Events are accepted only from the reader currently bound to the
    /// session; anything older belongs to a closed stream.
    pub fn process_events(&mut self, surface: &mut dyn Surface) -> ControlFlow {
        let active = self.reader.as_ref().map(ReaderHandle::generation);
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ReaderEvent::Chunk { generation, bytes } => {
                    if Some(generation) != active || !self.connected {
                        continue;
                    }
                    if self.settings.quiet {
                        continue;
                    }
                    for line in format::format_inbound(&bytes, &self.settings) {
                        surface.push(line, LineStyle::Inbound);
                    }
                }
                ReaderEvent::Fatal { generation, error } => {
                    if Some(generation) != active {
                        continue;
                    }
                    error!("fatal read error: {}", error);
                    surface.push(format!("[error] read failed: {}", error), LineStyle::Error);
                    self.connected = false;
                    return ControlFlow::Fatal(format!("read failed: {}", error));
                }
            }
        }
        ControlFlow::Continue
    }

    /// Handle one completed input line.
    pub fn dispatch(&mut self, input: &str, surface: &mut dyn Surface) -> ControlFlow {
        if input.is_empty() {
            return ControlFlow::Continue;
        }

        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or("");

        match command {
            ":help" => self.cmd_help(surface),
            ":clear" => surface.clear(),
            ":info" => {
                surface.push(input.to_string(), LineStyle::Echo);
                self.push_info(surface);
            }
            ":get" => {
                surface.push(input.to_string(), LineStyle::Echo);
                self.cmd_get(parts.next(), surface);
            }
            ":set" => {
                surface.push(input.to_string(), LineStyle::Echo);
                let key = parts.next().unwrap_or("");
                let value = parts.next().unwrap_or("");
                self.cmd_set(key, value, surface);
            }
            ":exit" => {
                self.close();
                return ControlFlow::Exit;
            }
            _ => self.cmd_write(input, surface),
        }
        ControlFlow::Continue
    }

    fn cmd_help(&self, surface: &mut dyn Surface) {
        for line in [
            "help (commands start with ':')",
            "  :help                 show this help dialog",
            "  :info                 dump the current config and settings",
            "  :get <key>            print one config value       example: ':get baud'",
            "  :set <key> <value>    change a config or setting   example: ':set baud 19200'",
            "  :set <key>            toggle mode/eol/verbose/quiet",
            "  :clear                clear the screen",
            "  :exit                 exit (Esc works too)",
            "all other input is sent to the serial connection",
        ] {
            surface.push(line.to_string(), LineStyle::Info);
        }
    }

    fn push_info(&self, surface: &mut dyn Surface) {
        for (key, value) in fields::config_entries(&self.config) {
            surface.push(format!("=>  {}: {}", key, value), LineStyle::Info);
        }
        for (key, value) in fields::settings_entries(&self.settings) {
            surface.push(format!("=>  {}: {}", key, value), LineStyle::Info);
        }
    }

    fn cmd_get(&self, key: Option<&str>, surface: &mut dyn Surface) {
        let Some(key) = key else {
            surface.push(
                "[error] ':get' needs a key. example: ':get baud'".to_string(),
                LineStyle::Error,
            );
            return;
        };
        match fields::get_config_field(&self.config, key) {
            Ok(value) => surface.push(format!("=> {}", value), LineStyle::Info),
            Err(e) => surface.push(format!("[error] {}", e), LineStyle::Error),
        }
    }

    fn cmd_set(&mut self, key: &str, value: &str, surface: &mut dyn Surface) {
        if key.is_empty() {
            surface.push(
                "[error] ':set' needs a key. example: ':set baud 19200'".to_string(),
                LineStyle::Error,
            );
            return;
        }

        if fields::is_config_key(key) {
            let candidate = match fields::set_config_field(&self.config, key, value) {
                Ok(candidate) => candidate,
                Err(e) => {
                    surface.push(format!("[error] {}", e), LineStyle::Error);
                    return;
                }
            };
            let was_connected = self.connected;
            match self.reconfigure(candidate) {
                Ok(()) => {
                    surface.push(format!("=> {}: {}", key, value), LineStyle::Info);
                    if !was_connected && self.connected {
                        surface.push("connection success".to_string(), LineStyle::Success);
                        self.push_info(surface);
                    }
                }
                Err(e) => surface.push(format!("[error] {}", e), LineStyle::Error),
            }
            return;
        }

        if fields::is_setting_key(key) {
            match fields::set_setting_field(&mut self.settings, key, value) {
                Ok(applied) => surface.push(format!("=> {}: {}", key, applied), LineStyle::Info),
                Err(e) => surface.push(format!("[error] {}", e), LineStyle::Error),
            }
            return;
        }

        surface.push(
            format!("[error] {}", fields::FieldError::InvalidField(key.to_string())),
            LineStyle::Error,
        );
    }

    /// Send an input line to the device.
    fn cmd_write(&mut self, input: &str, surface: &mut dyn Surface) {
        if !self.connected {
            surface.push(
                "not connected. use ':set path <device>' to connect".to_string(),
                LineStyle::Warning,
            );
            return;
        }

        // A line starting with '::' escapes the command prefix.
        let input = if input.starts_with("::") {
            &input[1..]
        } else {
            input
        };

        let encoded = format::encode_outgoing(input, &self.settings);
        for warning in &encoded.warnings {
            surface.push(warning.clone(), LineStyle::Warning);
        }
        if encoded.bytes.is_empty() {
            return;
        }

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if let Err(e) = stream.write_all(&encoded.bytes) {
            error!("write failed: {}", e);
            surface.push(format!("[error] write failed: {}", e), LineStyle::Error);
            return;
        }

        if !self.settings.quiet {
            for line in format::format_outbound(input, &encoded.bytes, &self.settings) {
                surface.push(line, LineStyle::Outbound);
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Surface that records pushed lines for assertions.
    #[derive(Default)]
    struct RecordingSurface {
        lines: Vec<(String, LineStyle)>,
        cleared: bool,
    }

    impl Surface for RecordingSurface {
        fn push(&mut self, line: String, style: LineStyle) {
            self.lines.push((line, style));
        }

        fn clear(&mut self) {
            self.cleared = true;
            self.lines.clear();
        }
    }

    impl RecordingSurface {
        fn contains(&self, needle: &str) -> bool {
            self.lines.iter().any(|(line, _)| line.contains(needle))
        }
    }

    /// In-memory stream: reads follow a script, writes land in a shared
    /// buffer the test can inspect.
    struct FakeStream {
        written: Arc<Mutex<Vec<u8>>>,
        reads: Arc<Mutex<Vec<io::Result<Vec<u8>>>>>,
    }

    impl ByteStream for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let next = self.reads.lock().expect("lock").pop();
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    // Pace the reader like a real timeout would.
                    std::thread::sleep(Duration::from_millis(1));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.written.lock().expect("lock").extend_from_slice(buf);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn try_clone_reader(&self) -> Result<Box<dyn ByteStream>, ConnectionError> {
            Ok(Box::new(FakeStream {
                written: Arc::clone(&self.written),
                reads: Arc::clone(&self.reads),
            }))
        }
    }

    /// Opener that fails for chosen baud rates and records open calls.
    struct FakeOpener {
        fail_bauds: HashSet<u32>,
        written: Arc<Mutex<Vec<u8>>>,
        reads: Arc<Mutex<Vec<io::Result<Vec<u8>>>>>,
        opens: Arc<AtomicUsize>,
    }

    impl FakeOpener {
        fn new() -> Self {
            Self {
                fail_bauds: HashSet::new(),
                written: Arc::new(Mutex::new(Vec::new())),
                reads: Arc::new(Mutex::new(Vec::new())),
                opens: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing_for(baud: u32) -> Self {
            let mut opener = Self::new();
            opener.fail_bauds.insert(baud);
            opener
        }
    }

    impl PortOpener for FakeOpener {
        fn open(&self, config: &Config) -> Result<Box<dyn ByteStream>, ConnectionError> {
            if config.path.is_empty() {
                return Err(ConnectionError::NoDevicePath);
            }
            if self.fail_bauds.contains(&config.baud) {
                return Err(ConnectionError::Config(format!(
                    "refusing {} baud",
                    config.baud
                )));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                written: Arc::clone(&self.written),
                reads: Arc::clone(&self.reads),
            }))
        }
    }

    fn session_with(opener: FakeOpener) -> SessionController {
        let config = Config {
            path: "/dev/fake0".to_string(),
            ..Config::default()
        };
        SessionController::new(config, Box::new(opener))
    }

    /// Drain events until something happens or a deadline passes.
    fn poll_events(session: &mut SessionController, surface: &mut RecordingSurface) -> ControlFlow {
        for _ in 0..200 {
            let before = surface.lines.len();
            let flow = session.process_events(surface);
            if flow != ControlFlow::Continue || surface.lines.len() > before {
                return flow;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        ControlFlow::Continue
    }

    #[test]
    fn test_set_path_connects_and_dumps_info() {
        let opener = FakeOpener::new();
        let mut session = SessionController::new(Config::default(), Box::new(opener));
        let mut surface = RecordingSurface::default();

        assert!(!session.connected());
        let flow = session.dispatch(":set path /dev/fake0", &mut surface);
        assert_eq!(flow, ControlFlow::Continue);
        assert!(session.connected());
        assert!(surface.contains("connection success"));
        assert!(surface.contains("=>  baud: 115200"));
    }

    #[test]
    fn test_reconfigure_rolls_back_on_failure() {
        let opener = FakeOpener::failing_for(9600);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("initial connect");
        assert!(session.connected());

        session.dispatch(":set baud 9600", &mut surface);

        // Original error surfaced, old config and connection restored.
        assert!(surface.contains("refusing 9600 baud"));
        assert!(session.connected());
        assert_eq!(session.config().baud, crate::config::DEFAULT_BAUD);
    }

    #[test]
    fn test_reconfigure_failure_without_rollback_stays_disconnected() {
        let opener = FakeOpener::failing_for(9600);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.dispatch(":set baud 9600", &mut surface);

        assert!(!session.connected());
        assert!(surface.contains("refusing 9600 baud"));
        assert_eq!(session.config().baud, crate::config::DEFAULT_BAUD);
    }

    #[test]
    fn test_bogus_value_leaves_state_untouched() {
        let opener = FakeOpener::new();
        let opens = Arc::clone(&opener.opens);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("connect");
        session.dispatch(":set baud bogus", &mut surface);

        assert!(surface.contains("invalid value 'bogus' for 'baud'"));
        assert!(session.connected());
        assert_eq!(session.config().baud, crate::config::DEFAULT_BAUD);
        // No reconnect was attempted for the rejected edit.
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let opener = FakeOpener::new();
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.dispatch(":set warp 9", &mut surface);
        assert!(surface.contains("'warp' is not a settable field"));
    }

    #[test]
    fn test_setting_edit_applies_without_reconnect() {
        let opener = FakeOpener::new();
        let opens = Arc::clone(&opener.opens);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("connect");
        session.dispatch(":set mode byte", &mut surface);

        assert_eq!(session.settings().mode, Mode::Byte);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(surface.contains("=> mode: byte"));
    }

    #[test]
    fn test_write_text_with_eol() {
        let opener = FakeOpener::new();
        let written = Arc::clone(&opener.written);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("connect");
        session.dispatch(":set eol true", &mut surface);
        session.dispatch("hello", &mut surface);

        assert_eq!(written.lock().expect("lock").as_slice(), b"hello\n");
        assert!(surface.contains("<< hello"));
    }

    #[test]
    fn test_write_byte_tokens() {
        let opener = FakeOpener::new();
        let written = Arc::clone(&opener.written);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("connect");
        session.dispatch(":set mode byte", &mut surface);
        session.dispatch("0x41 0x42 0x43", &mut surface);

        assert_eq!(written.lock().expect("lock").as_slice(), &[0x41, 0x42, 0x43]);
        assert!(surface.contains("<< 0x41 0x42 0x43"));
    }

    #[test]
    fn test_write_while_disconnected_warns_and_writes_nothing() {
        let opener = FakeOpener::new();
        let written = Arc::clone(&opener.written);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.dispatch("hello", &mut surface);

        assert!(surface.contains("not connected"));
        assert!(written.lock().expect("lock").is_empty());
    }

    #[test]
    fn test_double_colon_escapes_command_prefix() {
        let opener = FakeOpener::new();
        let written = Arc::clone(&opener.written);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("connect");
        session.dispatch("::status", &mut surface);

        assert_eq!(written.lock().expect("lock").as_slice(), b":status");
    }

    #[test]
    fn test_clear_clears_surface() {
        let opener = FakeOpener::new();
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.dispatch(":help", &mut surface);
        assert!(!surface.lines.is_empty());
        session.dispatch(":clear", &mut surface);
        assert!(surface.cleared);
        assert!(surface.lines.is_empty());
    }

    #[test]
    fn test_exit_closes_stream() {
        let opener = FakeOpener::new();
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        session.connect().expect("connect");
        let flow = session.dispatch(":exit", &mut surface);
        assert_eq!(flow, ControlFlow::Exit);
        assert!(!session.connected());
    }

    #[test]
    fn test_inbound_chunk_reaches_surface() {
        let opener = FakeOpener::new();
        let reads = Arc::clone(&opener.reads);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        reads.lock().expect("lock").push(Ok(b"pong\n".to_vec()));
        session.connect().expect("connect");

        let flow = poll_events(&mut session, &mut surface);
        assert_eq!(flow, ControlFlow::Continue);
        assert!(surface.contains(">> pong"));
    }

    #[test]
    fn test_fatal_read_error_terminates() {
        let opener = FakeOpener::new();
        let reads = Arc::clone(&opener.reads);
        let mut session = session_with(opener);
        let mut surface = RecordingSurface::default();

        reads
            .lock()
            .expect("lock")
            .push(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
        session.connect().expect("connect");

        let flow = poll_events(&mut session, &mut surface);
        assert!(matches!(flow, ControlFlow::Fatal(_)));
        assert!(surface.contains("[error] read failed"));
    }
}
