//! serterm - an interactive serial-device terminal
//!
//! serterm connects to a serial port, exchanges raw bytes with the device,
//! and lets you change connection parameters (baud, parity, data/stop bits)
//! or display settings (text vs. byte mode, EOL handling, verbosity) while
//! the session is running, without restarting the process.
//!
//! # Quick Start
//!
//! ```text
//! serterm --path /dev/ttyUSB0               # connect at 115200 8N1
//! serterm --path /dev/ttyUSB0 --baud 9600   # slow device
//! serterm                                   # start disconnected, then
//!                                           # :set path /dev/ttyUSB0
//! ```
//!
//! # Commands
//!
//! | Command | Action |
//! |---------|--------|
//! | :help | List commands |
//! | :info | Dump config and settings |
//! | :get \<key\> | Print one config value |
//! | :set \<key\> \<value\> | Change a config or setting |
//! | :clear | Clear the screen |
//! | :exit | Quit (Esc works too) |
//!
//! Anything else is sent to the device as data.

mod config;
mod core;
mod fields;
mod format;
mod ui;

use std::env;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::anyhow;
use crossterm::cursor::{MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{Config, FileConfig, Parity, StopBits};
use crate::core::session::{ControlFlow, SessionController};
use crate::core::stream::SerialOpener;
use crate::ui::{LineStyle, Panel, Prompt, Surface};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line flag values; `None` falls through to the config file and
/// then the built-in defaults.
#[derive(Default)]
struct Flags {
    path: Option<String>,
    baud: Option<u32>,
    data_bits: Option<u8>,
    parity: Option<Parity>,
    stop_bits: Option<StopBits>,
    timeout: Option<Duration>,
}

fn print_version() {
    eprintln!("serterm {}", VERSION);
}

fn print_help() {
    eprintln!("serterm {} - an interactive serial-device terminal", VERSION);
    eprintln!();
    eprintln!("Usage: serterm [OPTIONS]");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  --path <DEVICE>       Device path, e.g. /dev/ttyUSB0 (default: none)");
    eprintln!("  --baud <RATE>         Baud rate (default: 115200)");
    eprintln!("  --data-bits <N>       Data bits 5-8 (default: 8)");
    eprintln!("  --parity <P>          Parity N|O|E (default: N)");
    eprintln!("  --stop-bits <N>       Stop bits 1|2 (default: 1)");
    eprintln!("  --timeout <DUR>       Read timeout, e.g. 500ms or 1s");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Without --path the terminal starts disconnected; connect with");
    eprintln!("':set path <device>'. Type ':help' inside for the command list.");
    eprintln!();
    eprintln!("Configuration: ~/.serterm/config.toml (flags take precedence)");
    eprintln!("Log file:      ~/.serterm/serterm.log");
}

fn parse_args() -> Result<Flags, String> {
    let args: Vec<String> = env::args().collect();
    let mut flags = Flags::default();
    let mut i = 1;

    fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, String> {
        *i += 1;
        args.get(*i)
            .map(|s| s.as_str())
            .ok_or_else(|| format!("Missing value for {}", args[*i - 1]))
    }

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--path" => {
                flags.path = Some(value(&args, &mut i)?.to_string());
            }
            "--baud" => {
                let raw = value(&args, &mut i)?;
                let baud: u32 = raw
                    .parse()
                    .map_err(|_| format!("Invalid baud rate: {}", raw))?;
                if baud == 0 {
                    return Err(format!("Invalid baud rate: {}", raw));
                }
                flags.baud = Some(baud);
            }
            "--data-bits" => {
                let raw = value(&args, &mut i)?;
                let bits: u8 = raw
                    .parse()
                    .map_err(|_| format!("Invalid data bits: {}", raw))?;
                if !(5..=8).contains(&bits) {
                    return Err(format!("Invalid data bits: {} (expected 5-8)", raw));
                }
                flags.data_bits = Some(bits);
            }
            "--parity" => {
                let raw = value(&args, &mut i)?;
                flags.parity =
                    Some(Parity::parse(raw).map_err(|e| format!("Invalid parity '{}': {}", raw, e))?);
            }
            "--stop-bits" => {
                let raw = value(&args, &mut i)?;
                flags.stop_bits = Some(
                    StopBits::parse(raw).map_err(|e| format!("Invalid stop bits '{}': {}", raw, e))?,
                );
            }
            "--timeout" => {
                let raw = value(&args, &mut i)?;
                flags.timeout = Some(
                    config::parse_duration(raw)
                        .ok_or_else(|| format!("Invalid timeout: {} (try 500ms or 1s)", raw))?,
                );
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(flags)
}

/// Merge precedence: flags over config file over defaults.
fn startup_config(flags: Flags) -> Config {
    let mut config = FileConfig::load().into_config();
    if let Some(path) = flags.path {
        config.path = path;
    }
    if let Some(baud) = flags.baud {
        config.baud = baud;
    }
    if let Some(bits) = flags.data_bits {
        config.data_bits = bits;
    }
    if let Some(parity) = flags.parity {
        config.parity = parity;
    }
    if let Some(stop_bits) = flags.stop_bits {
        config.stop_bits = stop_bits;
    }
    if let Some(timeout) = flags.timeout {
        config.timeout = Some(timeout);
    }
    config
}

fn init_logging() {
    let log_path = config::app_dir().map(|dir| dir.join("serterm.log"));

    let log_file = log_path.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    if let Some(file) = log_file {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let flags = match parse_args() {
        Ok(flags) => flags,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("serterm {} starting...", VERSION);

    let config = startup_config(flags);
    let mut session = SessionController::new(config, Box::new(SerialOpener));
    let mut panel = Panel::new();
    let mut prompt = Prompt::new();

    // Auto-connect when a path was supplied; an empty path never attempts
    // to connect.
    if session.config().path.is_empty() {
        panel.push(
            "not connected. use ':set path <device>' to connect".to_string(),
            LineStyle::Warning,
        );
    } else {
        match session.connect() {
            Ok(()) => {
                panel.push("connection success".to_string(), LineStyle::Success);
                session.dispatch(":info", &mut panel);
            }
            Err(e) => {
                error!("startup connect failed: {}", e);
                panel.push(format!("[error] {}", e), LineStyle::Error);
            }
        }
    }

    init_terminal()?;
    let result = run(&mut session, &mut panel, &mut prompt);
    cleanup_terminal();

    match &result {
        Ok(()) => info!("serterm exiting"),
        Err(e) => error!("serterm exiting: {}", e),
    }
    result
}

fn init_terminal() -> anyhow::Result<()> {
    terminal::enable_raw_mode()?;
    execute!(
        io::stdout(),
        EnterAlternateScreen,
        Clear(ClearType::All),
        MoveTo(0, 0)
    )?;
    Ok(())
}

fn cleanup_terminal() {
    let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
    let _ = terminal::disable_raw_mode();
}

/// Main event loop: drain reader events, redraw when something changed,
/// feed key input to the prompt and completed lines to the session.
fn run(
    session: &mut SessionController,
    panel: &mut Panel,
    prompt: &mut Prompt,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut force_redraw = true;

    loop {
        if let ControlFlow::Fatal(message) = session.process_events(panel) {
            return Err(anyhow!(message));
        }

        let panel_dirty = panel.take_dirty();
        let prompt_dirty = prompt.take_dirty();
        if panel_dirty || prompt_dirty || force_redraw {
            draw(panel, prompt, session)?;
            force_redraw = false;
        }

        if !event::poll(poll_timeout)? {
            continue;
        }
        match event::read()? {
            Event::Key(key_event) => {
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                match key_event.code {
                    KeyCode::Esc => {
                        session.close();
                        return Ok(());
                    }
                    KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                        session.close();
                        return Ok(());
                    }
                    KeyCode::Enter => {
                        let line = prompt.submit();
                        match session.dispatch(&line, panel) {
                            ControlFlow::Exit => return Ok(()),
                            ControlFlow::Fatal(message) => return Err(anyhow!(message)),
                            ControlFlow::Continue => {}
                        }
                        // :clear wipes scrollback; repaint everything.
                        force_redraw = true;
                    }
                    KeyCode::Char(c) => prompt.insert(c),
                    KeyCode::Backspace => prompt.backspace(),
                    KeyCode::Delete => prompt.delete(),
                    KeyCode::Left => prompt.left(),
                    KeyCode::Right => prompt.right(),
                    KeyCode::Home => prompt.home(),
                    KeyCode::End => prompt.end(),
                    KeyCode::Up => prompt.history_up(),
                    KeyCode::Down => prompt.history_down(),
                    _ => {}
                }
            }
            Event::Resize(_, _) => {
                force_redraw = true;
            }
            _ => {}
        }
    }
}

/// Layout: panel on top, status bar, prompt on the bottom row.
fn draw(panel: &Panel, prompt: &Prompt, session: &SessionController) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let (cols, rows) = terminal::size()?;
    if rows < 3 || cols == 0 {
        return Ok(());
    }
    panel.render(&mut out, cols, rows - 2)?;
    draw_status(&mut out, session, cols, rows - 2)?;
    prompt.render(&mut out, rows - 1, cols)?;
    out.flush()?;
    Ok(())
}

fn draw_status(
    out: &mut impl Write,
    session: &SessionController,
    cols: u16,
    row: u16,
) -> io::Result<()> {
    let (text, bg) = if session.connected() {
        let c = session.config();
        (
            format!(
                " {} {} {}{}{}",
                c.path,
                c.baud,
                c.data_bits,
                c.parity.as_str(),
                c.stop_bits.as_str()
            ),
            Color::AnsiValue(22),
        )
    } else {
        (" disconnected".to_string(), Color::AnsiValue(236))
    };
    let line: String = text.chars().take(cols as usize).collect();
    let padded = format!("{:<width$}", line, width = cols as usize);
    queue!(
        out,
        MoveTo(0, row),
        SetBackgroundColor(bg),
        SetForegroundColor(Color::AnsiValue(252)),
        Print(padded),
        ResetColor
    )?;
    Ok(())
}
