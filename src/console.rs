use colored::Colorize;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tokio::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Interrupt,
}

pub const ABORT_KEY: Key = Key::Char(' ');
pub const CONFIRM_KEY: Key = Key::Enter;

impl Key {
    pub fn is_abort(self) -> bool {
        self == ABORT_KEY || self == Key::Interrupt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Info,
    Success,
    Warning,
    Danger,
}

/// Non-blocking operator key source.
pub trait KeyInput: Send {
    fn poll_key(&mut self) -> Option<Key>;
}

/// Line-oriented status output.
pub trait StatusSink: Send + Sync {
    fn write_line(&self, text: &str, style: Style);
}

/// Raw-mode terminal keyboard. Raw mode is restored when this value is dropped.
#[derive(Debug)]
pub struct TerminalInput {
    _raw_mode: RawModeGuard,
}

impl TerminalInput {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            _raw_mode: RawModeGuard::enable()?,
        })
    }
}

impl KeyInput for TerminalInput {
    fn poll_key(&mut self) -> Option<Key> {
        loop {
            match event::poll(Duration::ZERO) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    warn!(error = %e, "terminal poll failed");
                    return None;
                }
            }

            match event::read() {
                Ok(Event::Key(key)) => {
                    if let Some(mapped) = map_key(key) {
                        return Some(mapped);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "terminal read failed");
                    return None;
                }
            }
        }
    }
}

fn map_key(key: KeyEvent) -> Option<Key> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Interrupt),
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Esc => Some(Key::Escape),
        _ => None,
    }
}

#[derive(Debug)]
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Leaves raw mode regardless of which task still owns the terminal input.
pub fn restore_terminal() {
    let _ = terminal::disable_raw_mode();
}

/// Timestamped, coloured status lines on stdout.
#[derive(Debug, Default)]
pub struct TerminalSink;

impl TerminalSink {
    pub fn new() -> Self {
        Self
    }
}

impl StatusSink for TerminalSink {
    fn write_line(&self, text: &str, style: Style) {
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        // Raw mode needs an explicit carriage return
        let text = text.replace('\n', "\r\n");
        let text = text.as_str();
        let styled = match style {
            Style::Plain => text.normal(),
            Style::Info => text.bright_cyan(),
            Style::Success => text.bright_green(),
            Style::Warning => text.bright_yellow(),
            Style::Danger => text.bright_red().bold(),
        };
        let mut out = io::stdout().lock();
        let _ = write!(out, "[{stamp}] {styled}\r\n");
        let _ = out.flush();
    }
}

/// Key input replayed from a script of `(offset, key)` pairs relative to creation time.
#[derive(Debug)]
pub struct ScriptedInput {
    start: Instant,
    script: VecDeque<(Duration, Key)>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            script: VecDeque::new(),
        }
    }

    pub fn press_at(mut self, offset: Duration, key: Key) -> Self {
        self.script.push_back((offset, key));
        self.script.make_contiguous().sort_by_key(|(at, _)| *at);
        self
    }

    /// Presses the confirm key immediately.
    pub fn confirmed() -> Self {
        Self::new().press_at(Duration::ZERO, CONFIRM_KEY)
    }
}

impl Default for ScriptedInput {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyInput for ScriptedInput {
    fn poll_key(&mut self) -> Option<Key> {
        let elapsed = self.start.elapsed();
        match self.script.front() {
            Some((at, _)) if *at <= elapsed => self.script.pop_front().map(|(_, key)| key),
            _ => None,
        }
    }
}

/// In-memory status sink for headless runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Style, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Style, String)> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(_, line)| line.contains(needle))
    }
}

impl StatusSink for MemorySink {
    fn write_line(&self, text: &str, style: Style) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((style, text.to_string()));
    }
}
