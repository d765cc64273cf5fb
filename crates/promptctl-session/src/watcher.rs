//! Prompt detection over an unframed byte stream.
//!
//! The watcher consumes process output one byte at a time, keeping only the
//! bytes since the last newline, and reports readiness as soon as that
//! partial line matches the prompt pattern. Prompts are usually not
//! newline-terminated, so matching has to happen before a line is complete.

use std::time::{Duration, Instant};

use regex::bytes::Regex;
use tracing::{debug, trace};
use vte::Perform;

use promptctl_core::{Error, PromptSettings, Result};
use promptctl_process::{ByteSource, ReadOutcome};

/// Default interval between liveness checks while the output is idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Compiled prompt regular expression.
#[derive(Debug, Clone)]
pub struct PromptPattern {
    regex: Regex,
}

impl PromptPattern {
    /// Compile `pattern`.
    ///
    /// Fails with `Error::InvalidPattern` when the regex does not compile.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Test a line segment.
    pub fn is_match(&self, line: &[u8]) -> bool {
        self.regex.is_match(line)
    }
}

/// Bytes received since the last newline.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte; a newline clears the buffer instead.
    pub fn push(&mut self, byte: u8) {
        if byte == b'\n' {
            self.bytes.clear();
        } else {
            self.bytes.push(byte);
        }
    }

    /// Discard the buffered bytes.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Buffered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Collects the printable view of a line, dropping escape sequences and
/// other control bytes.
#[derive(Debug, Default)]
struct VisibleLine {
    line: LineBuffer,
}

impl Perform for VisibleLine {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        for &byte in c.encode_utf8(&mut utf8).as_bytes() {
            self.line.push(byte);
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // A carriage return starts the line over, as a terminal redraw does
            b'\r' | b'\n' => self.line.clear(),
            b'\t' => self.line.push(byte),
            _ => {}
        }
    }
}

/// Removes ANSI escape sequences from a byte stream, one byte at a time.
///
/// The parser state survives across calls, so sequences split between reads
/// are still recognised.
struct AnsiStripper {
    parser: vte::Parser,
    visible: VisibleLine,
}

impl AnsiStripper {
    fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            visible: VisibleLine::default(),
        }
    }

    fn push(&mut self, byte: u8) {
        self.parser.advance(&mut self.visible, byte);
    }

    fn clear(&mut self) {
        self.visible.line.clear();
    }

    fn line(&self) -> &[u8] {
        self.visible.line.as_bytes()
    }
}

impl std::fmt::Debug for AnsiStripper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiStripper")
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

/// Waits for a prompt on a process's output.
///
/// # Example
///
/// ```
/// use promptctl_process::testing::MemorySource;
/// use promptctl_session::{PromptPattern, PromptWatcher};
///
/// # fn example() -> promptctl_core::Result<()> {
/// let mut watcher = PromptWatcher::new(PromptPattern::new(r"^\(shell\) ")?);
/// let mut output = MemorySource::new("Booting...\n(shell) ");
///
/// assert!(watcher.await_prompt(&mut output, |_| {})?);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct PromptWatcher {
    pattern: PromptPattern,
    line: LineBuffer,
    stripper: Option<AnsiStripper>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl PromptWatcher {
    /// Create a watcher with no timeout and the default poll interval.
    pub fn new(pattern: PromptPattern) -> Self {
        Self {
            pattern,
            line: LineBuffer::new(),
            stripper: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build a watcher from prompt settings.
    pub fn from_settings(settings: &PromptSettings) -> Result<Self> {
        settings.validate()?;

        let mut watcher = Self::new(PromptPattern::new(&settings.pattern)?)
            .with_poll_interval(Duration::from_millis(settings.poll_interval_ms))
            .with_strip_ansi(settings.strip_ansi);
        watcher.timeout = settings.timeout();
        Ok(watcher)
    }

    /// Fail waits that last longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how often an idle wait rechecks liveness.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Match prompts with ANSI escape sequences removed.
    pub fn with_strip_ansi(mut self, strip: bool) -> Self {
        self.stripper = strip.then(AnsiStripper::new);
        self
    }

    /// The prompt pattern.
    pub fn pattern(&self) -> &PromptPattern {
        &self.pattern
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The liveness poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether escape sequences are stripped before matching.
    pub fn strips_ansi(&self) -> bool {
        self.stripper.is_some()
    }

    /// Raw bytes received since the last newline.
    pub fn line(&self) -> &[u8] {
        self.line.as_bytes()
    }

    /// Block until the prompt appears or the output ends.
    ///
    /// Returns `Ok(true)` when the bytes since the last newline match the
    /// prompt, `Ok(false)` when the process is no longer alive or its output
    /// reached end-of-stream. `on_byte` sees every byte read, including the
    /// prompt itself. With a timeout configured, an expired wait fails with
    /// `Error::PromptTimeout`.
    ///
    /// Each call starts from an empty line, so a prompt that was already
    /// matched is not matched again.
    pub fn await_prompt<S, F>(&mut self, source: &mut S, mut on_byte: F) -> Result<bool>
    where
        S: ByteSource + ?Sized,
        F: FnMut(u8),
    {
        self.reset();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if !source.is_alive() {
                debug!("Process is gone, stopping prompt wait");
                return Ok(false);
            }

            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    debug!(
                        "No prompt within {:?} ({} bytes pending)",
                        timeout,
                        self.line.len()
                    );
                    return Err(Error::PromptTimeout(timeout.as_millis() as u64));
                }
            }

            let byte = match source.read_byte(Some(self.poll_interval)) {
                ReadOutcome::Byte(byte) => byte,
                ReadOutcome::EndOfStream => {
                    debug!(
                        "End of output while waiting for prompt ({} bytes pending)",
                        self.line.len()
                    );
                    return Ok(false);
                }
                ReadOutcome::Pending => continue,
            };

            self.line.push(byte);
            on_byte(byte);

            let matched = match self.stripper.as_mut() {
                Some(stripper) => {
                    stripper.push(byte);
                    if byte == b'\n' {
                        stripper.clear();
                    }
                    self.pattern.is_match(stripper.line())
                }
                None => self.pattern.is_match(self.line.as_bytes()),
            };

            if matched {
                trace!("Prompt matched: {:?}", String::from_utf8_lossy(self.line.as_bytes()));
                return Ok(true);
            }
        }
    }

    fn reset(&mut self) {
        self.line.clear();
        if let Some(stripper) = self.stripper.as_mut() {
            stripper.clear();
        }
    }
}
