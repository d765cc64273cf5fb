//! Destinations for the observed process output.

use std::io::Write;

use tracing::warn;

/// Receives every byte read from the process and every line written to it.
///
/// Sinks are observers: they cannot fail a session. Implementations that
/// write somewhere fallible report problems through `tracing`.
pub trait OutputSink: Send {
    /// Bytes read from the process.
    fn write_output(&mut self, bytes: &[u8]);

    /// Bytes written to the process.
    fn record_input(&mut self, _bytes: &[u8]) {}

    /// Called after each prompt wait completes.
    fn flush(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_output(&mut self, _bytes: &[u8]) {}
}

impl OutputSink for Vec<u8> {
    fn write_output(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write_output(&mut self, bytes: &[u8]) {
        (**self).write_output(bytes)
    }

    fn record_input(&mut self, bytes: &[u8]) {
        (**self).record_input(bytes)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

impl<S: OutputSink> OutputSink for Option<S> {
    fn write_output(&mut self, bytes: &[u8]) {
        if let Some(sink) = self {
            sink.write_output(bytes);
        }
    }

    fn record_input(&mut self, bytes: &[u8]) {
        if let Some(sink) = self {
            sink.record_input(bytes);
        }
    }

    fn flush(&mut self) {
        if let Some(sink) = self {
            sink.flush();
        }
    }
}

/// Streams output into an [`std::io::Write`], such as stdout.
///
/// Writes are buffered and pushed out on every prompt, so partial lines like
/// the prompt itself become visible.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: std::io::BufWriter<W>,
    failed: bool,
}

impl<W: Write> WriterSink<W> {
    /// Wrap `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: std::io::BufWriter::new(writer),
            failed: false,
        }
    }

    /// Flush and return the inner writer.
    pub fn into_inner(self) -> std::io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    fn report(&mut self, result: std::io::Result<()>) {
        if let Err(e) = result {
            // Only the first failure is worth a warning.
            if !self.failed {
                warn!("Output sink write failed: {}", e);
                self.failed = true;
            }
        }
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write_output(&mut self, bytes: &[u8]) {
        let result = self.writer.write_all(bytes);
        self.report(result);
    }

    fn flush(&mut self) {
        let result = self.writer.flush();
        self.report(result);
    }
}

/// Sends everything to two sinks.
#[derive(Debug, Default)]
pub struct TeeSink<A, B> {
    /// First sink
    pub first: A,
    /// Second sink
    pub second: B,
}

impl<A, B> TeeSink<A, B> {
    /// Combine two sinks.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Split back into the two sinks.
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: OutputSink, B: OutputSink> OutputSink for TeeSink<A, B> {
    fn write_output(&mut self, bytes: &[u8]) {
        self.first.write_output(bytes);
        self.second.write_output(bytes);
    }

    fn record_input(&mut self, bytes: &[u8]) {
        self.first.record_input(bytes);
        self.second.record_input(bytes);
    }

    fn flush(&mut self) {
        self.first.flush();
        self.second.flush();
    }
}
