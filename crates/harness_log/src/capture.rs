use std::io::{self, Read, Write};
use std::sync::Arc;

use tracing::warn;

use crate::buffer::{Priority, PriorityLineBuffer};

/// Destination for complete lines produced by the capture adapters.
pub trait LineTarget {
    fn append_line(&self, priority: Priority, text: &str);
}

impl LineTarget for PriorityLineBuffer {
    fn append_line(&self, priority: Priority, text: &str) {
        self.append(priority, text);
    }
}

impl<T: LineTarget + ?Sized> LineTarget for Arc<T> {
    fn append_line(&self, priority: Priority, text: &str) {
        (**self).append_line(priority, text);
    }
}

impl<T: LineTarget + ?Sized> LineTarget for &T {
    fn append_line(&self, priority: Priority, text: &str) {
        (**self).append_line(priority, text);
    }
}

/// Byte sink that buffers partial lines and forwards complete ones.
///
/// `\n` and `\r` both end a line; a `\n` directly after `\r` is swallowed.
/// Bytes are decoded lossily as UTF-8. Dropping the sink flushes the pending
/// partial line.
pub struct LineSink<T: LineTarget> {
    target: T,
    priority: Priority,
    pending: Vec<u8>,
    after_cr: bool,
}

impl<T: LineTarget> LineSink<T> {
    pub fn new(target: T, priority: Priority) -> Self {
        Self {
            target,
            priority,
            pending: Vec::new(),
            after_cr: false,
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    fn emit_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending);
        self.target.append_line(self.priority, &line);
        self.pending.clear();
    }

    /// Flushes the partial line and hands back the target.
    pub fn close(mut self) -> T
    where
        T: Clone,
    {
        self.emit_pending();
        self.target.clone()
    }
}

impl<T: LineTarget> Write for LineSink<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            let after_cr = std::mem::replace(&mut self.after_cr, false);
            match byte {
                b'\n' if after_cr => {}
                b'\n' => self.emit_pending(),
                b'\r' => {
                    self.emit_pending();
                    self.after_cr = true;
                }
                _ => self.pending.push(byte),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_pending();
        Ok(())
    }
}

impl<T: LineTarget> Drop for LineSink<T> {
    fn drop(&mut self) {
        self.emit_pending();
    }
}

/// Reader that copies every successfully read chunk into a sink.
///
/// A failing sink is reported once and then detached; the reader keeps
/// serving its consumer.
pub struct TeeReader<R: Read, W: Write> {
    source: R,
    sink: Option<W>,
}

impl<R: Read, W: Write> TeeReader<R, W> {
    pub fn new(source: R, sink: W) -> Self {
        Self {
            source,
            sink: Some(sink),
        }
    }

    pub fn into_parts(self) -> (R, Option<W>) {
        (self.source, self.sink)
    }
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read(buf)?;
        if n > 0 {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(err) = sink.write_all(&buf[..n]) {
                    warn!("output tee detached after write failure: {err}");
                    self.sink = None;
                }
            }
        }
        Ok(n)
    }
}

#[cfg(feature = "tokio")]
mod tokio_capture {
    use std::io::Write;

    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

    use super::{LineSink, LineTarget};
    use crate::buffer::Priority;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ConsoleTarget {
        Stdout,
        Stderr,
    }

    /// Pumps `reader` to EOF into `target` one line at a time, optionally
    /// echoing the raw bytes to the console. Returns the byte count.
    pub async fn capture_stream<R, T>(
        mut reader: R,
        target: T,
        priority: Priority,
        mirror: Option<ConsoleTarget>,
    ) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
        T: LineTarget,
    {
        let mut sink = LineSink::new(target, priority);
        let mut chunk = [0u8; 4096];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            match mirror {
                Some(ConsoleTarget::Stdout) => {
                    let mut out = tokio::io::stdout();
                    out.write_all(&chunk[..n]).await?;
                    out.flush().await?;
                }
                Some(ConsoleTarget::Stderr) => {
                    let mut out = tokio::io::stderr();
                    out.write_all(&chunk[..n]).await?;
                    out.flush().await?;
                }
                None => {}
            }
            sink.write_all(&chunk[..n])?;
            total += n as u64;
        }
        sink.flush()?;
        Ok(total)
    }
}

#[cfg(feature = "tokio")]
pub use tokio_capture::{capture_stream, ConsoleTarget};
