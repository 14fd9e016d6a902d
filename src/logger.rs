use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::sync::Arc;

enum Sink {
    File(File),
    Stdout(Stdout),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Stdout(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Stdout(s) => s.flush(),
        }
    }
}

/// Thread-safe, append-only, time-stamped log sink. One line per
/// completed request plus error-severity events; writes never interleave
/// mid-line because the whole record is built before the lock is taken.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Mutex<Sink>>,
}

impl Logger {
    /// `"-"` (or the CLI `-v` flag) mirrors to stdout; anything else opens
    /// (creating/appending) the named file.
    pub fn open(path: &str) -> io::Result<Self> {
        let sink = if path == "-" {
            Sink::Stdout(io::stdout())
        } else {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Sink::File(file)
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(sink)),
        })
    }

    fn write_line(&self, line: &str) {
        let record = format!("[{}] {}\n", httpdate::fmt_http_date(std::time::SystemTime::now()), line);
        let mut sink = self.inner.lock();
        let _ = sink.write_all(record.as_bytes());
        let _ = sink.flush();
    }

    pub fn request(&self, peer: &str, method: &str, path: &str, status: u16, bytes: u64) {
        self.write_line(&format!("{} {} {} {} {}", peer, method, path, status, bytes));
    }

    pub fn error(&self, message: &str) {
        self.write_line(&format!("ERROR {}", message));
    }
}
