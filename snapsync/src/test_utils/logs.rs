use std::io;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;

/// Collects formatted log output of the current thread for assertions.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

struct CapturedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    /// Installs a thread-local subscriber writing into the returned buffer.
    ///
    /// Works with the current-thread runtime used by `#[tokio::test]`; keep the guard alive for
    /// the duration of the test.
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let buffer = logs.buffer.clone();

        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || CapturedWriter {
                buffer: buffer.clone(),
            })
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        let guard = tracing::subscriber::set_default(subscriber);

        (logs, guard)
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Returns the lines emitted at `level`, e.g. `"WARN"`.
    pub fn lines_with_level(&self, level: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.trim_start().starts_with(level))
            .map(str::to_owned)
            .collect()
    }
}
