use std::io::{self, Write};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

static LOG_BUFFER: OnceLock<SharedBuffer> = OnceLock::new();
static LOG_SEMAPHORE: OnceLock<Arc<Semaphore>> = OnceLock::new();

#[derive(Clone)]
struct BufferWriter {
    buffer: SharedBuffer,
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captures tracing output of this crate into a shared buffer.
///
/// The subscriber is installed once per test binary with the filter of the
/// first capture. Captures are serialized so each one sees only its own
/// output, apart from tasks of concurrently running tests.
pub struct LogCapture {
    buffer: SharedBuffer,
    _permit: OwnedSemaphorePermit,
}

impl LogCapture {
    pub async fn new(filter: &str) -> Self {
        let semaphore = LOG_SEMAPHORE
            .get_or_init(|| Arc::new(Semaphore::new(1)))
            .clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("log capture semaphore closed");
        let buffer = LOG_BUFFER
            .get_or_init(|| install(filter))
            .clone();
        buffer.lock().clear();
        Self {
            buffer,
            _permit: permit,
        }
    }

    /// Debug-level capture of every `httpcache` module.
    pub async fn debug() -> Self {
        Self::new("httpcache=debug").await
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

fn install(filter: &str) -> SharedBuffer {
    let buffer = SharedBuffer::default();
    let subscriber = fmt::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_writer(BufferWriter {
            buffer: buffer.clone(),
        })
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    buffer
}
