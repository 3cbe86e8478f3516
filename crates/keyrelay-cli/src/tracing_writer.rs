//! Writer for the persistent log file layer.
//!
//! The terminal layer writes to stderr directly; the file layer gets its
//! own [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) so that both can
//! carry independent `EnvFilter`s. Build the file layer with
//! `.with_ansi(false)`.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the log file inside the log directory.
pub const LOG_FILE_NAME: &str = "keyrelay.log";

/// [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) appending to one file.
#[derive(Clone)]
pub struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

impl FileMakeWriter {
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            file: Arc::clone(&self.file),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Per-event writer. Collects one formatted line and appends it on drop,
/// so concurrent events never interleave inside a line.
pub struct FileWriter {
    file: Arc<Mutex<File>>,
    buf: Vec<u8>,
}

impl Write for FileWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let mut file = self.file.lock();
        let _ = file.write_all(&self.buf);
        let _ = file.flush();
    }
}

/// Opens `<log_dir>/keyrelay.log` for appending, creating the directory.
///
/// # Errors
///
/// Any I/O error creating the directory or opening the file.
pub fn open_log_file(log_dir: &Path) -> io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(LOG_FILE_NAME);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    Ok((file, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn lines_are_appended_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (file, path) = open_log_file(&dir.path().join("logs")).unwrap();
        let make = FileMakeWriter::new(file);

        {
            let mut w = make.make_writer();
            w.write_all(b"first ").unwrap();
            w.write_all(b"line\n").unwrap();
            // Nothing reaches the file until the writer is dropped.
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        }
        make.make_writer().write_all(b"second line\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first line\nsecond line\n");
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, path) = open_log_file(dir.path()).unwrap();
        file.write_all(b"a\n").unwrap();
        drop(file);
        let (mut file, _) = open_log_file(dir.path()).unwrap();
        file.write_all(b"b\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a\nb\n");
    }
}
