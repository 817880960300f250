//! Size-based rotating log file writer, the external collaborator backing
//! both `tracing`'s file sink and `GetLog`. Grounded directly on the
//! source's `log/rotlog.go`: write-append, rotate numbered siblings when the
//! current file reaches `max_bytes`, drop the oldest beyond `max_files`.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

struct Inner {
    path: PathBuf,
    max_bytes: u64,
    max_files: u32,
    file: File,
    current_size: u64,
}

/// Cloneable handle to the rotating writer; implements `std::io::Write` and
/// `tracing_subscriber::fmt::MakeWriter` so it can be handed straight to the
/// `tracing-subscriber` fmt layer.
#[derive(Clone)]
pub struct RotatingWriter {
    inner: Arc<Mutex<Inner>>,
}

impl RotatingWriter {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_files: u32) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();
        Ok(RotatingWriter {
            inner: Arc::new(Mutex::new(Inner {
                path,
                max_bytes,
                max_files,
                file,
                current_size,
            })),
        })
    }

    /// Read the last `n` lines of the current (unrotated) file. `n == 0`
    /// means the whole file. Rotated siblings (`path.1`, `path.2`, ...) are
    /// not concatenated in, matching the source's single-file `GetLog`.
    pub fn tail_lines(&self, n: usize) -> io::Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut contents = String::new();
        File::open(&inner.path)?.read_to_string(&mut contents)?;
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        if n == 0 || n >= lines.len() {
            Ok(lines)
        } else {
            Ok(lines[lines.len() - n..].to_vec())
        }
    }
}

impl Inner {
    fn rotate(&mut self) -> io::Result<()> {
        // Shift path.(N-1) -> path.N, dropping anything beyond max_files.
        if self.max_files > 0 {
            let oldest = numbered_path(&self.path, self.max_files);
            let _ = std::fs::remove_file(&oldest);
            for n in (1..self.max_files).rev() {
                let from = numbered_path(&self.path, n);
                let to = numbered_path(&self.path, n + 1);
                if from.exists() {
                    let _ = std::fs::rename(&from, &to);
                }
            }
            let first = numbered_path(&self.path, 1);
            std::fs::rename(&self.path, &first)?;
        } else {
            std::fs::remove_file(&self.path)?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

fn numbered_path(base: &std::path::Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.max_bytes > 0 && inner.current_size + buf.len() as u64 > inner.max_bytes {
            inner.rotate()?;
        }
        let written = inner.file.write(buf)?;
        inner.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_when_exceeding_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskmaster.log");
        let mut writer = RotatingWriter::open(&path, 10, 2).unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"more").unwrap();
        assert!(path.with_extension("1").exists() || numbered_path(&path, 1).exists());
    }

    #[test]
    fn tail_lines_returns_last_n() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskmaster.log");
        let mut writer = RotatingWriter::open(&path, 0, 0).unwrap();
        for i in 0..5 {
            writeln!(writer, "line{i}").unwrap();
        }
        let tail = writer.tail_lines(2).unwrap();
        assert_eq!(tail, vec!["line3".to_string(), "line4".to_string()]);
    }
}
