//! Byte-count progress reporting for copies and uploads.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Progress callback: `(total_size, bytes_so_far, bytes_just_copied)`.
pub type CopyCallback<'a> = dyn FnMut(u64, u64, usize) + Send + 'a;

/// A reader that reports progress to a callback as it is read.
///
/// Seeking resets the reported position, so an upload body that is
/// replayed after a redirect reports its progress again from zero.
pub struct CallbackReader<'a, R> {
    inner: R,
    total: u64,
    read: u64,
    callback: Option<Box<CopyCallback<'a>>>,
}

impl<'a, R> CallbackReader<'a, R> {
    pub fn new(inner: R, total: u64, callback: Option<Box<CopyCallback<'a>>>) -> Self {
        CallbackReader {
            inner,
            total,
            read: 0,
            callback,
        }
    }

    /// Number of bytes read since creation or the last seek.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for CallbackReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.read += n as u64;
            if let Some(cb) = self.callback.as_mut() {
                cb(self.total, self.read, n);
            }
        }
        Ok(n)
    }
}

impl<R: Seek> Seek for CallbackReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let at = self.inner.seek(pos)?;
        self.read = at;
        Ok(at)
    }
}

/// Copy `reader` into `writer`, reporting progress against `total`.
///
/// Returns the number of bytes copied.
pub fn copy_with_callback<R: Read, W: Write>(
    writer: &mut W,
    reader: R,
    total: u64,
    callback: Option<Box<CopyCallback<'_>>>,
) -> io::Result<u64> {
    // Nothing to report for an empty file
    let callback = if total == 0 { None } else { callback };
    let mut reader = CallbackReader::new(reader, total, callback);
    io::copy(&mut reader, writer)
}

/// Format a byte count for humans, e.g. `1.5 MB`.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes < 1000 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callback_reader_reports_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut reader = CallbackReader::new(
            Cursor::new(vec![1u8; 10]),
            10,
            Some(Box::new(move |total, so_far, _| {
                sink.lock().unwrap().push((total, so_far))
            })),
        );

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(seen.lock().unwrap().last(), Some(&(10, 10)));

        reader.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(reader.bytes_read(), 0);
    }

    #[test]
    fn test_copy_with_callback() {
        let mut out = Vec::new();
        let n = copy_with_callback(&mut out, &b"hello"[..], 5, None).unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(0), "0 B");
        assert_eq!(humanize_bytes(999), "999 B");
        assert_eq!(humanize_bytes(1500), "1.5 KB");
        assert_eq!(humanize_bytes(2_000_000), "2.0 MB");
    }
}
