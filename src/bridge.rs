//! Bounded byte channel between built-in pipeline stages
//!
//! A [`CircularBuffer`] is a fixed ring guarded by a mutex with two
//! condition variables. [`StreamBridge::new`] hands out a writer end and a
//! reader end that implement `io::Write` and `io::Read`; dropping either
//! end closes the buffer, so a downstream stage sees end-of-input once the
//! upstream stage finishes, and an upstream stage stops blocking once the
//! downstream stage has gone away.

use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Default ring size for bridges (1 MiB)
pub const DEFAULT_CAPACITY: usize = 1 << 20;

#[derive(Debug)]
struct Ring {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    closed: bool,
}

impl Ring {
    fn available(&self) -> usize {
        (self.tail + self.buf.len() - self.head) % self.buf.len()
    }

    fn free(&self) -> usize {
        self.buf.len() - self.available() - 1
    }
}

/// Single-producer, single-consumer blocking byte ring.
///
/// One slot is always left empty to tell a full ring from an empty one, so
/// at most `capacity - 1` bytes are buffered at a time.
#[derive(Debug)]
pub struct CircularBuffer {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl CircularBuffer {
    /// Create a ring of `capacity` bytes (at least 2)
    pub fn new(capacity: usize) -> Self {
        CircularBuffer {
            ring: Mutex::new(Ring {
                buf: vec![0; capacity.max(2)],
                head: 0,
                tail: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write all of `data`, blocking while the ring is full.
    ///
    /// Returns the number of bytes written, which is short only if the
    /// buffer was closed part way.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut written = 0;
        let mut ring = self.lock();
        while written < data.len() {
            while ring.free() == 0 && !ring.closed {
                ring = self
                    .not_full
                    .wait(ring)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if ring.closed {
                break;
            }

            let cap = ring.buf.len();
            let chunk = ring.free().min(data.len() - written);
            for &byte in &data[written..written + chunk] {
                let tail = ring.tail;
                ring.buf[tail] = byte;
                ring.tail = (tail + 1) % cap;
            }
            written += chunk;
            self.not_empty.notify_one();
        }
        written
    }

    /// Read up to `out.len()` bytes, blocking until at least one byte is
    /// available. Returns 0 once the ring is closed and drained.
    pub fn read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut ring = self.lock();
        while ring.available() == 0 && !ring.closed {
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let cap = ring.buf.len();
        let count = ring.available().min(out.len());
        for slot in out.iter_mut().take(count) {
            let head = ring.head;
            *slot = ring.buf[head];
            ring.head = (head + 1) % cap;
        }
        if count > 0 {
            self.not_full.notify_one();
        }
        count
    }

    /// Mark the ring closed and wake both sides
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Bytes ready to read
    pub fn available(&self) -> usize {
        self.lock().available()
    }

    /// Bytes that can be written without blocking
    pub fn free_space(&self) -> usize {
        self.lock().free()
    }
}

/// Factory for connected bridge ends
pub struct StreamBridge;

impl StreamBridge {
    /// A writer/reader pair sharing one ring of `capacity` bytes
    pub fn new(capacity: usize) -> (BridgeWriter, BridgeReader) {
        let buffer = Arc::new(CircularBuffer::new(capacity));
        (
            BridgeWriter {
                buffer: Arc::clone(&buffer),
            },
            BridgeReader { buffer },
        )
    }
}

/// Upstream end of a bridge
#[derive(Debug)]
pub struct BridgeWriter {
    buffer: Arc<CircularBuffer>,
}

impl Write for BridgeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.buffer.write(buf) {
            0 => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipeline reader has gone away",
            )),
            n => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BridgeWriter {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

/// Downstream end of a bridge
#[derive(Debug)]
pub struct BridgeReader {
    buffer: Arc<CircularBuffer>,
}

impl Read for BridgeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.buffer.read(buf))
    }
}

impl Drop for BridgeReader {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn holds_capacity_minus_one() {
        let buffer = CircularBuffer::new(8);
        assert_eq!(buffer.free_space(), 7);
        buffer.close();
        assert_eq!(buffer.write(&[1; 10]), 0);

        let buffer = CircularBuffer::new(8);
        assert_eq!(buffer.write(&[9u8; 7]), 7);
        assert_eq!(buffer.available(), 7);
        assert_eq!(buffer.free_space(), 0);
    }

    #[test]
    fn write_close_then_read_everything() {
        let buffer = CircularBuffer::new(64);
        let data: Vec<u8> = (0..50).collect();
        assert_eq!(buffer.write(&data), 50);
        buffer.close();

        let mut out = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let n = buffer.read(&mut chunk);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, data);
        assert_eq!(buffer.read(&mut chunk), 0);
    }

    #[test]
    fn blocked_reader_wakes_on_data() {
        let buffer = Arc::new(CircularBuffer::new(16));
        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut out = [0u8; 4];
                let n = buffer.read(&mut out);
                out[..n].to_vec()
            })
        };
        thread::sleep(Duration::from_millis(50));
        buffer.write(b"ok");
        assert_eq!(reader.join().unwrap(), b"ok".to_vec());
    }

    #[test]
    fn writer_larger_than_capacity_streams_through() {
        let (mut writer, mut reader) = StreamBridge::new(7);
        let data: Vec<u8> = (0..10_000u32).map(|n| (n % 251) as u8).collect();
        let expected = data.clone();
        let producer = thread::spawn(move || {
            writer.write_all(&data).unwrap();
        });
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        producer.join().unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn dropped_reader_unblocks_writer() {
        let (mut writer, reader) = StreamBridge::new(4);
        let producer = thread::spawn(move || writer.write_all(&[0u8; 100]));
        thread::sleep(Duration::from_millis(20));
        drop(reader);
        let result = producer.join().unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
