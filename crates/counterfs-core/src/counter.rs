// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Counter engine: the read/write protocol of counter files.
//!
//! A read session starts whenever a read arrives at offset 0. That read
//! increments the counter and captures the pre-increment value, formatted as
//! decimal text plus a newline, in the session. Reads at a non-zero offset
//! drain the captured text, so every partial read of one session serializes
//! the same value no matter what other sessions do to the counter meanwhile.
//!
//! The counter itself is not linearizable across sessions: two sessions that
//! start concurrently each observe a distinct pre-increment value, but which
//! one observes which is up to the scheduler.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FsError, FsResult};

/// Shared, atomically mutable counter value.
///
/// Clones refer to the same underlying integer.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicI32>);

impl Counter {
    pub fn new(value: i32) -> Self {
        Self(Arc::new(AtomicI32::new(value)))
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// Increment by one and return the previous value.
    pub fn fetch_increment(&self) -> i32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// True when both handles refer to the same integer.
    pub fn shares_with(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// State of one open counter file.
#[derive(Debug)]
pub struct CounterSession {
    counter: Counter,
    offset: u64,
    snapshot: Option<String>,
    scratch_capacity: usize,
}

impl CounterSession {
    pub fn open(counter: Counter, scratch_capacity: usize) -> Self {
        Self {
            counter,
            offset: 0,
            snapshot: None,
            scratch_capacity,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Move the cursor. The next read at offset 0 starts a new read session.
    pub fn seek(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.offset == 0 {
            let value = self.counter.fetch_increment();
            self.snapshot = Some(self.format(value));
            debug!(value, "counter read session started");
        }

        let scratch_capacity = self.scratch_capacity;
        let counter = &self.counter;
        // A cursor placed by `seek` without a preceding read has no snapshot;
        // compensate for the increment the session's first read would have made.
        let text = self
            .snapshot
            .get_or_insert_with(|| format_value(counter.get().wrapping_sub(1), scratch_capacity));

        let start = match usize::try_from(self.offset) {
            Ok(start) if start < text.len() => start,
            _ => return 0,
        };
        let count = buf.len().min(text.len() - start);
        buf[..count].copy_from_slice(&text.as_bytes()[start..start + count]);
        self.offset += count as u64;
        count
    }

    pub fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        if self.offset != 0 {
            warn!(offset = self.offset, "rejecting counter write at non-zero offset");
            return Err(FsError::InvalidOffset {
                offset: self.offset,
            });
        }
        if data.len() >= self.scratch_capacity {
            warn!(len = data.len(), "rejecting oversized counter write");
            return Err(FsError::BufferTooLarge {
                len: data.len(),
                capacity: self.scratch_capacity,
            });
        }

        // Zero-filled so that parsing stops at the end of the payload.
        let mut scratch = vec![0u8; self.scratch_capacity];
        scratch[..data.len()].copy_from_slice(data);
        let value = parse_decimal(&scratch);
        self.counter.set(value);
        self.snapshot = None;
        debug!(value, len = data.len(), "counter set");
        Ok(data.len())
    }

    fn format(&self, value: i32) -> String {
        format_value(value, self.scratch_capacity)
    }
}

/// `"{value}\n"`, cut to what fits a scratch buffer of `capacity` bytes with
/// room for a terminator.
fn format_value(value: i32, capacity: usize) -> String {
    let mut text = format!("{value}\n");
    text.truncate(capacity.saturating_sub(1));
    text
}

/// Base-10 `strtol`: leading ASCII whitespace, an optional sign, then digits
/// up to the first non-digit. No digits yields 0. Overflow wraps, and the
/// result is truncated to 32 bits.
pub fn parse_decimal(bytes: &[u8]) -> i32 {
    let mut rest = bytes;
    while let [first, tail @ ..] = rest {
        if !first.is_ascii_whitespace() {
            break;
        }
        rest = tail;
    }

    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let magnitude = rest
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, b| acc.wrapping_mul(10).wrapping_add(i64::from(b - b'0')));

    let value = if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    };
    value as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(session: &mut CounterSession, chunk: usize) -> (Vec<u8>, usize) {
        let mut out = Vec::new();
        let mut calls = 0;
        loop {
            let mut buf = vec![0u8; chunk];
            let n = session.read(&mut buf);
            calls += 1;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        (out, calls)
    }

    #[test]
    fn test_read_returns_pre_increment_value() {
        let counter = Counter::new(0);
        let mut session = CounterSession::open(counter.clone(), 80);

        let mut buf = [0u8; 16];
        let n = session.read(&mut buf);
        assert_eq!(&buf[..n], b"0\n");
        assert_eq!(counter.get(), 1);
        assert_eq!(session.read(&mut buf), 0);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_partial_reads_drain_one_snapshot() {
        let counter = Counter::new(1234);
        let mut session = CounterSession::open(counter.clone(), 80);

        let (text, calls) = read_all(&mut session, 2);
        assert_eq!(text, b"1234\n");
        // Three data-bearing calls (2 + 2 + 1 bytes) and the terminating one
        assert_eq!(calls, 4);
        assert_eq!(counter.get(), 1235);
    }

    #[test]
    fn test_snapshot_survives_concurrent_mutation() {
        let counter = Counter::new(9);
        let mut session = CounterSession::open(counter.clone(), 80);

        let mut buf = [0u8; 1];
        assert_eq!(session.read(&mut buf), 1);
        assert_eq!(&buf, b"9");

        // Another session bumps the counter between our partial reads.
        counter.set(500);

        assert_eq!(session.read(&mut buf), 1);
        assert_eq!(&buf, b"\n");
        assert_eq!(session.read(&mut buf), 0);
    }

    #[test]
    fn test_seek_to_zero_starts_new_session() {
        let counter = Counter::new(5);
        let mut session = CounterSession::open(counter.clone(), 80);

        let (first, _) = read_all(&mut session, 8);
        assert_eq!(first, b"5\n");
        session.seek(0);
        let (second, _) = read_all(&mut session, 8);
        assert_eq!(second, b"6\n");
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_seek_without_snapshot_compensates() {
        let counter = Counter::new(42);
        let mut session = CounterSession::open(counter.clone(), 80);
        session.seek(1);

        let mut buf = [0u8; 8];
        let n = session.read(&mut buf);
        assert_eq!(&buf[..n], b"1\n");
        assert_eq!(counter.get(), 42);
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let counter = Counter::new(3);
        let mut session = CounterSession::open(counter.clone(), 80);
        let mut buf = [0u8; 8];
        session.read(&mut buf);
        session.seek(100);
        assert_eq!(session.read(&mut buf), 0);
    }

    #[test]
    fn test_negative_value_formats_with_sign() {
        let counter = Counter::new(-17);
        let mut session = CounterSession::open(counter.clone(), 80);
        let (text, _) = read_all(&mut session, 80);
        assert_eq!(text, b"-17\n");
        assert_eq!(counter.get(), -16);
    }

    #[test]
    fn test_read_output_respects_scratch_capacity() {
        let counter = Counter::new(i32::MIN);
        let mut session = CounterSession::open(counter, 13);
        let (text, _) = read_all(&mut session, 80);
        assert_eq!(text, b"-2147483648\n");

        let mut tight = CounterSession::open(Counter::new(123_456), 5);
        let (text, _) = read_all(&mut tight, 80);
        assert_eq!(text, b"1234");
    }

    #[test]
    fn test_write_sets_counter_and_returns_input_len() {
        let counter = Counter::new(0);
        let mut session = CounterSession::open(counter.clone(), 80);
        assert_eq!(session.write(b"42\n"), Ok(3));
        assert_eq!(counter.get(), 42);
        assert_eq!(session.offset(), 0);
    }

    #[test]
    fn test_write_rejects_nonzero_offset() {
        let counter = Counter::new(11);
        let mut session = CounterSession::open(counter.clone(), 80);
        session.seek(3);
        assert_eq!(
            session.write(b"5"),
            Err(FsError::InvalidOffset { offset: 3 })
        );
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_write_rejects_payload_filling_scratch_buffer() {
        let counter = Counter::new(11);
        let mut session = CounterSession::open(counter.clone(), 80);

        let payload = vec![b'1'; 80];
        assert_eq!(
            session.write(&payload),
            Err(FsError::BufferTooLarge {
                len: 80,
                capacity: 80
            })
        );
        assert_eq!(counter.get(), 11);

        let payload = vec![b'1'; 79];
        assert!(session.write(&payload).is_ok());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"42"), 42);
        assert_eq!(parse_decimal(b"7abc"), 7);
        assert_eq!(parse_decimal(b"abc"), 0);
        assert_eq!(parse_decimal(b""), 0);
        assert_eq!(parse_decimal(b"-15\n"), -15);
        assert_eq!(parse_decimal(b"+8"), 8);
        assert_eq!(parse_decimal(b"  \t12"), 12);
        assert_eq!(parse_decimal(b"-"), 0);
        assert_eq!(parse_decimal(b"12\0\0\0"), 12);
        assert_eq!(parse_decimal(b"1 2"), 1);
    }

    #[test]
    fn test_parse_decimal_truncates_to_32_bits() {
        assert_eq!(parse_decimal(b"2147483647"), i32::MAX);
        assert_eq!(parse_decimal(b"-2147483648"), i32::MIN);
        assert_eq!(parse_decimal(b"2147483648"), i32::MIN);
        assert_eq!(parse_decimal(b"4294967297"), 1);
    }

    #[test]
    fn test_counter_clones_share_state() {
        let a = Counter::new(1);
        let b = a.clone();
        b.set(10);
        assert_eq!(a.get(), 10);
        assert!(a.shares_with(&b));
        assert!(!a.shares_with(&Counter::new(10)));
    }
}
