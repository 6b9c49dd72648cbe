// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The rate-limit socket layer: wraps an inner `Read + Write` transport
//! and consults the process-global [`RateLimiter`] before every transfer,
//! reporting `WouldBlock` and registering a wakeup when the bucket is
//! dry rather than blocking the event loop thread.

use crate::ratelimiter::{Direction, RateLimiter, RateToken};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::Mutex;

pub struct RateLimitedStream<S> {
    inner: S,
    limiter: Arc<Mutex<RateLimiter>>,
    token: RateToken,
}

impl<S> RateLimitedStream<S> {
    pub fn new(inner: S, limiter: Arc<Mutex<RateLimiter>>, token: RateToken) -> Self {
        RateLimitedStream { inner, limiter, token }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn quota(&self, direction: Direction) -> i64 {
        self.limiter.lock().unwrap().available_bytes(self.token, direction)
    }

    fn consume(&self, direction: Direction, bytes: u64) {
        self.limiter.lock().unwrap().consume(self.token, direction, bytes);
    }

    fn request_wakeup(&self, direction: Direction) {
        self.limiter.lock().unwrap().request_wakeup(self.token, direction);
    }
}

impl<S: Read> Read for RateLimitedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let quota = self.quota(Direction::Inbound);
        if quota == 0 {
            self.request_wakeup(Direction::Inbound);
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let len = if quota < 0 { buf.len() } else { buf.len().min(quota as usize) };
        let n = self.inner.read(&mut buf[..len])?;
        self.consume(Direction::Inbound, n as u64);
        Ok(n)
    }
}

impl<S: Write> Write for RateLimitedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let quota = self.quota(Direction::Outbound);
        if quota == 0 {
            self.request_wakeup(Direction::Outbound);
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let len = if quota < 0 { buf.len() } else { buf.len().min(quota as usize) };
        let n = self.inner.write(&buf[..len])?;
        self.consume(Direction::Outbound, n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn zero_quota_reports_would_block() {
        let limiter = Arc::new(Mutex::new(RateLimiter::new()));
        let token = limiter.lock().unwrap().register();
        limiter.lock().unwrap().set_limit(Direction::Inbound, Some(0));
        // A tick with limit=0 leaves available_bytes at 0 (not -1/unlimited).
        limiter.lock().unwrap().tick();

        let mut stream = RateLimitedStream::new(Cursor::new(vec![1, 2, 3]), limiter, token);
        let mut buf = [0u8; 4];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn unlimited_bucket_reads_freely() {
        let limiter = Arc::new(Mutex::new(RateLimiter::new()));
        let token = limiter.lock().unwrap().register();
        let mut stream = RateLimitedStream::new(Cursor::new(vec![1, 2, 3, 4]), limiter, token);
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 4);
    }

    #[test]
    fn read_is_capped_at_available_quota() {
        let limiter = Arc::new(Mutex::new(RateLimiter::new()));
        let token = limiter.lock().unwrap().register();
        limiter.lock().unwrap().set_limit(Direction::Inbound, Some(4));
        limiter.lock().unwrap().tick(); // grants 4*0.25 = 1 byte

        let mut stream = RateLimitedStream::new(Cursor::new(vec![1, 2, 3, 4]), limiter, token);
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 1);
    }
}
