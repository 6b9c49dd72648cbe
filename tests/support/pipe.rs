// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! An in-memory duplex `Read + Write` pair, standing in for the TCP
//! socket a control socket would otherwise own, so scenario tests can
//! drive protocol state machines without a real network.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::cell::RefCell;

#[derive(Default)]
struct Buffer {
    data: VecDeque<u8>,
}

/// One end of the pipe. Writing to `Pipe::a` makes bytes available to
/// read from `Pipe::b`, and vice versa.
pub struct PipeEnd {
    inbound: Rc<RefCell<Buffer>>,
    outbound: Rc<RefCell<Buffer>>,
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.borrow_mut();
        let n = inbound.data.len().min(buf.len());
        for (slot, byte) in buf[..n].iter_mut().zip(inbound.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.borrow_mut().data.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds a connected pair: writes to `.0` are readable from `.1` and
/// writes to `.1` are readable from `.0`.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let a_to_b = Rc::new(RefCell::new(Buffer::default()));
    let b_to_a = Rc::new(RefCell::new(Buffer::default()));
    let a = PipeEnd { inbound: b_to_a.clone(), outbound: a_to_b.clone() };
    let b = PipeEnd { inbound: a_to_b, outbound: b_to_a };
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_on_one_end_are_readable_on_the_other() {
        let (mut a, mut b) = pipe();
        a.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn is_bidirectional() {
        let (mut a, mut b) = pipe();
        b.write_all(b"pong").unwrap();
        let mut buf = [0u8; 4];
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
