//! In-memory byte link between a host and an emulated device

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write};

/// The other end of a [`MemoryLink`] has been closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkClosed;

impl embedded_io::Error for LinkClosed {
    fn kind(&self) -> ErrorKind {
        ErrorKind::BrokenPipe
    }
}

#[derive(Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory duplex byte pipe
///
/// Reads never block: with nothing buffered `read` returns 0 only once the
/// peer has closed, and callers are expected to check `read_ready` first.
pub struct MemoryLink {
    rx: Rc<RefCell<Pipe>>,
    tx: Rc<RefCell<Pipe>>,
}

impl MemoryLink {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        let a = Rc::new(RefCell::new(Pipe::default()));
        let b = Rc::new(RefCell::new(Pipe::default()));
        (
            Self {
                rx: a.clone(),
                tx: b.clone(),
            },
            Self { rx: b, tx: a },
        )
    }

    /// Close this end; the peer reads end of file once drained
    pub fn close(&mut self) {
        self.tx.borrow_mut().closed = true;
        self.rx.borrow_mut().closed = true;
    }

    /// Bytes waiting to be read on this end
    pub fn available(&self) -> usize {
        self.rx.borrow().bytes.len()
    }

    /// Take everything waiting on this end
    pub fn drain(&mut self) -> alloc::vec::Vec<u8> {
        self.rx.borrow_mut().bytes.drain(..).collect()
    }
}

impl ErrorType for MemoryLink {
    type Error = LinkClosed;
}

impl Read for MemoryLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkClosed> {
        let mut rx = self.rx.borrow_mut();
        let n = buf.len().min(rx.bytes.len());
        for (dst, src) in buf.iter_mut().zip(rx.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl ReadReady for MemoryLink {
    fn read_ready(&mut self) -> Result<bool, LinkClosed> {
        let rx = self.rx.borrow();
        Ok(!rx.bytes.is_empty() || rx.closed)
    }
}

impl Write for MemoryLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, LinkClosed> {
        let mut tx = self.tx.borrow_mut();
        if tx.closed {
            return Err(LinkClosed);
        }
        tx.bytes.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), LinkClosed> {
        Ok(())
    }
}
