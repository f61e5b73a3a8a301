//! Module with the non-blocking socket wrapper.
//!
//! [`AsyncSocket`] layers one-shot asynchronous operations on top of a
//! non-blocking TCP stream registered with an [`EventLoop`]: connect, read
//! until a delimiter, read an exact number of bytes, and queued writes. Each
//! operation takes a callback that is invoked on the loop thread once the
//! operation completes.

use std::any::Any;
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::buffer::DynamicBuffer;
use crate::event_loop::{EventHandler, EventLoop, Readiness};

const READ_CHUNK_SIZE: usize = 4096;
const WRITE_BUFFER_CAPACITY: usize = 1024;

type ConnectCallback = Box<dyn FnOnce(&mut EventLoop, io::Result<()>)>;
type ReadCallback = Box<dyn FnOnce(&mut EventLoop, io::Result<Vec<u8>>)>;
type WriteCallback = Box<dyn FnOnce(&mut EventLoop)>;

/// Non-blocking TCP stream with callback-based reads and writes.
///
/// At most one read and one write may be outstanding at a time; starting a
/// new one replaces the previous. Cheap to clone, clones refer to the same
/// stream.
#[derive(Clone)]
pub struct AsyncSocket {
    inner: Rc<RefCell<Inner>>,
    token: Token,
}

impl AsyncSocket {
    /// Start a non-blocking connect to `addr`.
    ///
    /// `callback` is invoked once the connection is established or refused.
    pub fn connect<F>(ev: &mut EventLoop, addr: SocketAddr, callback: F) -> io::Result<AsyncSocket>
    where
        F: FnOnce(&mut EventLoop, io::Result<()>) + 'static,
    {
        let mut stream = TcpStream::connect(addr)?;
        let token = ev.register(&mut stream, Interest::READABLE | Interest::WRITABLE)?;
        let socket = AsyncSocket::build(ev, stream, token, true);
        socket.inner.borrow_mut().connect_cb = Some(Box::new(callback));
        Ok(socket)
    }

    /// Wrap an already connected stream, e.g. an accepted connection.
    pub fn from_stream(ev: &mut EventLoop, mut stream: TcpStream) -> io::Result<AsyncSocket> {
        let token = ev.register(&mut stream, Interest::READABLE)?;
        Ok(AsyncSocket::build(ev, stream, token, false))
    }

    fn build(ev: &mut EventLoop, stream: TcpStream, token: Token, connecting: bool) -> AsyncSocket {
        let inner = Rc::new(RefCell::new(Inner {
            stream,
            token,
            connecting,
            eof: false,
            read_buf: Vec::new(),
            write_buf: DynamicBuffer::with_capacity(WRITE_BUFFER_CAPACITY),
            condition: None,
            connect_cb: None,
            read_cb: None,
            write_cb: None,
            interest: if connecting {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            },
        }));
        ev.insert_handler(token, SocketHandler { inner: Rc::clone(&inner) });
        AsyncSocket { inner, token }
    }

    /// Returns the token the stream is registered under.
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Read until `delimiter` has been seen.
    ///
    /// `callback` receives the bytes up to and including the delimiter. Bytes
    /// already buffered are considered first, so the callback may be invoked
    /// before this call returns. The stream closing before the delimiter is
    /// seen is delivered as [`io::ErrorKind::UnexpectedEof`].
    pub fn read_until<F>(&self, ev: &mut EventLoop, delimiter: &[u8], callback: F)
    where
        F: FnOnce(&mut EventLoop, io::Result<Vec<u8>>) + 'static,
    {
        self.start_read(ev, ReadCondition::Until(delimiter.to_vec()), callback);
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes<F>(&self, ev: &mut EventLoop, n: usize, callback: F)
    where
        F: FnOnce(&mut EventLoop, io::Result<Vec<u8>>) + 'static,
    {
        self.start_read(ev, ReadCondition::Bytes(n), callback);
    }

    fn start_read<F>(&self, ev: &mut EventLoop, condition: ReadCondition, callback: F)
    where
        F: FnOnce(&mut EventLoop, io::Result<Vec<u8>>) + 'static,
    {
        let fired = {
            let mut inner = self.inner.borrow_mut();
            inner.condition = Some(condition);
            inner.read_cb = Some(Box::new(callback));
            let fired = inner.check_read();
            if fired.is_none() {
                if let Err(err) = inner.update_interest(ev.registry()) {
                    log::warn!("failed to update socket interest: {err}");
                }
            }
            fired
        };
        if let Some((callback, result)) = fired {
            callback(ev, result);
        }
    }

    /// Queue `bytes` for writing.
    ///
    /// `callback` is invoked once everything queued has been written to the
    /// stream.
    pub fn write<F>(&self, ev: &mut EventLoop, bytes: &[u8], callback: F)
    where
        F: FnOnce(&mut EventLoop) + 'static,
    {
        let result = {
            let mut inner = self.inner.borrow_mut();
            inner.write_buf.put(bytes);
            inner.write_cb = Some(Box::new(callback));
            inner.flush()
        };
        match result {
            Ok(true) => {
                let callback = self.inner.borrow_mut().write_cb.take();
                if let Some(callback) = callback {
                    callback(ev);
                }
            }
            Ok(false) => {
                let mut inner = self.inner.borrow_mut();
                if let Err(err) = inner.update_interest(ev.registry()) {
                    log::warn!("failed to update socket interest: {err}");
                }
            }
            Err(err) => {
                log::warn!("socket write failed, closing: {err}");
                ev.close(self.token);
            }
        }
    }

    /// Close the stream, deregistering it from the loop.
    pub fn close(&self, ev: &mut EventLoop) {
        ev.close(self.token);
    }
}

enum ReadCondition {
    /// Read until this byte sequence has been seen.
    Until(Vec<u8>),
    /// Read this many bytes.
    Bytes(usize),
}

struct Inner {
    stream: TcpStream,
    token: Token,
    connecting: bool,
    eof: bool,
    /// Bytes read but not yet claimed by a read condition.
    read_buf: Vec<u8>,
    write_buf: DynamicBuffer,
    condition: Option<ReadCondition>,
    connect_cb: Option<ConnectCallback>,
    read_cb: Option<ReadCallback>,
    write_cb: Option<WriteCallback>,
    interest: Interest,
}

impl Inner {
    /// Read everything currently available into `read_buf`.
    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Check whether the pending read condition is satisfied, returning the
    /// callback to invoke. The caller must invoke it after releasing the
    /// borrow on `Inner`, the callback may start a new operation on the same
    /// socket.
    fn check_read(&mut self) -> Option<(ReadCallback, io::Result<Vec<u8>>)> {
        let condition = self.condition.as_ref()?;
        let end = match condition {
            ReadCondition::Until(delimiter) => self
                .read_buf
                .windows(delimiter.len())
                .position(|window| window == delimiter)
                .map(|index| index + delimiter.len()),
            ReadCondition::Bytes(n) => (self.read_buf.len() >= *n).then_some(*n),
        };
        match end {
            Some(end) => {
                self.condition = None;
                let bytes = self.read_buf.drain(..end).collect();
                Some((self.read_cb.take()?, Ok(bytes)))
            }
            None if self.eof => {
                self.condition = None;
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed before the read completed",
                );
                Some((self.read_cb.take()?, Err(err)))
            }
            None => None,
        }
    }

    /// Write out the queued bytes, returns `true` once the buffer is empty.
    fn flush(&mut self) -> io::Result<bool> {
        flush_buffer(&mut self.write_buf, &mut self.stream)
    }

    fn update_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let mut interest = Interest::READABLE;
        if self.connecting || !self.write_buf.is_empty() {
            interest = interest | Interest::WRITABLE;
        }
        if interest != self.interest {
            self.interest = interest;
            registry.reregister(&mut self.stream, self.token, interest)?;
        }
        Ok(())
    }
}

/// Write the buffered bytes to `writer`, returns `true` once the buffer has
/// been fully flushed. On a partial write the unwritten remainder is kept at
/// the front of the buffer.
pub(crate) fn flush_buffer<W>(buf: &mut DynamicBuffer, writer: &mut W) -> io::Result<bool>
where
    W: Write,
{
    if buf.is_empty() {
        return Ok(true);
    }
    buf.flip();
    loop {
        if buf.remaining() == 0 {
            buf.compact();
            return Ok(true);
        }
        match writer.write(buf.bytes()) {
            Ok(0) => {
                buf.compact();
                return Err(io::ErrorKind::WriteZero.into());
            }
            Ok(n) => buf.advance(n),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                buf.compact();
                return Ok(false);
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                buf.compact();
                return Err(err);
            }
        }
    }
}

/// Registered event handler, kept separate from [`Inner`] so that callbacks
/// run without a borrow held on the socket state.
struct SocketHandler {
    inner: Rc<RefCell<Inner>>,
}

enum Fired {
    Connect(ConnectCallback, io::Result<()>),
    Read(ReadCallback, io::Result<Vec<u8>>),
    Write(WriteCallback),
}

impl EventHandler for SocketHandler {
    fn ready(&mut self, ev: &mut EventLoop, _token: Token, readiness: Readiness) -> io::Result<()> {
        let mut fired = Vec::new();
        // An I/O error that no callback was waiting for, returned (closing
        // the descriptor) once the collected callbacks have run.
        let mut fatal = None;
        {
            let mut inner = self.inner.borrow_mut();
            if readiness.writable && inner.connecting {
                inner.connecting = false;
                let result = match inner.stream.take_error() {
                    Ok(Some(err)) | Err(err) => Err(err),
                    Ok(None) => Ok(()),
                };
                if let Some(callback) = inner.connect_cb.take() {
                    fired.push(Fired::Connect(callback, result));
                }
            }

            if readiness.readable || readiness.closed {
                if readiness.closed {
                    inner.eof = true;
                }
                match inner.fill() {
                    Ok(()) => {}
                    Err(err) => match inner.read_cb.take() {
                        Some(callback) => {
                            inner.condition = None;
                            fired.push(Fired::Read(callback, Err(err)));
                        }
                        None => fatal = Some(err),
                    },
                }
                if let Some((callback, result)) = inner.check_read() {
                    fired.push(Fired::Read(callback, result));
                }
            }

            if readiness.writable && !inner.connecting && fatal.is_none() {
                match inner.flush() {
                    Ok(true) => {
                        if let Some(callback) = inner.write_cb.take() {
                            fired.push(Fired::Write(callback));
                        }
                    }
                    Ok(false) => {}
                    Err(err) => fatal = Some(err),
                }
            }
        }

        for fire in fired {
            match fire {
                Fired::Connect(callback, result) => callback(ev, result),
                Fired::Read(callback, result) => callback(ev, result),
                Fired::Write(callback) => callback(ev),
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        self.inner.borrow_mut().update_interest(ev.registry())
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.inner.borrow_mut().stream)
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::time::{Duration, Instant};

    use crate::buffer::DynamicBuffer;
    use crate::event_loop::EventLoop;

    use super::{flush_buffer, AsyncSocket};

    /// Accepts up to `limit` bytes, then returns `WouldBlock`.
    struct Throttled {
        written: Vec<u8>,
        limit: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit - self.written.len());
            if n == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_buffer_writes_everything() {
        let mut buf = DynamicBuffer::with_capacity(8);
        buf.put(b"abcdef");
        let mut writer = Vec::new();
        assert!(flush_buffer(&mut buf, &mut writer).unwrap());
        assert_eq!(writer, b"abcdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn flush_buffer_keeps_the_unwritten_remainder() {
        let mut buf = DynamicBuffer::with_capacity(8);
        buf.put(b"abcdef");
        let mut writer = Throttled { written: Vec::new(), limit: 4 };
        assert!(!flush_buffer(&mut buf, &mut writer).unwrap());
        assert_eq!(writer.written, b"abcd");
        assert_eq!(buf.written(), b"ef");

        // A later flush continues where the previous one stopped.
        writer.limit = 6;
        assert!(flush_buffer(&mut buf, &mut writer).unwrap());
        assert_eq!(writer.written, b"abcdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn failed_write_closes_the_socket() {
        // Peer that accepts and immediately drops the connection, so a later
        // write draws a reset.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut ev = EventLoop::new().unwrap();
        let socket = AsyncSocket::connect(&mut ev, addr, |_, _| {}).unwrap();
        peer.join().unwrap();

        // Keep writing until the reset arrives; the failing write (or the
        // error surfacing through readiness) must deregister the handler.
        let deadline = Instant::now() + Duration::from_secs(5);
        while ev.handler(socket.token()).is_some() {
            assert!(Instant::now() < deadline, "socket was never closed");
            socket.write(&mut ev, b"x", |_| {});
            ev.run_once().unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn flush_buffer_on_an_empty_buffer() {
        let mut buf = DynamicBuffer::with_capacity(8);
        let mut writer = Vec::new();
        assert!(flush_buffer(&mut buf, &mut writer).unwrap());
        assert!(writer.is_empty());
    }
}
