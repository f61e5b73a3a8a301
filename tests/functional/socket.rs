//! Tests for the asynchronous socket wrapper.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use hearth::{AsyncSocket, EventLoop};

use crate::util::init_logger;

type ReadSlot = Rc<RefCell<Option<io::Result<Vec<u8>>>>>;

/// One-connection peer running `serve` on an OS assigned port.
fn spawn_peer<F>(serve: F) -> (SocketAddr, thread::JoinHandle<()>)
where
    F: FnOnce(std::net::TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve(stream);
    });
    (addr, handle)
}

fn run_until<F>(ev: &mut EventLoop, mut done: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "test did not finish within five seconds");
        ev.run_once().unwrap();
    }
}

#[test]
fn write_then_read_until_delimiter() {
    init_logger();
    let (addr, peer) = spawn_peer(|mut stream| {
        // Echo a single line.
        let mut bytes = Vec::new();
        let mut chunk = [0; 64];
        while !bytes.ends_with(b"\n") {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0);
            bytes.extend_from_slice(&chunk[..n]);
        }
        stream.write_all(&bytes).unwrap();
    });

    let mut ev = EventLoop::new().unwrap();
    let received: ReadSlot = Rc::new(RefCell::new(None));
    let received2 = Rc::clone(&received);

    let socket = AsyncSocket::connect(&mut ev, addr, |_, result| result.unwrap()).unwrap();
    let socket2 = socket.clone();
    socket.write(&mut ev, b"ping\n", move |ev| {
        socket2.read_until(ev, b"\n", move |_, result| {
            *received2.borrow_mut() = Some(result);
        });
    });

    run_until(&mut ev, || received.borrow().is_some());
    let bytes = received.borrow_mut().take().unwrap().unwrap();
    assert_eq!(bytes, b"ping\n");
    socket.close(&mut ev);
    peer.join().unwrap();
}

#[test]
fn read_an_exact_number_of_bytes() {
    init_logger();
    let (addr, peer) = spawn_peer(|mut stream| {
        stream.write_all(b"01234567rest").unwrap();
    });

    let mut ev = EventLoop::new().unwrap();
    let first: ReadSlot = Rc::new(RefCell::new(None));
    let rest: ReadSlot = Rc::new(RefCell::new(None));
    let first2 = Rc::clone(&first);
    let rest2 = Rc::clone(&rest);

    let socket = AsyncSocket::connect(&mut ev, addr, |_, result| result.unwrap()).unwrap();
    let socket2 = socket.clone();
    socket.read_bytes(&mut ev, 8, move |ev, result| {
        *first2.borrow_mut() = Some(result);
        // The surplus stays buffered for the next read.
        socket2.read_bytes(ev, 4, move |_, result| {
            *rest2.borrow_mut() = Some(result);
        });
    });

    run_until(&mut ev, || first.borrow().is_some() && rest.borrow().is_some());
    assert_eq!(first.borrow_mut().take().unwrap().unwrap(), b"01234567");
    assert_eq!(rest.borrow_mut().take().unwrap().unwrap(), b"rest");
    socket.close(&mut ev);
    peer.join().unwrap();
}

#[test]
fn eof_before_the_delimiter_is_an_error() {
    init_logger();
    let (addr, peer) = spawn_peer(|mut stream| {
        stream.write_all(b"no newline here").unwrap();
        // Dropping the stream closes it.
    });

    let mut ev = EventLoop::new().unwrap();
    let received: ReadSlot = Rc::new(RefCell::new(None));
    let received2 = Rc::clone(&received);

    let socket = AsyncSocket::connect(&mut ev, addr, |_, result| result.unwrap()).unwrap();
    socket.read_until(&mut ev, b"\n", move |_, result| {
        *received2.borrow_mut() = Some(result);
    });

    run_until(&mut ev, || received.borrow().is_some());
    let result = received.borrow_mut().take().unwrap();
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    socket.close(&mut ev);
    peer.join().unwrap();
}
