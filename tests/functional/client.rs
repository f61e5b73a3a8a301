//! Tests for the HTTP client.

use std::cell::RefCell;
use std::io;
use std::net::TcpListener;
use std::rc::Rc;
use std::time::{Duration, Instant};

use hearth::{Application, ClientResponse, EventLoop, HttpClient, Request, Response, StatusCode};

use crate::util::{init_logger, start_server};

fn hello(_: &Request, response: &mut Response, _: &mut EventLoop) {
    response.write(b"Hello world!");
}

/// Run `ev` until the client callback delivered a result, with a safety
/// timeout so a broken test fails instead of hanging.
fn run_until_delivered(
    ev: &mut EventLoop,
    slot: &Rc<RefCell<Option<io::Result<ClientResponse>>>>,
) -> io::Result<ClientResponse> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while slot.borrow().is_none() {
        assert!(Instant::now() < deadline, "no response within five seconds");
        ev.run_once().unwrap();
    }
    slot.borrow_mut().take().unwrap()
}

#[test]
fn get_against_a_live_server() {
    let mut app = Application::new();
    app.add("/", hello).unwrap();
    let server = start_server(app);

    let mut ev = EventLoop::new().unwrap();
    let slot = Rc::new(RefCell::new(None));
    let slot2 = Rc::clone(&slot);
    HttpClient::get(&mut ev, server.local_addr(), "localhost", "/", move |_, result| {
        *slot2.borrow_mut() = Some(result);
    })
    .unwrap();

    let response = run_until_delivered(&mut ev, &slot).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), b"Hello world!");
    assert!(response.headers().contains("etag"));
    assert_eq!(response.headers().get("content-length"), Some("12"));

    server.stop();
}

#[test]
fn get_resolving_a_pattern_route() {
    fn item(request: &Request, response: &mut Response, _: &mut EventLoop) {
        response.write(request.captures()[0].as_bytes());
    }

    let mut app = Application::new();
    app.add("/items/([0-9]+)", item).unwrap();
    let server = start_server(app);

    let mut ev = EventLoop::new().unwrap();
    let slot = Rc::new(RefCell::new(None));
    let slot2 = Rc::clone(&slot);
    HttpClient::get(&mut ev, server.local_addr(), "localhost", "/items/7", move |_, result| {
        *slot2.borrow_mut() = Some(result);
    })
    .unwrap();

    let response = run_until_delivered(&mut ev, &slot).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), b"7");

    server.stop();
}

#[test]
fn connection_refused_reaches_the_callback() {
    init_logger();
    // Bind and drop to get an address nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut ev = EventLoop::new().unwrap();
    let slot = Rc::new(RefCell::new(None));
    let slot2 = Rc::clone(&slot);
    HttpClient::get(&mut ev, addr, "localhost", "/", move |_, result| {
        *slot2.borrow_mut() = Some(result);
    })
    .unwrap();

    let result = run_until_delivered(&mut ev, &slot);
    assert!(result.is_err(), "unexpected response: {result:?}");
}
