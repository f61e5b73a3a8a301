//! Tests for the HTTP server.

use std::io::Write;
use std::net::TcpStream;
use std::thread::sleep;
use std::time::{Duration, Instant};

use hearth::{
    Application, Completion, EventLoop, Method, Request, RequestHandler, Response, ServerConfig,
    StatusCode,
};

use crate::util::{raw_request, read_response, start_server, start_server_with};

fn hello(_: &Request, response: &mut Response, _: &mut EventLoop) {
    response.write(b"Hello world!");
}

fn echo(request: &Request, response: &mut Response, _: &mut EventLoop) {
    response.write(request.body());
}

#[test]
fn get_responds_with_exact_headers_and_body() {
    let mut app = Application::new();
    app.add("/", hello).unwrap();
    let server = start_server(app);

    let response = raw_request(
        &server,
        b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    let end = crate::util::find(&response, b"\r\n\r\n").unwrap();
    let head = std::str::from_utf8(&response[..end]).unwrap();
    let lines: Vec<&str> = head.lines().collect();

    assert_eq!(lines[0], "HTTP/1.1 200 OK");
    assert_eq!(lines[1], concat!("Server: hearth/", env!("CARGO_PKG_VERSION")));
    assert!(lines[2].starts_with("Date: "), "{}", lines[2]);
    assert_eq!(lines[3], "Connection: Close");
    assert_eq!(lines[4], "Content-Length: 12");
    // Hex SHA-256 of the body.
    assert_eq!(
        lines[5],
        "Etag: \"c0535e4be2b79ffd93291305436bf889314e4a3faec05ecffcbb7df31ad9e51a\"",
    );
    assert_eq!(lines.len(), 6, "unexpected headers: {lines:?}");
    assert_eq!(&response[end + 4..], b"Hello world!");

    server.stop();
}

#[test]
fn post_body_split_across_writes_is_dispatched_once_complete() {
    let mut app = Application::new();
    app.add("/echo", echo).unwrap();
    let server = start_server(app);

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\nConnection: close\r\n\r\n")
        .unwrap();
    sleep(Duration::from_millis(20));
    stream.write_all(b"hello ").unwrap();
    sleep(Duration::from_millis(20));
    stream.write_all(b"world").unwrap();

    let (lines, body) = read_response(&mut stream);
    assert_eq!(lines[0], "HTTP/1.1 200 OK");
    assert_eq!(body, b"hello world");

    server.stop();
}

#[test]
fn keep_alive_serves_multiple_requests_on_one_connection() {
    let mut app = Application::new();
    app.add("/", hello).unwrap();
    let server = start_server(app);

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    for _ in 0..2 {
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let (lines, body) = read_response(&mut stream);
        assert_eq!(lines[0], "HTTP/1.1 200 OK");
        assert!(lines.contains(&String::from("Connection: Keep-Alive")), "{lines:?}");
        assert_eq!(body, b"Hello world!");
    }

    server.stop();
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let mut app = Application::new();
    app.add("/", hello).unwrap();
    let server = start_server(app);

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\nGET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .unwrap();
    for _ in 0..2 {
        let (lines, body) = read_response(&mut stream);
        assert_eq!(lines[0], "HTTP/1.1 200 OK");
        assert_eq!(body, b"Hello world!");
    }

    server.stop();
}

#[test]
fn garbage_input_gets_a_400_response() {
    let mut app = Application::new();
    app.add("/", hello).unwrap();
    let server = start_server(app);

    let response = raw_request(&server, &[0x01, 0xff, 0x02, 0xfe]);
    let head = std::str::from_utf8(&response[..response.len().min(32)]).unwrap();
    assert!(head.starts_with("HTTP/1.1 400 Bad Request"), "{head}");

    server.stop();
}

#[test]
fn pattern_routes_capture_and_miss() {
    fn item(request: &Request, response: &mut Response, _: &mut EventLoop) {
        response.write(request.captures()[0].as_bytes());
    }

    let mut app = Application::new();
    app.add("/items/([0-9]+)", item).unwrap();
    let server = start_server(app);

    let response = raw_request(
        &server,
        b"GET /items/42 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    let end = crate::util::find(&response, b"\r\n\r\n").unwrap();
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert_eq!(&response[end + 4..], b"42");

    let response = raw_request(
        &server,
        b"GET /items/forty-two HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with(b"HTTP/1.1 404 Not Found\r\n"));

    server.stop();
}

#[test]
fn unimplemented_method_gets_a_405_response() {
    struct GetOnly;

    impl RequestHandler for GetOnly {
        fn get(&self, _: &Request, response: &mut Response, _: &mut EventLoop) {
            response.write(b"ok");
        }
    }

    let mut app = Application::new();
    app.add("/get-only", GetOnly).unwrap();
    let server = start_server(app);

    let response = raw_request(
        &server,
        b"POST /get-only HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with(b"HTTP/1.1 405 Method Not Allowed\r\n"));

    server.stop();
}

#[test]
fn query_parameters_reach_the_handler() {
    fn param(request: &Request, response: &mut Response, _: &mut EventLoop) {
        response.write(request.parameter("name").unwrap_or("none").as_bytes());
    }

    let mut app = Application::new();
    app.add("/param", param).unwrap();
    let server = start_server(app);

    let response = raw_request(
        &server,
        b"GET /param?name=hearth&other=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    let end = crate::util::find(&response, b"\r\n\r\n").unwrap();
    assert_eq!(&response[end + 4..], b"hearth");

    server.stop();
}

#[test]
fn manual_completion_finishes_from_a_timeout() {
    struct Slow;

    impl RequestHandler for Slow {
        fn handle(
            &self,
            _: &Request,
            mut response: Response,
            ev: &mut EventLoop,
        ) -> Option<Response> {
            let deadline = Instant::now() + Duration::from_millis(50);
            let _ = ev.add_timeout(deadline, move |ev| {
                response.write(b"late");
                response.finish(ev);
            });
            None
        }
    }

    let mut app = Application::new();
    app.add("/slow", Slow)
        .unwrap()
        .completion(Method::Get, Completion::Manual);
    let server = start_server(app);

    let start = Instant::now();
    let response = raw_request(
        &server,
        b"GET /slow HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    assert!(start.elapsed() >= Duration::from_millis(50));
    let end = crate::util::find(&response, b"\r\n\r\n").unwrap();
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert_eq!(&response[end + 4..], b"late");

    server.stop();
}

#[test]
fn flushed_responses_stream_and_close() {
    fn stream_body(_: &Request, response: &mut Response, ev: &mut EventLoop) {
        response.write(b"part one,");
        response.flush(ev);
        response.write(b"part two");
    }

    let mut app = Application::new();
    app.add("/stream", stream_body).unwrap();
    let server = start_server(app);

    let response = raw_request(&server, b"GET /stream HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let end = crate::util::find(&response, b"\r\n\r\n").unwrap();
    let head = std::str::from_utf8(&response[..end]).unwrap();
    // No length is known for a streamed response, so the connection closes
    // to delimit it, even though the request asked for keep-alive.
    assert!(head.contains("Connection: Close"), "{head}");
    assert!(!head.contains("Content-Length"), "{head}");
    assert_eq!(&response[end + 4..], b"part one,part two");

    server.stop();
}

#[test]
fn handler_sets_status_and_headers() {
    fn created(_: &Request, response: &mut Response, _: &mut EventLoop) {
        response.set_status(StatusCode::CREATED);
        response.set_header("Location", "/thing/1");
    }

    let mut app = Application::new();
    app.add("/thing", created).unwrap();
    let server = start_server(app);

    let response = raw_request(
        &server,
        b"POST /thing HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    );
    let end = crate::util::find(&response, b"\r\n\r\n").unwrap();
    let head = std::str::from_utf8(&response[..end]).unwrap();
    assert!(head.starts_with("HTTP/1.1 201 Created\r\n"), "{head}");
    assert!(head.contains("Location: /thing/1"), "{head}");

    server.stop();
}

#[test]
fn worker_pool_serves_concurrent_connections() {
    let mut app = Application::new();
    app.add("/", hello).unwrap();
    let config = ServerConfig::new().with_workers(2);
    let server = start_server_with(app, config);

    let addr = server.local_addr();
    let clients: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream
                    .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                    .unwrap();
                let (lines, body) = read_response(&mut stream);
                assert_eq!(lines[0], "HTTP/1.1 200 OK");
                assert_eq!(body, b"Hello world!");
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    server.stop();
}
