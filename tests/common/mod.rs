//! A small scripted HTTP server for integration tests.
//!
//! Each accepted connection carries exactly one request: the server records
//! it, asks the responder closure what to send back, and closes the
//! connection. Closing after every response keeps attempts and redirect
//! hops on separate connections, which makes the recorded request list an
//! exact transcript of what the client did on the wire.

#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

/// Initialize test logging once per binary.
pub fn setup() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        drop(tracing_subscriber::fmt().with_test_writer().try_init());
    });
}

/// A canned response played back by the server.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub delay: Duration,
}

impl MockResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sleep before responding, to simulate a slow server.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One request as the server saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// 1-based position in arrival order.
    pub number: usize,
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub received_at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    /// Spawn a server on an ephemeral port.
    pub fn spawn(
        responder: impl Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    ) -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap(), responder)
    }

    /// Spawn a server on a specific address, e.g. a port a test reserved
    /// earlier.
    pub fn bind(
        addr: SocketAddr,
        responder: impl Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();

        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let requests = requests.clone();
            let shutdown = shutdown.clone();

            thread::spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            if let Err(e) = serve(stream, &requests, &responder) {
                                eprintln!("test server: connection failed: {}", e);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(2));
                        }
                        Err(e) => {
                            eprintln!("test server: accept failed: {}", e);
                            break;
                        }
                    }
                }
            })
        };

        Self {
            addr,
            requests,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until the server has seen at least `count` requests.
    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if self.request_count() >= count {
                return true;
            }

            thread::sleep(Duration::from_millis(2));
        }

        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            drop(thread.join());
        }
    }
}

fn serve<F>(
    stream: TcpStream,
    requests: &Mutex<Vec<RecordedRequest>>,
    responder: &F,
) -> io::Result<()>
where
    F: Fn(&RecordedRequest) -> MockResponse,
{
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // A connection that sends nothing is not a request.
    if request_line.trim().is_empty() {
        return Ok(());
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let path = parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();

    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;

        let line = line.trim_end();

        if line.is_empty() {
            break;
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.to_owned(), value.trim_start().to_owned()));
        }
    }

    let expects_continue = headers
        .iter()
        .any(|(name, value)| name.eq_ignore_ascii_case("Expect") && value.contains("100-continue"));

    if expects_continue {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;

    let request = RecordedRequest {
        number: requests.lock().unwrap().len() + 1,
        method: method.clone(),
        path,
        headers,
        body,
        received_at: Instant::now(),
    };

    let response = responder(&request);
    requests.lock().unwrap().push(request);

    if response.delay > Duration::ZERO {
        thread::sleep(response.delay);
    }

    let mut payload = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    )
    .into_bytes();

    for (name, value) in &response.headers {
        payload.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }

    payload.extend_from_slice(
        format!("Content-Length: {}\r\nConnection: close\r\n\r\n", response.body.len()).as_bytes(),
    );

    if method != "HEAD" {
        payload.extend_from_slice(&response.body);
    }

    // The client may have hung up already, e.g. after a timeout.
    drop(stream.write_all(&payload));

    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
