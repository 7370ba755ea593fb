// Copyright 2026 Fanout contributors

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use slog::{o, Drain, Logger};

use fanout::connection::Connection;
use fanout::error::Error;
use fanout::host::Host;
use fanout::request::{Body, Method, Response};

pub fn log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("test" => "fanout"),
    )
}

pub fn hosts(names: &[&str]) -> Vec<Host> {
    names.iter().map(|name| Host::from(*name)).collect()
}

/// What a scripted host does with its next request.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Answer with the status and a JSON body.
    Reply(u16, Value),
    /// Let the read deadline expire.
    Timeout,
    /// Reset the connection after the request was sent.
    Fail,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Created(Host),
    Sent(Host),
    Read(Host),
    Closed(Host),
}

#[derive(Debug, Default)]
struct ScriptData {
    outcomes: HashMap<Host, VecDeque<Outcome>>,
    unreachable: HashSet<Host>,
    events: Vec<Event>,
    latency: Option<Duration>,
    connections: usize,
    // Connections with a request sent and its response not yet read
    in_flight: HashSet<usize>,
    overlaps: usize,
}

/// Shared, per-host scripted behavior for `ScriptedConnection`s. Hosts
/// without queued outcomes answer 200 with `{"host": <host>}`.
#[derive(Clone, Debug, Default)]
pub struct Script(Arc<Mutex<ScriptData>>);

impl Script {
    pub fn new() -> Self {
        Script::default()
    }

    pub fn push(&self, host: &str, outcome: Outcome) {
        self.0
            .lock()
            .unwrap()
            .outcomes
            .entry(Host::from(host))
            .or_default()
            .push_back(outcome);
    }

    pub fn push_n(&self, host: &str, outcome: Outcome, n: usize) {
        (0..n).for_each(|_| self.push(host, outcome.clone()));
    }

    /// Refuse every connection attempt to `host`.
    pub fn unreachable(&self, host: &str) {
        self.0.lock().unwrap().unreachable.insert(Host::from(host));
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.0.lock().unwrap().latency = Some(latency);
    }

    /// The number of requests sent on a connection that still had a
    /// request in flight.
    pub fn overlaps(&self) -> usize {
        self.0.lock().unwrap().overlaps
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn connector(&self) -> impl Fn(&Host) -> ScriptedConnection + Send + Sync + 'static {
        let script = self.clone();
        move |host: &Host| {
            let id = {
                let mut data = script.0.lock().unwrap();
                data.events.push(Event::Created(host.clone()));
                data.connections += 1;
                data.connections
            };
            ScriptedConnection {
                id,
                host: host.clone(),
                script: script.clone(),
                pending: None,
                broken: false,
            }
        }
    }

    fn record(&self, event: Event) {
        self.0.lock().unwrap().events.push(event);
    }

    fn next(&self, id: usize, host: &Host) -> Result<Outcome, ()> {
        let mut data = self.0.lock().unwrap();
        if data.unreachable.contains(host) {
            return Err(());
        }
        if !data.in_flight.insert(id) {
            data.overlaps += 1;
        }
        let outcome = data
            .outcomes
            .get_mut(host)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Outcome::Reply(200, json!({ "host": host.as_str() })));
        Ok(outcome)
    }

    // Record the read and return the latency to wait before answering.
    fn read(&self, host: &Host) -> Option<Duration> {
        let mut data = self.0.lock().unwrap();
        data.events.push(Event::Read(host.clone()));
        data.latency
    }

    fn settle(&self, id: usize) {
        self.0.lock().unwrap().in_flight.remove(&id);
    }
}

#[derive(Debug)]
pub struct ScriptedConnection {
    id: usize,
    host: Host,
    script: Script,
    pending: Option<Outcome>,
    broken: bool,
}

impl Connection for ScriptedConnection {
    fn request(&mut self, _: Method, _: &str, _: &Body) -> Result<(), Error> {
        match self.script.next(self.id, &self.host) {
            Ok(outcome) => {
                self.script.record(Event::Sent(self.host.clone()));
                self.pending = Some(outcome);
                Ok(())
            }
            Err(()) => {
                self.broken = true;
                Err(Error::Connectivity {
                    host: self.host.clone(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                })
            }
        }
    }

    fn response(&mut self) -> Result<Response, Error> {
        if let Some(latency) = self.script.read(&self.host) {
            thread::sleep(latency);
        }
        self.script.settle(self.id);
        match self.pending.take() {
            Some(Outcome::Reply(status, value)) => Ok(Response {
                host: self.host.clone(),
                status,
                reason: reason(status).into(),
                headers: vec![("Content-Type".into(), "application/json".into())],
                body: value.to_string().into_bytes(),
            }),
            Some(Outcome::Timeout) => {
                self.broken = true;
                Err(Error::Timeout {
                    host: self.host.clone(),
                })
            }
            Some(Outcome::Fail) | None => {
                self.broken = true;
                Err(Error::Connectivity {
                    host: self.host.clone(),
                    source: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
                })
            }
        }
    }

    fn has_broken(&self) -> bool {
        self.broken
    }

    fn close(&mut self) -> Result<(), Error> {
        self.script.record(Event::Closed(self.host.clone()));
        Ok(())
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A keep-alive HTTP/1.1 server on the loopback interface, one thread per
/// connection. Every response body is JSON describing the request, except
/// for the special paths handled in `serve`.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

#[derive(Default)]
struct ServerState {
    timeouts: AtomicUsize,
    connections: AtomicUsize,
    requests: AtomicUsize,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("test server address");
        let state = Arc::new(ServerState::default());

        let accept_state = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                thread::spawn(move || serve(stream, addr, state));
            }
        });

        TestServer { addr, state }
    }

    pub fn host(&self) -> Host {
        Host::from(self.addr)
    }

    /// Answer the next `n` requests with 408.
    pub fn time_out_next(&self, n: usize) {
        self.state.timeouts.store(n, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

/// An address nothing listens on.
pub fn unreachable_host() -> Host {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind unused port");
    let addr = listener.local_addr().expect("unused address");
    drop(listener);
    Host::from(addr)
}

/// An address that accepts connections and closes them straight away
/// without reading.
pub fn resetting_host() -> Host {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind resetting host");
    let addr = listener.local_addr().expect("resetting host address");
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => drop(stream),
                Err(_) => break,
            }
        }
    });
    Host::from(addr)
}

struct Request {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<Request>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Ok(None);
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query),
        None => (target.clone(), ""),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    Ok(Some(Request {
        method,
        path,
        query,
        headers,
        body,
    }))
}

fn write_response<W: Write>(
    writer: &mut W,
    status: u16,
    headers: &[(&str, String)],
    body: &[u8],
    send_body: bool,
) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason(status));
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    writer.write_all(head.as_bytes())?;
    if send_body {
        writer.write_all(body)?;
    }
    writer.flush()
}

// Special paths:
// * `/text` answers with a plain text body;
// * `/gzip` compresses the body when the client accepts it;
// * `/chunked` uses chunked transfer encoding;
// * `/close` closes the connection after answering;
// * `/slow?ms=N` waits before answering;
// * any path with `?status=N` answers with that status.
fn serve(stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let mut reader = BufReader::new(stream);

    while let Ok(Some(request)) = read_request(&mut reader) {
        state.requests.fetch_add(1, Ordering::SeqCst);
        let send_body = request.method != "HEAD";

        let timed_out = state
            .timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if timed_out {
            let body = b"request timed out";
            let headers = [("Content-Length", body.len().to_string())];
            if write_response(&mut writer, 408, &headers, body, send_body).is_err() {
                return;
            }
            continue;
        }

        if let Some(ms) = request.query.get("ms").and_then(|ms| ms.parse().ok()) {
            thread::sleep(Duration::from_millis(ms));
        }
        let status = request
            .query
            .get("status")
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        let payload = json!({
            "server": addr.to_string(),
            "method": request.method,
            "path": request.path,
            "query": request.query,
            "content_type": request.headers.get("content-type"),
            "body": String::from_utf8_lossy(&request.body),
        })
        .to_string()
        .into_bytes();
        let json = ("Content-Type", String::from("application/json"));

        let result = match request.path.as_str() {
            "/text" => {
                let body = b"hello";
                let headers = [
                    ("Content-Type", String::from("text/plain; charset=utf-8")),
                    ("Content-Length", body.len().to_string()),
                ];
                write_response(&mut writer, status, &headers, body, send_body)
            }
            "/gzip" => {
                let gzip = request
                    .headers
                    .get("accept-encoding")
                    .map_or(false, |v| v.contains("gzip"));
                let mut headers = vec![json];
                let body = if gzip {
                    headers.push(("Content-Encoding", String::from("gzip")));
                    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                    encoder
                        .write_all(&payload)
                        .and_then(|_| encoder.finish())
                        .unwrap_or_default()
                } else {
                    payload
                };
                headers.push(("Content-Length", body.len().to_string()));
                write_response(&mut writer, status, &headers, &body, send_body)
            }
            "/chunked" => {
                let (first, second) = payload.split_at(payload.len() / 2);
                let mut body = Vec::new();
                for chunk in &[first, second] {
                    body.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                    body.extend_from_slice(chunk);
                    body.extend_from_slice(b"\r\n");
                }
                body.extend_from_slice(b"0\r\n\r\n");
                let headers = [json, ("Transfer-Encoding", String::from("chunked"))];
                write_response(&mut writer, status, &headers, &body, send_body)
            }
            "/close" => {
                let headers = [
                    json,
                    ("Content-Length", payload.len().to_string()),
                    ("Connection", String::from("close")),
                ];
                let _ = write_response(&mut writer, status, &headers, &payload, send_body);
                return;
            }
            _ => {
                let headers = [json, ("Content-Length", payload.len().to_string())];
                write_response(&mut writer, status, &headers, &payload, send_body)
            }
        };
        if result.is_err() {
            return;
        }
    }
}
