// Copyright 2026 Fanout contributors

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use flate2::read::GzDecoder;

use crate::connection::{Connection, Interrupt};
use crate::error::Error;
use crate::host::Host;
use crate::request::{Body, Method, Response};

// Upper bounds on a response head, to fail on garbage rather than buffer it
const MAX_HEADERS: usize = 64;
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Socket settings applied to every `HttpConnection`.
#[derive(Copy, Clone, Debug, Default)]
pub struct HttpConnectionOptions {
    /// Bound on establishing the TCP connection. Blocks indefinitely if
    /// `None`.
    pub connect_timeout: Option<Duration>,
    /// Bound on each blocking read of a response. Expiry is reported as
    /// `Error::Timeout`. Blocks indefinitely if `None`.
    pub read_timeout: Option<Duration>,
}

/// A persistent HTTP/1.1 connection to one host.
///
/// The TCP connection is established lazily by the first request and kept
/// alive across requests until the server closes it or a transport error
/// occurs, at which point the connection reports itself broken.
#[derive(Debug)]
pub struct HttpConnection {
    host: Host,
    options: HttpConnectionOptions,
    reader: Option<BufReader<TcpStream>>,
    pending: Option<Method>,
    served: u64,
    broken: bool,
}

impl HttpConnection {
    pub fn new(host: &Host, options: HttpConnectionOptions) -> Self {
        HttpConnection {
            host: host.clone(),
            options,
            reader: None,
            pending: None,
            served: 0,
            broken: false,
        }
    }

    /// Return a function suitable for use as the connection factory of a
    /// `ConnectionPool`.
    pub fn connection_creator(
        options: HttpConnectionOptions,
    ) -> impl Fn(&Host) -> HttpConnection + Send + Sync + 'static {
        move |host| HttpConnection::new(host, options)
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The number of responses received over this connection.
    pub fn served(&self) -> u64 {
        self.served
    }

    fn open(&self) -> Result<TcpStream, Error> {
        let transport = |e: io::Error| Error::Connectivity {
            host: self.host.clone(),
            source: e,
        };
        let mut last_err = None;
        for addr in self.host.socket_addrs().map_err(transport)? {
            let attempt = match self.options.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream
                        .set_read_timeout(self.options.read_timeout)
                        .map_err(transport)?;
                    stream.set_nodelay(true).map_err(transport)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(transport(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
        })))
    }

    // Record a transport failure and classify it. A reused connection that
    // fails before any part of the response arrived was closed by the server
    // while idle; like an expired read deadline it is reported as a timeout
    // so the request is re-issued.
    fn fail(&mut self, error: io::Error, started: bool) -> Error {
        self.broken = true;
        self.reader = None;
        self.pending = None;

        let expired_keep_alive = self.served > 0
            && !started
            && matches!(
                error.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            );
        let deadline = matches!(
            error.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        );

        if expired_keep_alive || deadline {
            Error::Timeout {
                host: self.host.clone(),
            }
        } else {
            Error::Connectivity {
                host: self.host.clone(),
                source: error,
            }
        }
    }
}

impl Connection for HttpConnection {
    fn request(
        &mut self,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<(), Error> {
        if self.broken {
            return Err(Error::connectivity(
                &self.host,
                io::ErrorKind::NotConnected,
                "connection is broken",
            ));
        }

        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => match self.open() {
                Ok(stream) => BufReader::new(stream),
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            },
        };

        let message = encode_request(&self.host, method, path, body);
        let stream = reader.get_mut();
        match stream.write_all(&message).and_then(|_| stream.flush()) {
            Ok(()) => {
                self.reader = Some(reader);
                self.pending = Some(method);
                Ok(())
            }
            Err(e) => Err(self.fail(e, false)),
        }
    }

    fn response(&mut self) -> Result<Response, Error> {
        let (method, mut reader) = match (self.pending.take(), self.reader.take()) {
            (Some(method), Some(reader)) => (method, reader),
            _ => {
                return Err(Error::connectivity(
                    &self.host,
                    io::ErrorKind::NotConnected,
                    "no request in flight",
                ))
            }
        };

        match read_response(&self.host, &mut reader, method) {
            Ok((response, reusable)) => {
                self.served += 1;
                if reusable {
                    self.reader = Some(reader);
                } else {
                    self.broken = true;
                }
                Ok(response)
            }
            Err(ReadFailure { error, started }) => Err(self.fail(error, started)),
        }
    }

    fn interrupter(&self) -> Option<Interrupt> {
        let stream = self.reader.as_ref()?.get_ref().try_clone().ok()?;
        Some(Box::new(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }

    fn has_broken(&self) -> bool {
        self.broken
    }

    fn is_valid(&mut self) -> bool {
        if self.broken || self.pending.is_some() {
            return false;
        }
        let alive = match &self.reader {
            None => true,
            Some(reader) if !reader.buffer().is_empty() => false,
            Some(reader) => peer_open(reader.get_ref()),
        };
        if !alive {
            self.broken = true;
            self.reader = None;
        }
        alive
    }

    fn close(&mut self) -> Result<(), Error> {
        self.reader = None;
        self.pending = None;
        Ok(())
    }
}

// An idle keep-alive socket has nothing to read. Readable data or
// end-of-stream means the server closed it or broke the protocol.
fn peer_open(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut buf = [0u8; 1];
    let idle = match stream.peek(&mut buf) {
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::WouldBlock,
    };
    stream.set_nonblocking(false).is_ok() && idle
}

fn encode_request(host: &Host, method: Method, path: &str, body: &Body) -> Vec<u8> {
    let path = if path.is_empty() { "/" } else { path };
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nAccept-Encoding: gzip\r\n",
        method,
        path,
        host.authority()
    );
    let payload = match body.encode() {
        Some((content_type, bytes)) => {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
            bytes
        }
        None => Vec::new(),
    };
    head.push_str(&format!("Content-Length: {}\r\n\r\n", payload.len()));

    let mut message = head.into_bytes();
    message.extend_from_slice(&payload);
    message
}

#[derive(Debug)]
struct ReadFailure {
    error: io::Error,
    // Whether any byte of the response had arrived
    started: bool,
}

impl From<io::Error> for ReadFailure {
    fn from(error: io::Error) -> Self {
        ReadFailure {
            error,
            started: true,
        }
    }
}

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn unexpected_eof() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before the response completed",
    )
}

// Read one complete response. The flag returned alongside it says whether
// the connection may carry another request.
fn read_response<R: BufRead>(
    host: &Host,
    reader: &mut R,
    method: Method,
) -> Result<(Response, bool), ReadFailure> {
    let mut head = Vec::new();
    let (version, status, reason, headers) = loop {
        head.clear();
        if let Err(error) = read_head(reader, &mut head) {
            let started = !head.is_empty();
            return Err(ReadFailure { error, started });
        }
        let parsed = parse_head(&head)?;
        // Interim responses precede the real one
        if (100..200).contains(&parsed.1) && parsed.1 != 101 {
            continue;
        }
        break parsed;
    };

    let mut response = Response {
        host: host.clone(),
        status,
        reason,
        headers,
        body: Vec::new(),
    };

    let connection = response
        .header("connection")
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();
    let mut reusable = if version == 0 {
        connection.contains("keep-alive")
    } else {
        !connection.contains("close")
    };

    let bodiless = method == Method::Head
        || (100..200).contains(&status)
        || status == 204
        || status == 304;
    let chunked = response
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let content_length = match response.header("content-length") {
        Some(len) => Some(len.trim().parse::<u64>().map_err(invalid_data)?),
        None => None,
    };

    let raw = if bodiless {
        Vec::new()
    } else if chunked {
        read_chunked(reader)?
    } else if let Some(len) = content_length {
        let mut body = Vec::new();
        reader.by_ref().take(len).read_to_end(&mut body)?;
        if (body.len() as u64) < len {
            return Err(unexpected_eof().into());
        }
        body
    } else {
        // Delimited by the server closing the connection
        reusable = false;
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        body
    };

    let gzipped = response
        .header("content-encoding")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "gzip" || v == "x-gzip"
        })
        .unwrap_or(false);
    response.body = if gzipped && !raw.is_empty() {
        let mut body = Vec::new();
        GzDecoder::new(&raw[..])
            .read_to_end(&mut body)
            .map_err(invalid_data)?;
        body
    } else {
        raw
    };

    Ok((response, reusable))
}

// Read the status line and headers, through the blank line, into `head`.
fn read_head<R: BufRead>(reader: &mut R, head: &mut Vec<u8>) -> io::Result<()> {
    loop {
        let start = head.len();
        if reader.read_until(b'\n', head)? == 0 {
            return Err(unexpected_eof());
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // Tolerate stray line breaks between responses
                head.clear();
                continue;
            }
            return Ok(());
        }
        if head.len() > MAX_HEAD_SIZE {
            return Err(invalid_data("response head too large"));
        }
    }
}

type Head = (u8, u16, String, Vec<(String, String)>);

fn parse_head(head: &[u8]) -> Result<Head, ReadFailure> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => (),
        Ok(httparse::Status::Partial) => {
            return Err(invalid_data("incomplete response head").into())
        }
        Err(e) => return Err(invalid_data(e).into()),
    }

    let version = parsed.version.unwrap_or(1);
    let status = parsed
        .code
        .ok_or_else(|| ReadFailure::from(invalid_data("missing status code")))?;
    let reason = parsed.reason.unwrap_or_default().to_string();
    let headers = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();
    Ok((version, status, reason, headers))
}

fn read_chunked<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(unexpected_eof());
        }
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| invalid_data(format!("invalid chunk size {:?}", size_field)))?;

        if size == 0 {
            // Skip any trailers
            loop {
                line.clear();
                if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                    return Ok(body);
                }
            }
        }

        let start = body.len();
        reader.by_ref().take(size as u64).read_to_end(&mut body)?;
        if body.len() - start < size {
            return Err(unexpected_eof());
        }
        line.clear();
        reader.read_line(&mut line)?;
    }
}
