//! One request, one response, then close.
//!
//! The handler reads a single buffer, takes the first line as
//! `METHOD PATH VERSION`, logs the header lines that follow and answers every
//! request with the same HTML page reflecting method and path. There is no
//! routing and no keep-alive.
//!
//! A peer that closes without sending anything (the unblock probe, a port
//! scanner) gets no response at all.

use std::fmt::Write as _;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HttpError;

/// Size of the single read performed per connection.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Request line and raw header lines from the first read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target as sent, e.g. `/foo?bar=1`.
    pub path: String,
    /// Protocol version token, e.g. `HTTP/1.1`.
    pub version: String,
    /// Header lines in arrival order, without line terminators.
    pub headers: Vec<String>,
}

impl HttpRequest {
    /// Parses the request line and header lines out of `buf`.
    ///
    /// Bytes that are not valid UTF-8 are replaced. Headers end at the first
    /// empty line or at the end of the buffer, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::MalformedRequestLine`] if the first line does not
    /// contain at least three whitespace-separated tokens.
    ///
    /// # Example
    ///
    /// ```rust
    /// use knock::http::HttpRequest;
    ///
    /// let request = HttpRequest::parse(b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n")?;
    /// assert_eq!(request.method, "GET");
    /// assert_eq!(request.path, "/foo");
    /// assert_eq!(request.headers, ["Host: x"]);
    /// # Ok::<(), knock::HttpError>(())
    /// ```
    pub fn parse(buf: &[u8]) -> Result<Self, HttpError> {
        let text = String::from_utf8_lossy(buf);
        let mut lines = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line));

        let request_line = lines.next().unwrap_or_default();
        let mut tokens = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(HttpError::MalformedRequestLine(request_line.to_owned()));
        };

        let headers = lines
            .take_while(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Self {
            method: method.to_owned(),
            path: path.to_owned(),
            version: version.to_owned(),
            headers,
        })
    }
}

/// A complete `HTTP/1.1` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl HttpResponse {
    /// The page served for every request.
    #[must_use]
    pub fn hello(request: &HttpRequest) -> Self {
        let body = format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <head>\n    <title>Hello World</title>\n</head>\n\
             <body>\n    <h1>Hello World!</h1>\n    \
             <p>Method: {method}</p>\n    \
             <p>Path: {path}</p>\n\
             </body>\n\
             </html>",
            method = escape_html(&request.method),
            path = escape_html(&request.path),
        );
        Self::ok_html(body)
    }

    fn ok_html(body: String) -> Self {
        let headers = vec![
            ("Content-Type", "text/html".to_owned()),
            ("Content-Length", body.len().to_string()),
            ("Connection", "close".to_owned()),
        ];
        Self {
            status: 200,
            reason: "OK",
            headers,
            body,
        }
    }

    /// Status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Value of the first header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialises status line, headers and body with CRLF framing.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// The peer sent nothing; no response was written.
    Empty,
    /// A response was written for this request.
    Responded {
        /// Method of the answered request.
        method: String,
        /// Path of the answered request.
        path: String,
    },
    /// Reading, parsing or writing failed; the error has been logged.
    Failed(HttpError),
}

/// Serves one connection and closes it.
///
/// Every path, including errors, shuts the stream down and drops it before
/// returning, so the caller can move straight on to its next accept.
#[cfg_attr(
    feature = "telemetry",
    tracing::instrument(name = "knock.connection", skip_all, fields(peer = %peer))
)]
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr) -> ConnectionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let outcome = match exchange(&mut stream).await {
        Ok(Some(request)) => ConnectionOutcome::Responded {
            method: request.method,
            path: request.path,
        },
        Ok(None) => {
            tracing::debug!(%peer, "peer closed without sending data");
            ConnectionOutcome::Empty
        }
        Err(err) => {
            tracing::warn!(%peer, error = %err, "client handling error");
            ConnectionOutcome::Failed(err)
        }
    };

    if let Err(err) = stream.shutdown().await {
        tracing::debug!(%peer, error = %err, "closing client connection failed");
    }
    outcome
}

async fn exchange<S>(stream: &mut S) -> Result<Option<HttpRequest>, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let n = stream.read(&mut buf).await.map_err(HttpError::Read)?;
    if n == 0 {
        return Ok(None);
    }

    let request = HttpRequest::parse(&buf[..n])?;
    tracing::info!(
        method = %request.method,
        path = %request.path,
        version = %request.version,
        "request"
    );
    for header in &request.headers {
        tracing::debug!(%header, "header");
    }

    let response = HttpResponse::hello(&request);
    stream
        .write_all(&response.to_bytes())
        .await
        .map_err(HttpError::Write)?;
    stream.flush().await.map_err(HttpError::Write)?;
    Ok(Some(request))
}
