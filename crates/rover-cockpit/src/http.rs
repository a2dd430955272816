//! Just enough HTTP/1.1 for the rover's browser endpoints.
//!
//! Requests are read up to the end of their head; bodies are never needed.
//! Responses always carry `Connection: close`, except the MJPEG stream
//! whose head is written by hand in [`crate::stream`].

use rover_types::RoverError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request head accepted.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Parse a request head (request line plus header lines).
    pub fn parse(head: &str) -> Result<Self, RoverError> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RoverError::Io(format!("malformed request line: {request_line:?}")));
        };
        if !version.starts_with("HTTP/") {
            return Err(RoverError::Io(format!("unsupported protocol: {version}")));
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method: method.to_string(),
            path,
            query,
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decoded value of query parameter `key`.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| percent_decode(v))
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Read one request head from `reader`.
///
/// Returns `Ok(None)` when the peer closes the connection before sending
/// anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, RoverError>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| RoverError::Io(format!("reading request: {e}")))?;
        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(RoverError::Io("connection closed mid-request".to_string()));
        }
        head.extend_from_slice(&chunk[..n]);

        if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            let text = String::from_utf8_lossy(&head[..end]);
            return Request::parse(&text).map(Some);
        }
        if head.len() > MAX_HEAD_LEN {
            return Err(RoverError::Io(format!("request head exceeds {MAX_HEAD_LEN} bytes")));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self::new(200).with_body("text/html; charset=utf-8", body.as_bytes().to_vec())
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status).with_body("text/plain; charset=utf-8", body.into().into_bytes())
    }

    pub fn redirect(location: &str) -> Self {
        Self::new(301).with_header("Location", location)
    }

    pub fn not_found() -> Self {
        Self::text(404, "Not Found")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(self, content_type: &str, body: Vec<u8>) -> Self {
        let mut response = self.with_header("Content-Type", content_type);
        response.body = body;
        response
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize status line, headers, and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), RoverError>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&self.to_bytes())
            .await
            .map_err(|e| RoverError::ClientDisconnected(format!("writing response: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| RoverError::ClientDisconnected(format!("flushing response: {e}")))
    }
}

pub(crate) fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_query_and_headers() {
        let req = Request::parse(
            "GET /action?action=left&x=1 HTTP/1.1\r\nHost: rover\r\nMyAction: forward\r\n",
        )
        .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/action");
        assert_eq!(req.header("myaction"), Some("forward"));
        assert_eq!(req.header("HOST"), Some("rover"));
        assert_eq!(req.query_param("action").as_deref(), Some("left"));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let req = Request::parse("GET /action?action=start%4D&note=a+b HTTP/1.1\r\n").unwrap();
        assert_eq!(req.query_param("action").as_deref(), Some("startM"));
        assert_eq!(req.query_param("note").as_deref(), Some("a b"));
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        assert!(Request::parse("nonsense\r\n").is_err());
        assert!(Request::parse("GET / FTP/1.0\r\n").is_err());
    }

    #[tokio::test]
    async fn read_request_handles_split_head() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(b"GET /index.html HT").await.unwrap();
            client.write_all(b"TP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
            client
        });
        let req = read_request(&mut server).await.unwrap().unwrap();
        assert_eq!(req.path, "/index.html");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn read_request_returns_none_on_immediate_eof() {
        let mut empty: &[u8] = b"";
        assert!(read_request(&mut empty).await.unwrap().is_none());
    }

    #[test]
    fn response_serialization() {
        let bytes = Response::text(200, "412").with_header("X-Test", "1").to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains("X-Test: 1\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\n412"));
    }
}
