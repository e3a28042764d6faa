//! `httpGet` / `httpPost` (§4.4): compose `tcpConnect`/`streamWrite`/
//! `streamRead` into a minimal HTTP/1.1 client, decoding a chunked
//! transfer-encoding body the way `raya-stdlib-posix/src/fetch.rs`'s
//! `read_chunked_body` does (hex size line, that many bytes, a trailing
//! CRLF, repeat until a zero-size chunk) — adapted from a `BufReader` over
//! a blocking socket to an incrementally-filled buffer pulled from the
//! non-blocking `stream_read` primitive.
//!
//! TLS is out of scope, mirroring the teacher's own HTTP client: `https://`
//! URLs are rejected rather than silently falling back to plaintext.

use std::collections::HashMap;
use std::io::{Read, Write};

use mio::event::Source;

use crate::error::Error;
use crate::io::net::tcp_connect;
use crate::io::stream_io::{stream_read, stream_write};

/// A parsed HTTP/1.1 response (§4.4's `httpGet`/`httpPost` result shape).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// `httpGet(url, timeout)` (§4.4).
pub async fn http_get(url: &str, timeout_ms: f64) -> Result<HttpResponse, Error> {
    http_request("GET", url, None, &[], timeout_ms).await
}

/// `httpPost(url, body, timeout)` (§4.4).
pub async fn http_post(url: &str, body: &[u8], timeout_ms: f64) -> Result<HttpResponse, Error> {
    http_request("POST", url, Some(body), &[], timeout_ms).await
}

/// The general form behind [`http_get`]/[`http_post`], with room for extra
/// request headers.
pub async fn http_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    extra_headers: &[(String, String)],
    timeout_ms: f64,
) -> Result<HttpResponse, Error> {
    let (host, port, path) = parse_url(url)?;
    let mut stream = tcp_connect(&host, port, timeout_ms).await?;

    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
    if let Some(b) = body {
        request.push_str(&format!("Content-Length: {}\r\n", b.len()));
    }
    for (k, v) in extra_headers {
        request.push_str(&format!("{k}: {v}\r\n"));
    }
    request.push_str("\r\n");
    let mut out = request.into_bytes();
    if let Some(b) = body {
        out.extend_from_slice(b);
    }
    stream_write(&mut stream, &out, timeout_ms).await?;

    let mut buf = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        let chunk = stream_read(&mut stream, 4096, timeout_ms).await?;
        if chunk.is_empty() {
            return Err(Error::Io(
                "httpGet: connection closed before headers completed".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk);
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut body_buf = buf[header_end + 4..].to_vec();

    let mut lines = header_text.split("\r\n");
    let (status, status_text) = parse_status_line(lines.next().unwrap_or(""))?;

    let mut headers = HashMap::new();
    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    for line in lines {
        if let Some(idx) = line.find(':') {
            let key = line[..idx].trim().to_lowercase();
            let val = line[idx + 1..].trim().to_string();
            if key == "content-length" {
                content_length = val.parse().ok();
            }
            if key == "transfer-encoding" && val.to_lowercase().contains("chunked") {
                chunked = true;
            }
            headers.insert(key, val);
        }
    }

    let resp_body = if chunked {
        decode_chunked_body(&mut stream, body_buf, timeout_ms).await?
    } else if let Some(len) = content_length {
        while body_buf.len() < len {
            let chunk = stream_read(&mut stream, len - body_buf.len(), timeout_ms).await?;
            if chunk.is_empty() {
                break;
            }
            body_buf.extend_from_slice(&chunk);
        }
        body_buf.truncate(len);
        body_buf
    } else {
        loop {
            let chunk = stream_read(&mut stream, 4096, timeout_ms).await?;
            if chunk.is_empty() {
                break;
            }
            body_buf.extend_from_slice(&chunk);
        }
        body_buf
    };

    Ok(HttpResponse {
        status,
        status_text,
        headers,
        body: resp_body,
    })
}

/// `read_chunked_body`'s algorithm, adapted to pull more bytes from
/// `stream_read` on demand instead of a blocking `BufReader`.
async fn decode_chunked_body<S: Read + Write + Source>(
    stream: &mut S,
    mut buf: Vec<u8>,
    timeout_ms: f64,
) -> Result<Vec<u8>, Error> {
    let mut cursor = 0usize;
    let mut out = Vec::new();
    loop {
        let size_end = loop {
            if let Some(rel) = find_subsequence(&buf[cursor..], b"\r\n") {
                break cursor + rel;
            }
            let chunk = stream_read(stream, 4096, timeout_ms).await?;
            if chunk.is_empty() {
                return Err(Error::Io("httpGet: truncated chunked body".to_string()));
            }
            buf.extend_from_slice(&chunk);
        };
        let size_line = std::str::from_utf8(&buf[cursor..size_end])
            .map_err(|_| Error::Io("httpGet: non-UTF8 chunk size line".to_string()))?
            .trim();
        let size = usize::from_str_radix(size_line, 16)
            .map_err(|_| Error::Io(format!("httpGet: bad chunk size {size_line:?}")))?;
        cursor = size_end + 2;

        if size == 0 {
            return Ok(out);
        }

        while buf.len() < cursor + size + 2 {
            let chunk = stream_read(stream, 4096, timeout_ms).await?;
            if chunk.is_empty() {
                return Err(Error::Io("httpGet: truncated chunk data".to_string()));
            }
            buf.extend_from_slice(&chunk);
        }
        out.extend_from_slice(&buf[cursor..cursor + size]);
        cursor += size + 2;
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_url(url: &str) -> Result<(String, u16, String), Error> {
    let url = url.trim();
    let rest = if let Some(r) = url.strip_prefix("http://") {
        r
    } else if url.starts_with("https://") {
        return Err(Error::invalid_argument(
            "httpGet/httpPost: https:// is not supported, TLS is out of scope",
        ));
    } else {
        return Err(Error::invalid_argument(format!(
            "httpGet/httpPost: url must start with http://, got {url:?}"
        )));
    };

    let (host_port, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match host_port.find(':') {
        Some(idx) => {
            let port: u16 = host_port[idx + 1..]
                .parse()
                .map_err(|_| Error::invalid_argument("httpGet/httpPost: invalid port"))?;
            (host_port[..idx].to_string(), port)
        }
        None => (host_port.to_string(), 80),
    };
    Ok((host, port, path.to_string()))
}

fn parse_status_line(line: &str) -> Result<(u16, String), Error> {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.len() < 2 {
        return Err(Error::Io(format!("httpGet: invalid status line {line:?}")));
    }
    let status: u16 = parts[1]
        .parse()
        .map_err(|_| Error::Io(format!("httpGet: invalid status code {:?}", parts[1])))?;
    let text = parts.get(2).map(|s| s.to_string()).unwrap_or_default();
    Ok((status, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::io::{Read as StdRead, Write as StdWrite};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn https_urls_are_rejected() {
        let result = Scheduler::run_blocking(async {
            http_get("https://example.com/", 1000.0).await.map(|_| ())
        });
        assert!(matches!(result.unwrap_err(), Error::InvalidArgument(_)));
    }

    #[test]
    fn parses_a_plain_content_length_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut sock, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf);
                let body = b"hello";
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes());
                let _ = sock.write_all(body);
            }
        });

        let result = Scheduler::run_blocking(async move {
            http_get(&format!("http://127.0.0.1:{}/", addr.port()), 2000.0).await
        })
        .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body, b"hello");
    }

    #[test]
    fn parses_a_chunked_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut sock, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf);
                let resp = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                             5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
                let _ = sock.write_all(resp.as_bytes());
            }
        });

        let result = Scheduler::run_blocking(async move {
            http_get(&format!("http://127.0.0.1:{}/", addr.port()), 2000.0).await
        })
        .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body, b"hello world");
    }
}
