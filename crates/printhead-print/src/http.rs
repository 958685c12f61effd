// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 request framing for the IPP front end.
//
// IPP clients send a single POST with an `application/ipp` body.  We only
// need the request line, the framing headers, and the body, so this is a
// small buffered reader driven by an explicit state machine rather than a
// general HTTP server.
//
// Body length is taken from Content-Length when present and positive, else
// from chunked transfer encoding, else the body runs until the peer closes.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, trace};

/// Largest request body accepted (64 MiB).
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Initial body buffer size; larger bodies grow as bytes arrive.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Longest request or header line accepted.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Consecutive blank lines tolerated where a chunk size is expected.
const MAX_BLANK_CHUNK_LINES: usize = 10;

/// A framed HTTP request.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    /// Header names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Host part of the `Host` header, without any port.
    pub fn host(&self) -> Option<&str> {
        let host = self.header("host")?;
        let host = match host.strip_prefix('[') {
            // IPv6 literal: keep the brackets
            Some(rest) => return rest.find(']').map(|end| &host[..end + 2]),
            None => host,
        };
        Some(host.split(':').next().unwrap_or(host)).filter(|h| !h.is_empty())
    }
}

/// How the body of the current request is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    ContentLength(usize),
    Chunked,
    UntilClose,
}

/// Phases of reading one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    RequestLine,
    Headers,
    Body(BodyFraming),
    Done,
}

/// Buffered reader over a client socket with a per-read idle timeout.
pub struct HttpReader<R> {
    inner: BufReader<R>,
    timeout: Duration,
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "client read timed out")
}

fn too_large(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{what} exceeds limit"))
}

impl<R: AsyncRead + Unpin> HttpReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(inner),
            timeout,
        }
    }

    /// Read one line, stripping the CR/LF terminator.
    ///
    /// Returns `None` at end of stream when nothing was read.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::new();
        let limited = &mut (&mut self.inner).take(MAX_LINE_BYTES as u64 + 1);
        let n = tokio::time::timeout(self.timeout, limited.read_until(b'\n', &mut raw))
            .await
            .map_err(|_| timed_out())??;
        if n == 0 {
            return Ok(None);
        }
        if raw.len() > MAX_LINE_BYTES {
            return Err(too_large("line"));
        }
        while matches!(raw.last(), Some(b'\n' | b'\r')) {
            raw.pop();
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Read up to `len` bytes, stopping early only if the peer closes.
    pub async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(INITIAL_BODY_CAPACITY));
        let limited = &mut (&mut self.inner).take(len as u64);
        loop {
            let n = tokio::time::timeout(self.timeout, limited.read_buf(&mut buf))
                .await
                .map_err(|_| timed_out())??;
            if n == 0 || buf.len() >= len {
                break;
            }
        }
        if buf.len() < len {
            debug!(expected = len, got = buf.len(), "peer closed before full body");
        }
        Ok(buf)
    }

    /// Read a chunked body: hex size line, that many bytes, repeat until a
    /// zero-size chunk.  Blank lines between chunks are skipped, up to a
    /// small limit.
    pub async fn read_chunked(&mut self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut blank_lines = 0;
        loop {
            let Some(line) = self.read_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                blank_lines += 1;
                if blank_lines > MAX_BLANK_CHUNK_LINES {
                    break;
                }
                continue;
            }
            blank_lines = 0;

            // Chunk extensions after ';' are ignored.
            let size_field = line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_field, 16).unwrap_or(0);
            if size == 0 {
                break;
            }
            body.len()
                .checked_add(size)
                .filter(|&total| total <= MAX_BODY_BYTES)
                .ok_or_else(|| too_large("chunked body"))?;
            trace!(size, "chunk");
            let chunk = self.read_exact(size).await?;
            let short = chunk.len() < size;
            body.extend_from_slice(&chunk);
            if short {
                break;
            }
            // trailing CRLF after the chunk data
            self.read_line().await?;
        }
        Ok(body)
    }

    /// Read until the peer closes the stream, up to `limit` bytes.
    pub async fn read_to_end(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let limited = &mut (&mut self.inner).take(limit as u64 + 1);
        loop {
            let n = tokio::time::timeout(self.timeout, limited.read_buf(&mut buf))
                .await
                .map_err(|_| timed_out())??;
            if n == 0 {
                break;
            }
        }
        if buf.len() > limit {
            return Err(too_large("body"));
        }
        Ok(buf)
    }

    /// Read one complete request.
    ///
    /// Returns `None` if the peer closed the connection without sending a
    /// request line.
    pub async fn read_request(&mut self) -> io::Result<Option<HttpRequest>> {
        let mut request = HttpRequest::default();
        let mut content_length: Option<usize> = None;
        let mut chunked = false;
        let mut phase = ReadPhase::RequestLine;

        loop {
            phase = match phase {
                ReadPhase::RequestLine => {
                    let Some(line) = self.read_line().await? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        // tolerate stray CRLF between requests
                        ReadPhase::RequestLine
                    } else {
                        let mut parts = line.split_whitespace();
                        request.method = parts.next().unwrap_or_default().to_owned();
                        request.target = parts.next().unwrap_or("/").to_owned();
                        debug!(
                            method = %request.method,
                            target = %request.target,
                            "request line"
                        );
                        ReadPhase::Headers
                    }
                }
                ReadPhase::Headers => match self.read_line().await? {
                    None => ReadPhase::Body(BodyFraming::ContentLength(0)),
                    Some(line) if line.is_empty() => {
                        let framing = match (content_length, chunked) {
                            (Some(len), _) if len > 0 => BodyFraming::ContentLength(len),
                            (_, true) => BodyFraming::Chunked,
                            _ => BodyFraming::UntilClose,
                        };
                        ReadPhase::Body(framing)
                    }
                    Some(line) => {
                        if let Some((name, value)) = line.split_once(':') {
                            let name = name.trim().to_ascii_lowercase();
                            let value = value.trim().to_owned();
                            match name.as_str() {
                                "content-length" => content_length = value.parse().ok(),
                                "transfer-encoding" => {
                                    chunked = value.to_ascii_lowercase().contains("chunked")
                                }
                                _ => {}
                            }
                            request.headers.push((name, value));
                        }
                        ReadPhase::Headers
                    }
                },
                ReadPhase::Body(framing) => {
                    request.body = match framing {
                        BodyFraming::ContentLength(len) => {
                            if len > MAX_BODY_BYTES {
                                return Err(too_large("content-length"));
                            }
                            self.read_exact(len).await?
                        }
                        BodyFraming::Chunked => self.read_chunked().await?,
                        BodyFraming::UntilClose => self.read_to_end(MAX_BODY_BYTES).await?,
                    };
                    debug!(?framing, bytes = request.body.len(), "request body read");
                    ReadPhase::Done
                }
                ReadPhase::Done => return Ok(Some(request)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &'static [u8]) -> HttpReader<&'static [u8]> {
        HttpReader::new(data, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn content_length_body() {
        let mut r = reader(
            b"POST /ipp/print HTTP/1.1\r\nHost: kiosk:6631\r\nContent-Length: 5\r\n\r\nhelloEXTRA",
        );
        let req = r.read_request().await.unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.target, "/ipp/print");
        assert_eq!(req.body, b"hello");
        assert_eq!(req.host(), Some("kiosk"));
    }

    #[tokio::test]
    async fn chunked_body() {
        let mut r = reader(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nWiki\r\n5;ext=1\r\npedia\r\n\r\n0\r\n\r\n",
        );
        let req = r.read_request().await.unwrap().unwrap();
        assert_eq!(req.body, b"Wikipedia");
    }

    #[tokio::test]
    async fn chunked_gives_up_after_blank_lines() {
        let mut r = reader(
            b"3\r\nabc\r\n\r\n\r\n\r\n\r\n\r\n\r\n\r\n\r\n\r\n\r\n\r\n5\r\nnever\r\n0\r\n",
        );
        assert_eq!(r.read_chunked().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn huge_chunk_size_is_rejected() {
        let mut r = reader(b"1\r\na\r\nffffffffffffffff\r\nmore bytes\r\n0\r\n\r\n");
        let err = r.read_chunked().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn chunks_summing_past_the_cap_are_rejected() {
        // 4 + 0x3fffffd is one byte over 64 MiB
        let mut r = reader(b"4\r\nabcd\r\n3fffffd\r\n");
        let err = r.read_chunked().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn large_content_length_does_not_preallocate() {
        let mut r = reader(b"short");
        let body = r.read_exact(MAX_BODY_BYTES).await.unwrap();
        assert_eq!(body, b"short");
        assert!(body.capacity() <= INITIAL_BODY_CAPACITY);
    }

    #[tokio::test]
    async fn body_until_close_without_length() {
        let mut r = reader(b"POST / HTTP/1.1\r\nHost: x\r\n\r\nall of it");
        let req = r.read_request().await.unwrap().unwrap();
        assert_eq!(req.body, b"all of it");
    }

    #[tokio::test]
    async fn zero_content_length_reads_to_close() {
        let mut r = reader(b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\nrest");
        let req = r.read_request().await.unwrap().unwrap();
        assert_eq!(req.body, b"rest");
    }

    #[tokio::test]
    async fn empty_stream_is_no_request() {
        let mut r = reader(b"");
        assert!(r.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let mut r = reader(b"POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\n");
        assert!(r.read_request().await.is_err());
    }

    #[tokio::test]
    async fn idle_peer_times_out() {
        let (client, server) = tokio::io::duplex(64);
        let mut r = HttpReader::new(server, Duration::from_millis(50));
        let err = r.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(client);
    }
}
