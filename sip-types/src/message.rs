//! Request/Response message model and wire framing.
//!
//! Framing here implements the rule the transport layer depends on: headers
//! terminated by a blank line, followed by exactly `Content-Length` bytes of
//! body (Section 4.1 of the spec). It is deliberately not a full grammar
//! parser — unknown headers pass through as [`crate::headers::TypedHeader::Other`].

use std::fmt;

use crate::error::{Error, Result};
use crate::headers::{CSeq, HeaderName, NameAddr, TypedHeader, Via};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;

/// Maximum single SIP message the transport accepts off the wire, matching
/// the largest UDP datagram payload (Section 4.1).
pub const MAX_MESSAGE_SIZE: usize = 65507;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Vec<TypedHeader>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Vec<TypedHeader>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

macro_rules! header_accessors {
    ($ty:ident) => {
        impl $ty {
            pub fn header(&self, name: HeaderName) -> Option<&TypedHeader> {
                self.headers.iter().find(|h| h.name() == name)
            }

            pub fn headers_named(&self, name: HeaderName) -> impl Iterator<Item = &TypedHeader> {
                self.headers.iter().filter(move |h| h.name() == name)
            }

            pub fn remove_headers(&mut self, name: HeaderName) {
                self.headers.retain(|h| h.name() != name);
            }

            pub fn push_header(&mut self, header: TypedHeader) {
                self.headers.push(header);
            }

            pub fn via(&self) -> Option<&Via> {
                match self.header(HeaderName::Via) {
                    Some(TypedHeader::Via(v)) => Some(v),
                    _ => None,
                }
            }

            pub fn from_header(&self) -> Option<&NameAddr> {
                match self.header(HeaderName::From) {
                    Some(TypedHeader::From(n)) => Some(n),
                    _ => None,
                }
            }

            pub fn to_header(&self) -> Option<&NameAddr> {
                match self.header(HeaderName::To) {
                    Some(TypedHeader::To(n)) => Some(n),
                    _ => None,
                }
            }

            pub fn call_id(&self) -> Option<&str> {
                match self.header(HeaderName::CallId) {
                    Some(TypedHeader::CallId(s)) => Some(s.as_str()),
                    _ => None,
                }
            }

            pub fn cseq(&self) -> Option<&CSeq> {
                match self.header(HeaderName::CSeq) {
                    Some(TypedHeader::CSeq(c)) => Some(c),
                    _ => None,
                }
            }

            pub fn contacts(&self) -> Option<&[NameAddr]> {
                match self.header(HeaderName::Contact) {
                    Some(TypedHeader::Contact(list)) => Some(list.as_slice()),
                    _ => None,
                }
            }

            pub fn record_routes(&self) -> Vec<Uri> {
                self.headers_named(HeaderName::RecordRoute)
                    .flat_map(|h| match h {
                        TypedHeader::RecordRoute(list) => list.clone(),
                        _ => Vec::new(),
                    })
                    .collect()
            }

            pub fn routes(&self) -> Vec<Uri> {
                self.headers_named(HeaderName::Route)
                    .flat_map(|h| match h {
                        TypedHeader::Route(list) => list.clone(),
                        _ => Vec::new(),
                    })
                    .collect()
            }

            pub fn body_string(&self) -> Option<String> {
                if self.body.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(&self.body).into_owned())
                }
            }
        }
    };
}

header_accessors!(Request);
header_accessors!(Response);

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    fn start_line(&self) -> String {
        format!("{} {} SIP/2.0", self.method, self.uri)
    }
}

impl Response {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Response {
            reason: {
                let r = reason.into();
                if r.is_empty() {
                    status.default_reason().to_string()
                } else {
                    r
                }
            },
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn for_status(status: StatusCode) -> Self {
        Response::new(status, status.default_reason())
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    fn start_line(&self) -> String {
        format!("SIP/2.0 {} {}", self.status, self.reason)
    }
}

impl Message {
    pub fn to_bytes(&self) -> Vec<u8> {
        let (start_line, headers, body): (String, &[TypedHeader], &[u8]) = match self {
            Message::Request(r) => (r.start_line(), &r.headers, &r.body),
            Message::Response(r) => (r.start_line(), &r.headers, &r.body),
        };

        let mut out = String::new();
        out.push_str(&start_line);
        out.push_str("\r\n");

        let mut wrote_content_length = false;
        for h in headers {
            if h.name() == HeaderName::ContentLength {
                wrote_content_length = true;
            }
            let name = match h {
                TypedHeader::Other { name, .. } => name.as_str(),
                _ => h.name().as_str(),
            };
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&h.value_to_string());
            out.push_str("\r\n");
        }
        if !wrote_content_length {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    /// Parse one complete message out of `input`. Returns the message and
    /// the number of bytes consumed, so stream transports can frame
    /// multiple messages off one buffer (Section 4.1).
    pub fn parse(input: &[u8]) -> Result<(Message, usize)> {
        if input.len() > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge);
        }

        let header_end = find_header_end(input).ok_or(Error::Incomplete)?;
        let header_bytes = &input[..header_end];
        let text = std::str::from_utf8(header_bytes)
            .map_err(|_| Error::MalformedStartLine("non-UTF8 headers".into()))?;

        let mut lines = unfold_headers(text);
        if lines.is_empty() {
            return Err(Error::MalformedStartLine("empty message".into()));
        }
        let start_line = lines.remove(0);

        let mut headers = Vec::new();
        for line in &lines {
            let (raw_name, value) = line.split_once(':').ok_or_else(|| Error::MalformedHeader {
                name: line.clone(),
                reason: "missing ':'".into(),
            })?;
            let raw_name = raw_name.trim();
            let name = HeaderName::parse(raw_name);
            headers.push(TypedHeader::parse(name, raw_name, value)?);
        }

        let content_length = headers.iter().find_map(|h| match h {
            TypedHeader::ContentLength(n) => Some(*n),
            _ => None,
        });
        let content_length = content_length.ok_or(Error::MissingHeader("Content-Length"))?;

        let body_start = header_end;
        if input.len() < body_start + content_length {
            return Err(Error::Incomplete);
        }
        let body = input[body_start..body_start + content_length].to_vec();
        let consumed = body_start + content_length;

        let message = if start_line.starts_with("SIP/2.0") {
            let mut parts = start_line.splitn(3, ' ');
            let _version = parts.next();
            let code: u16 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::MalformedStartLine(start_line.clone()))?;
            let reason = parts.next().unwrap_or("").to_string();
            Message::Response(Response {
                status: StatusCode(code),
                reason,
                headers,
                body,
            })
        } else {
            let mut parts = start_line.splitn(3, ' ');
            let method = parts
                .next()
                .ok_or_else(|| Error::MalformedStartLine(start_line.clone()))?
                .parse()?;
            let uri = Uri::parse(
                parts
                    .next()
                    .ok_or_else(|| Error::MalformedStartLine(start_line.clone()))?,
            )?;
            Message::Request(Request {
                method,
                uri,
                headers,
                body,
            })
        };

        Ok((message, consumed))
    }
}

/// Find the index right after the CRLFCRLF (or LFLF) that terminates the
/// header block.
fn find_header_end(input: &[u8]) -> Option<usize> {
    input
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| input.windows(2).position(|w| w == b"\n\n").map(|i| i + 2))
}

/// Split header text into logical lines, joining any RFC 2822-style folded
/// continuation lines (leading whitespace) onto the previous line.
fn unfold_headers(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in text.split("\r\n").flat_map(|l| l.split('\n')) {
        if raw.is_empty() {
            continue;
        }
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            let last: &mut String = lines.last_mut().unwrap();
            last.push(' ');
            last.push_str(raw.trim());
        } else {
            lines.push(raw.to_string());
        }
    }
    lines
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "{} {}", r.method, r.uri),
            Message::Response(r) => write!(f, "{} {}", r.status, r.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Via;

    fn sample_invite() -> Request {
        let mut req = Request::new(Method::Invite, Uri::parse("sip:bob@example.com").unwrap());
        req.push_header(TypedHeader::Via(Via::new("UDP", "10.0.0.1:5060", "z9hG4bK-A1")));
        req.push_header(TypedHeader::From(NameAddr {
            display_name: None,
            uri: Uri::parse("sip:alice@example.com").unwrap(),
            params: vec![("tag".to_string(), Some("ta".to_string()))],
        }));
        req.push_header(TypedHeader::To(NameAddr::new(
            Uri::parse("sip:bob@example.com").unwrap(),
        )));
        req.push_header(TypedHeader::CallId("cid".to_string()));
        req.push_header(TypedHeader::CSeq(CSeq {
            sequence: 1,
            method: Method::Invite,
        }));
        req.push_header(TypedHeader::MaxForwards(70));
        req
    }

    #[test]
    fn round_trips_request_through_wire_bytes() {
        let req = sample_invite();
        let bytes = Message::Request(req.clone()).to_bytes();
        let (parsed, consumed) = Message::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        match parsed {
            Message::Request(p) => {
                assert_eq!(p.method, Method::Invite);
                assert_eq!(p.call_id(), Some("cid"));
                assert_eq!(p.cseq().unwrap().sequence, 1);
                assert_eq!(p.via().unwrap().branch(), Some("z9hG4bK-A1"));
                assert_eq!(p.from_header().unwrap().tag(), Some("ta"));
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn frames_exact_content_length_from_a_longer_buffer() {
        let req = sample_invite().with_body(b"v=0".to_vec());
        let mut bytes = Message::Request(req).to_bytes();
        bytes.extend_from_slice(b"garbage-from-the-next-message");
        let (_msg, consumed) = Message::parse(&bytes).unwrap();
        assert!(consumed < bytes.len());
    }

    #[test]
    fn incomplete_body_is_reported_as_incomplete() {
        let req = sample_invite().with_body(b"v=0".to_vec());
        let bytes = Message::Request(req).to_bytes();
        let truncated = &bytes[..bytes.len() - 1];
        assert_eq!(Message::parse(truncated), Err(Error::Incomplete));
    }

    #[test]
    fn response_round_trips() {
        let resp = Response::new(StatusCode::RINGING, "").with_body(Vec::new());
        let bytes = Message::Response(resp).to_bytes();
        let (parsed, _) = Message::parse(&bytes).unwrap();
        match parsed {
            Message::Response(r) => assert_eq!(r.status, StatusCode::RINGING),
            _ => panic!("expected response"),
        }
    }
}
