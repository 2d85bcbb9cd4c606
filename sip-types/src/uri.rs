//! SIP/SIPS URI type (RFC 3261 Section 19.1)

use std::fmt;

use crate::error::{Error, Result};

/// A SIP or SIPS URI, e.g. `sip:bob@example.com;transport=tcp`.
///
/// This is intentionally a narrow model of RFC 3261 URIs: enough to drive
/// routing, dialog identification, and target refresh. It does not attempt
/// to validate every `userinfo`/`host`/`uri-parameter` production.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub secure: bool,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// URI parameters in the order they appeared (`;lr`, `;transport=tcp`, ...).
    pub params: Vec<(String, Option<String>)>,
    /// URI headers after `?` (RFC 3261 Section 19.1.1), e.g. the `Replaces`
    /// header RFC 3891 embeds in a `Refer-To` URI for attended transfer.
    pub headers: Vec<(String, String)>,
}

impl Uri {
    pub fn sip(host_and_user: impl Into<String>) -> Self {
        let s = host_and_user.into();
        Self::parse(&format!("sip:{s}")).unwrap_or(Uri {
            secure: false,
            user: None,
            host: s,
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        })
    }

    /// Parse a `sip:`/`sips:` URI. Angle brackets, if present, must be
    /// stripped by the caller (e.g. when extracting from a `Contact` header).
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once(':')
            .ok_or_else(|| Error::MalformedUri(input.to_string()))?;
        let secure = match scheme {
            "sip" => false,
            "sips" => true,
            other => return Err(Error::MalformedUri(format!("unsupported scheme {other}"))),
        };

        // Split off URI parameters (after the first unescaped `;` that is
        // not inside the userinfo) and headers (after `?`).
        let (rest, headers_str) = match rest.split_once('?') {
            Some((before, after)) => (before, Some(after)),
            None => (rest, None),
        };

        let (authority, params_str) = match rest.find(';') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        let (user, hostport) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u.to_string()), h),
            None => (None, authority),
        };

        let (host, port) = if let Some(idx) = hostport.rfind(':') {
            // Guard against IPv6 literals; out of scope here, treated as a
            // plain host since this core never dials literal IPv6 targets.
            let (h, p) = hostport.split_at(idx);
            let p = &p[1..];
            match p.parse::<u16>() {
                Ok(port) => (h.to_string(), Some(port)),
                Err(_) => (hostport.to_string(), None),
            }
        } else {
            (hostport.to_string(), None)
        };

        if host.is_empty() {
            return Err(Error::MalformedUri(input.to_string()));
        }

        let params = if params_str.is_empty() {
            Vec::new()
        } else {
            params_str
                .split(';')
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (p.to_string(), None),
                })
                .collect()
        };

        let headers = headers_str
            .unwrap_or("")
            .split('&')
            .filter(|h| !h.is_empty())
            .map(|h| match h.split_once('=') {
                Some((k, v)) => (urldecode(k), urldecode(v)),
                None => (urldecode(h), String::new()),
            })
            .collect();

        Ok(Uri {
            secure,
            user,
            host,
            port,
            params,
            headers,
        })
    }

    /// Value of a single URI header (after `?`), decoded. `Refer-To` uses
    /// this for an embedded `Replaces` (RFC 3891).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// True if the URI carries the `;lr` loose-routing parameter (RFC 3261
    /// Section 19.1.1).
    pub fn is_loose_routing(&self) -> bool {
        self.params.iter().any(|(k, _)| k == "lr")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", if self.secure { "sips" } else { "sip" })?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{k}={v}")?,
                None => write!(f, ";{k}")?,
            }
        }
        for (i, (k, v)) in self.headers.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { "?" } else { "&" }, urlencode(k), urlencode(v))?;
        }
        Ok(())
    }
}

/// Minimal percent-decoding for URI-header values; these are SIP-internal
/// tokens (Call-IDs, tags), never free text, so no charset handling beyond
/// ASCII hex escapes is needed.
fn urldecode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

impl std::str::FromStr for Uri {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Uri::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_uri() {
        let uri = Uri::parse("sip:bob@example.com").unwrap();
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.host, "example.com");
        assert!(uri.port.is_none());
        assert!(!uri.secure);
    }

    #[test]
    fn parses_loose_routing_param() {
        let uri = Uri::parse("sip:p1.example.com;lr").unwrap();
        assert!(uri.is_loose_routing());
    }

    #[test]
    fn parses_port_and_transport() {
        let uri = Uri::parse("sip:bob@1.2.3.4:5070;transport=tcp").unwrap();
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.param("transport"), Some("tcp"));
    }

    #[test]
    fn round_trips_via_display() {
        let uri = Uri::parse("sip:bob@1.2.3.4").unwrap();
        assert_eq!(uri.to_string(), "sip:bob@1.2.3.4");
    }

    #[test]
    fn parses_embedded_replaces_header() {
        let uri = Uri::parse("sip:bob@example.com?Replaces=abc123%3Bto-tag%3D314159%3Bfrom-tag%3D1234567").unwrap();
        assert_eq!(uri.header("Replaces"), Some("abc123;to-tag=314159;from-tag=1234567"));
    }

    #[test]
    fn with_header_round_trips() {
        let uri = Uri::parse("sip:bob@example.com").unwrap().with_header("Replaces", "a;to-tag=1");
        let rendered = uri.to_string();
        let reparsed = Uri::parse(&rendered).unwrap();
        assert_eq!(reparsed.header("Replaces"), Some("a;to-tag=1"));
    }
}
