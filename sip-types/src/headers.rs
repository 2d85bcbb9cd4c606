//! Typed access to the headers the dialog/transaction layers depend on.
//!
//! RFC 3261 defines dozens of headers; this crate only gives first-class
//! treatment to the ones named in the spec's data model (Section 3). Every
//! other header survives parsing as [`TypedHeader::Other`] and is re-emitted
//! verbatim, so nothing is silently dropped on the wire.

use std::fmt;

use crate::error::{Error, Result};
use crate::uri::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    Route,
    RecordRoute,
    MaxForwards,
    ContentType,
    ContentLength,
    ReferTo,
    ReferredBy,
    Replaces,
    Event,
    SubscriptionState,
    Other,
}

impl HeaderName {
    /// Canonical wire name, including the compact forms RFC 3261 allows.
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ReferTo => "Refer-To",
            HeaderName::ReferredBy => "Referred-By",
            HeaderName::Replaces => "Replaces",
            HeaderName::Event => "Event",
            HeaderName::SubscriptionState => "Subscription-State",
            HeaderName::Other => "",
        }
    }

    pub fn parse(name: &str) -> HeaderName {
        match name.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "max-forwards" => HeaderName::MaxForwards,
            "content-type" | "c" => HeaderName::ContentType,
            "content-length" | "l" => HeaderName::ContentLength,
            "refer-to" | "r" => HeaderName::ReferTo,
            "referred-by" | "b" => HeaderName::ReferredBy,
            "replaces" => HeaderName::Replaces,
            "event" | "o" => HeaderName::Event,
            "subscription-state" => HeaderName::SubscriptionState,
            _ => HeaderName::Other,
        }
    }
}

/// A name-addressed URI as found in `From`/`To`/`Contact`/`Refer-To`, e.g.
/// `"Bob" <sip:bob@example.com>;tag=abc123`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: Vec<(String, Option<String>)>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == "tag")
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.retain(|(k, _)| k != "tag");
        self.params.push(("tag".to_string(), Some(tag.into())));
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Parse `["Display Name"] (<uri> | uri) *(;param[=value])`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let (display_name, uri_part, params_part) = if let Some(open) = input.find('<') {
            let name = input[..open].trim().trim_matches('"').to_string();
            let name = if name.is_empty() { None } else { Some(name) };
            let close = input[open..]
                .find('>')
                .ok_or_else(|| Error::MalformedHeader {
                    name: "name-addr".into(),
                    reason: "unterminated <uri>".into(),
                })?
                + open;
            (name, input[open + 1..close].to_string(), input[close + 1..].to_string())
        } else {
            match input.find(';') {
                Some(idx) => (None, input[..idx].to_string(), input[idx..].to_string()),
                None => (None, input.to_string(), String::new()),
            }
        };

        let uri = Uri::parse(uri_part.trim())?;
        let params = parse_params(&params_part);

        Ok(NameAddr {
            display_name,
            uri,
            params,
        })
    }
}

fn parse_params(input: &str) -> Vec<(String, Option<String>)> {
    input
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), Some(v.trim().trim_matches('"').to_string())),
            None => (p.to_string(), None),
        })
        .collect()
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{name}\" ")?;
        }
        write!(f, "<{}>", self.uri)?;
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{k}={v}")?,
                None => write!(f, ";{k}")?,
            }
        }
        Ok(())
    }
}

/// `Via: SIP/2.0/UDP host:port;branch=z9hG4bK...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, branch: impl Into<String>) -> Self {
        Via {
            transport: transport.into(),
            host: host.into(),
            port: None,
            params: vec![("branch".to_string(), Some(branch.into()))],
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == "branch")
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (proto, rest) = input.split_once(' ').ok_or_else(|| Error::MalformedHeader {
            name: "Via".into(),
            reason: "missing sent-by".into(),
        })?;
        let transport = proto
            .rsplit_once('/')
            .map(|(_, t)| t.to_string())
            .unwrap_or_else(|| "UDP".to_string());

        let (sent_by, params_str) = match rest.find(';') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        let (host, port) = match sent_by.rsplit_once(':') {
            Some((h, p)) => (h.trim().to_string(), p.trim().parse::<u16>().ok()),
            None => (sent_by.trim().to_string(), None),
        };

        Ok(Via {
            transport,
            host,
            port,
            params: parse_params(params_str),
        })
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{k}={v}")?,
                None => write!(f, ";{k}")?,
            }
        }
        Ok(())
    }
}

/// `CSeq: 1 INVITE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSeq {
    pub sequence: u32,
    pub method: crate::method::Method,
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sequence, self.method)
    }
}

/// A parsed header, either one of the spec's named headers or an opaque
/// passthrough for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedHeader {
    Via(Via),
    From(NameAddr),
    To(NameAddr),
    CallId(String),
    CSeq(CSeq),
    Contact(Vec<NameAddr>),
    Route(Vec<Uri>),
    RecordRoute(Vec<Uri>),
    MaxForwards(u32),
    ContentType(String),
    ContentLength(usize),
    ReferTo(NameAddr),
    ReferredBy(Uri),
    Replaces { call_id: String, to_tag: String, from_tag: String },
    Event { package: String, id: Option<String> },
    SubscriptionState { state: String, params: Vec<(String, Option<String>)> },
    /// Any header not named above, kept so re-emission is lossless.
    Other { name: String, value: String },
}

impl TypedHeader {
    pub fn name(&self) -> HeaderName {
        match self {
            TypedHeader::Via(_) => HeaderName::Via,
            TypedHeader::From(_) => HeaderName::From,
            TypedHeader::To(_) => HeaderName::To,
            TypedHeader::CallId(_) => HeaderName::CallId,
            TypedHeader::CSeq(_) => HeaderName::CSeq,
            TypedHeader::Contact(_) => HeaderName::Contact,
            TypedHeader::Route(_) => HeaderName::Route,
            TypedHeader::RecordRoute(_) => HeaderName::RecordRoute,
            TypedHeader::MaxForwards(_) => HeaderName::MaxForwards,
            TypedHeader::ContentType(_) => HeaderName::ContentType,
            TypedHeader::ContentLength(_) => HeaderName::ContentLength,
            TypedHeader::ReferTo(_) => HeaderName::ReferTo,
            TypedHeader::ReferredBy(_) => HeaderName::ReferredBy,
            TypedHeader::Replaces { .. } => HeaderName::Replaces,
            TypedHeader::Event { .. } => HeaderName::Event,
            TypedHeader::SubscriptionState { .. } => HeaderName::SubscriptionState,
            TypedHeader::Other { .. } => HeaderName::Other,
        }
    }

    /// Render this single header's value (without the `Name: ` prefix).
    /// Multi-valued headers (Route/Record-Route/Contact) are comma-joined
    /// per RFC 3261 Section 7.3.1.
    pub fn value_to_string(&self) -> String {
        match self {
            TypedHeader::Via(v) => v.to_string(),
            TypedHeader::From(n) | TypedHeader::To(n) | TypedHeader::ReferTo(n) => n.to_string(),
            TypedHeader::CallId(s) => s.clone(),
            TypedHeader::CSeq(c) => c.to_string(),
            TypedHeader::Contact(list) => list
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            TypedHeader::Route(list) | TypedHeader::RecordRoute(list) => list
                .iter()
                .map(|u| format!("<{u}>"))
                .collect::<Vec<_>>()
                .join(", "),
            TypedHeader::MaxForwards(n) => n.to_string(),
            TypedHeader::ContentType(s) => s.clone(),
            TypedHeader::ContentLength(n) => n.to_string(),
            TypedHeader::ReferredBy(u) => u.to_string(),
            TypedHeader::Replaces {
                call_id,
                to_tag,
                from_tag,
            } => format!("{call_id};to-tag={to_tag};from-tag={from_tag}"),
            TypedHeader::Event { package, id } => match id {
                Some(id) => format!("{package};id={id}"),
                None => package.clone(),
            },
            TypedHeader::SubscriptionState { state, params } => {
                let mut s = state.clone();
                for (k, v) in params {
                    match v {
                        Some(v) => s.push_str(&format!(";{k}={v}")),
                        None => s.push_str(&format!(";{k}")),
                    }
                }
                s
            }
            TypedHeader::Other { value, .. } => value.clone(),
        }
    }

    /// Split comma-separated lists (Route/Record-Route/Contact) honoring
    /// the rule that commas inside `<...>` never split (Section 6 of the
    /// spec's external interfaces).
    fn split_list(value: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut depth = 0i32;
        let mut start = 0usize;
        for (i, c) in value.char_indices() {
            match c {
                '<' => depth += 1,
                '>' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(value[start..i].trim().to_string());
                    start = i + 1;
                }
                _ => {}
            }
        }
        parts.push(value[start..].trim().to_string());
        parts.into_iter().filter(|s| !s.is_empty()).collect()
    }

    fn strip_angle(s: &str) -> &str {
        let s = s.trim();
        if let Some(stripped) = s.strip_prefix('<') {
            stripped.strip_suffix('>').unwrap_or(stripped)
        } else {
            // May still carry trailing `;params` for a strict-routing URI.
            s.split(';').next().unwrap_or(s)
        }
    }

    pub fn parse(name: HeaderName, raw_name: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        Ok(match name {
            HeaderName::Via => TypedHeader::Via(Via::parse(value)?),
            HeaderName::From => TypedHeader::From(NameAddr::parse(value)?),
            HeaderName::To => TypedHeader::To(NameAddr::parse(value)?),
            HeaderName::CallId => TypedHeader::CallId(value.to_string()),
            HeaderName::CSeq => {
                let (num, method) = value.split_once(' ').ok_or_else(|| Error::MalformedHeader {
                    name: "CSeq".into(),
                    reason: "expected '<number> <method>'".into(),
                })?;
                let sequence: u32 = num.trim().parse().map_err(|_| Error::MalformedHeader {
                    name: "CSeq".into(),
                    reason: "non-numeric sequence".into(),
                })?;
                TypedHeader::CSeq(CSeq {
                    sequence,
                    method: method.trim().parse()?,
                })
            }
            HeaderName::Contact => {
                if value == "*" {
                    TypedHeader::Contact(Vec::new())
                } else {
                    let mut list = Vec::new();
                    for part in Self::split_list(value) {
                        list.push(NameAddr::parse(&part)?);
                    }
                    TypedHeader::Contact(list)
                }
            }
            HeaderName::Route => TypedHeader::Route(
                Self::split_list(value)
                    .iter()
                    .map(|p| Uri::parse(Self::strip_angle(p)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            HeaderName::RecordRoute => TypedHeader::RecordRoute(
                Self::split_list(value)
                    .iter()
                    .map(|p| Uri::parse(Self::strip_angle(p)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            HeaderName::MaxForwards => {
                TypedHeader::MaxForwards(value.parse().map_err(|_| Error::MalformedHeader {
                    name: "Max-Forwards".into(),
                    reason: "non-numeric".into(),
                })?)
            }
            HeaderName::ContentType => TypedHeader::ContentType(value.to_string()),
            HeaderName::ContentLength => {
                TypedHeader::ContentLength(value.parse().map_err(|_| Error::MalformedHeader {
                    name: "Content-Length".into(),
                    reason: "non-numeric".into(),
                })?)
            }
            HeaderName::ReferTo => TypedHeader::ReferTo(NameAddr::parse(value)?),
            HeaderName::ReferredBy => TypedHeader::ReferredBy(Uri::parse(Self::strip_angle(value))?),
            HeaderName::Replaces => {
                let (call_id, params_str) = match value.split_once(';') {
                    Some((c, p)) => (c.to_string(), p),
                    None => (value.to_string(), ""),
                };
                let params = parse_params(params_str);
                let to_tag = params
                    .iter()
                    .find(|(k, _)| k == "to-tag")
                    .and_then(|(_, v)| v.clone())
                    .unwrap_or_default();
                let from_tag = params
                    .iter()
                    .find(|(k, _)| k == "from-tag")
                    .and_then(|(_, v)| v.clone())
                    .unwrap_or_default();
                TypedHeader::Replaces {
                    call_id,
                    to_tag,
                    from_tag,
                }
            }
            HeaderName::Event => {
                let (package, params_str) = match value.split_once(';') {
                    Some((p, r)) => (p.to_string(), r),
                    None => (value.to_string(), ""),
                };
                let id = parse_params(params_str)
                    .into_iter()
                    .find(|(k, _)| k == "id")
                    .and_then(|(_, v)| v);
                TypedHeader::Event { package, id }
            }
            HeaderName::SubscriptionState => {
                let (state, params_str) = match value.split_once(';') {
                    Some((s, r)) => (s.to_string(), r),
                    None => (value.to_string(), ""),
                };
                TypedHeader::SubscriptionState {
                    state,
                    params: parse_params(params_str),
                }
            }
            HeaderName::Other => TypedHeader::Other {
                name: raw_name.to_string(),
                value: value.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_via_branch() {
        let via = Via::parse("SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK-A1").unwrap();
        assert_eq!(via.branch(), Some("z9hG4bK-A1"));
        assert_eq!(via.transport, "UDP");
    }

    #[test]
    fn parses_from_with_tag() {
        let na = NameAddr::parse("\"Alice\" <sip:alice@example.com>;tag=ta").unwrap();
        assert_eq!(na.display_name.as_deref(), Some("Alice"));
        assert_eq!(na.tag(), Some("ta"));
    }

    #[test]
    fn parses_bare_uri_to_header() {
        let na = NameAddr::parse("sip:bob@example.com").unwrap();
        assert!(na.tag().is_none());
        assert_eq!(na.uri.host, "example.com");
    }

    #[test]
    fn splits_route_list_honoring_angle_brackets() {
        let list = TypedHeader::split_list("<sip:p1.example.com;lr>, <sip:p2.example.com;lr>");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn parses_cseq() {
        let h = TypedHeader::parse(HeaderName::CSeq, "CSeq", "1 INVITE").unwrap();
        match h {
            TypedHeader::CSeq(c) => {
                assert_eq!(c.sequence, 1);
                assert_eq!(c.method, crate::method::Method::Invite);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_subscription_state_terminated() {
        let h = TypedHeader::parse(
            HeaderName::SubscriptionState,
            "Subscription-State",
            "terminated;reason=noresource",
        )
        .unwrap();
        match h {
            TypedHeader::SubscriptionState { state, params } => {
                assert_eq!(state, "terminated");
                assert_eq!(params[0], ("reason".to_string(), Some("noresource".to_string())));
            }
            _ => panic!("wrong variant"),
        }
    }
}
