//! Framework-neutral view of an inbound request.
//!
//! The embedding layer copies method, URI, headers, peer address and body
//! into an [`InboundRequest`]; the guards read only from it.

/// Headers consulted, in order, for the originating client address.
pub const CLIENT_IP_HEADERS: [&str; 6] = [
    "X-Forwarded-For",
    "X-Real-IP",
    "Proxy-Client-IP",
    "WL-Proxy-Client-IP",
    "HTTP_CLIENT_IP",
    "HTTP_X_FORWARDED_FOR",
];

const UNKNOWN_IP: &str = "unknown";

#[derive(Clone, Debug, Default)]
pub struct InboundRequest {
    method: String,
    uri: String,
    remote_addr: Option<String>,
    headers: Vec<(String, String)>,
    body: String,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("User-Agent")
    }

    /// CORS preflight. Never guarded.
    pub fn is_preflight(&self) -> bool {
        self.method.eq_ignore_ascii_case("OPTIONS")
    }

    /// First usable proxy header value, else the peer address.
    pub fn client_ip(&self) -> String {
        for name in CLIENT_IP_HEADERS {
            let Some(value) = self.header(name) else {
                continue;
            };
            let first = value.split(',').next().unwrap_or_default().trim();
            if !first.is_empty() && !first.eq_ignore_ascii_case(UNKNOWN_IP) {
                return first.to_string();
            }
        }
        self.remote_addr
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(UNKNOWN_IP)
            .to_string()
    }
}
