//! Transport-agnostic view of an HTTP request or response.
//!
//! The canonicalizer and verifier work over this type instead of any
//! particular HTTP library's request object, so callers integrate by mapping
//! their framework's types into it. Header names are case-insensitive; the
//! multimap preserves insertion order, which RFC 9421 requires for joining
//! repeated fields.

use crate::error::SageError;

/// A request or response with the components a signature may cover.
#[derive(Debug, Clone, Default)]
pub struct SignableMessage {
    method: String,
    scheme: String,
    authority: String,
    path: String,
    query: Option<String>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl SignableMessage {
    /// Build a request from a method and an absolute target URI.
    ///
    /// Only absolute `http`/`https` URIs are accepted; everything else is
    /// `invalid-argument`.
    pub fn request(method: &str, target_uri: &str) -> Result<Self, SageError> {
        let (scheme, rest) = target_uri.split_once("://").ok_or_else(|| {
            SageError::InvalidArgument(format!("target URI must be absolute: {target_uri:?}"))
        })?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(SageError::InvalidArgument(format!(
                "unsupported URI scheme {scheme:?}"
            )));
        }
        let (authority, path_and_query) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(SageError::InvalidArgument("URI has empty authority".into()));
        }
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
            None => (path_and_query.to_owned(), None),
        };
        Ok(Self {
            method: method.to_ascii_uppercase(),
            scheme,
            authority: authority.to_ascii_lowercase(),
            path,
            query,
            status: None,
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    /// Build a response carrying only a status code and headers.
    pub fn response(status: u16) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn is_response(&self) -> bool {
        self.status.is_some()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// URL authority, lowercased. The `Host` header wins when present.
    pub fn authority(&self) -> Option<String> {
        if let Some(host) = self.header_joined("host") {
            return Some(host.to_ascii_lowercase());
        }
        if self.authority.is_empty() {
            None
        } else {
            Some(self.authority.clone())
        }
    }

    /// URL path; an empty path canonicalizes to `/`.
    pub fn path(&self) -> &str {
        if self.path.is_empty() {
            "/"
        } else {
            &self.path
        }
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Absolute request URI.
    pub fn target_uri(&self) -> Option<String> {
        let authority = self.authority()?;
        if self.scheme.is_empty() {
            return None;
        }
        let mut uri = format!("{}://{}{}", self.scheme, authority, self.path());
        if let Some(q) = &self.query {
            if !q.is_empty() {
                uri.push('?');
                uri.push_str(q);
            }
        }
        Some(uri)
    }

    /// First decoded value of the named query parameter, case-sensitive.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if percent_decode(k).as_deref() == Some(name) {
                return percent_decode(v);
            }
        }
        None
    }

    /// Append a header instance, preserving order.
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Replace all instances of a header with a single value.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// All values for a header name, in insertion order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Canonical header value: instances trimmed of ASCII whitespace and
    /// joined with `", "`. `None` when the header is absent.
    pub fn header_joined(&self, name: &str) -> Option<String> {
        let values = self.header_values(name);
        if values.is_empty() {
            return None;
        }
        Some(
            values
                .iter()
                .map(|v| v.trim_matches(|c| c == ' ' || c == '\t'))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }
}

fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1)?;
                let lo = bytes.get(i + 2)?;
                let hex = [(*hi), (*lo)];
                let hex = std::str::from_utf8(&hex).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_uri() {
        let req =
            SignableMessage::request("get", "https://Sage.Dev/resource/123?user=alice").unwrap();
        assert_eq!(req.method(), "GET");
        assert_eq!(req.scheme(), "https");
        assert_eq!(req.authority().as_deref(), Some("sage.dev"));
        assert_eq!(req.path(), "/resource/123");
        assert_eq!(req.query(), Some("user=alice"));
        assert_eq!(
            req.target_uri().as_deref(),
            Some("https://sage.dev/resource/123?user=alice")
        );
    }

    #[test]
    fn empty_path_is_slash() {
        let req = SignableMessage::request("GET", "https://sage.dev").unwrap();
        assert_eq!(req.path(), "/");
        assert_eq!(req.target_uri().as_deref(), Some("https://sage.dev/"));
    }

    #[test]
    fn host_header_overrides_uri_authority() {
        let mut req = SignableMessage::request("GET", "https://internal:8443/x").unwrap();
        req.set_header("Host", "Edge.Example");
        assert_eq!(req.authority().as_deref(), Some("edge.example"));
    }

    #[test]
    fn repeated_headers_join_trimmed() {
        let mut req = SignableMessage::request("GET", "https://sage.dev/").unwrap();
        req.append_header("X-Tag", "  one ").append_header("x-tag", "two\t");
        assert_eq!(req.header_joined("X-TAG").as_deref(), Some("one, two"));
    }

    #[test]
    fn query_param_decoding() {
        let req = SignableMessage::request(
            "GET",
            "https://sage.dev/s?user=a%20b&User=upper&empty=&x=1",
        )
        .unwrap();
        assert_eq!(req.query_param("user").as_deref(), Some("a b"));
        // Case-sensitive parameter names.
        assert_eq!(req.query_param("User").as_deref(), Some("upper"));
        assert_eq!(req.query_param("empty").as_deref(), Some(""));
        assert_eq!(req.query_param("absent"), None);
    }

    #[test]
    fn rejects_relative_and_odd_schemes() {
        assert!(SignableMessage::request("GET", "/relative").is_err());
        assert!(SignableMessage::request("GET", "ftp://x/").is_err());
        assert!(SignableMessage::request("GET", "https:///nohost").is_err());
    }
}
