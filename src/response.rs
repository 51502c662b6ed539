//! Response accumulation and the final response type.

use std::collections::HashMap;

/// Accumulates one attempt's response as the transfer engine delivers it.
///
/// A fresh builder is installed at the start of every attempt, so a retried
/// request silently discards whatever a previous attempt had received. The
/// engine may also deliver several intermediate messages within one attempt
/// (redirects, `100 Continue`); each new status line resets the accumulated
/// state so only the last message survives.
#[derive(Debug, Default)]
pub(crate) struct ResponseBuilder {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Begin a new message with the given status, discarding any headers and
    /// body accumulated for a previous intermediate message.
    pub(crate) fn start_message(&mut self, status: u16) {
        self.status = status;
        self.headers.clear();
        self.body.clear();
    }

    /// Store a header, replacing any previous value for the same key.
    pub(crate) fn insert_header(&mut self, name: String, value: String) {
        self.headers.insert(name, value);
    }

    /// Append a chunk of the response body.
    pub(crate) fn append_body(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Seal the builder into a response.
    ///
    /// The engine's own response-code accessor is authoritative once the
    /// transfer completed; the parsed status line is only a fallback.
    pub(crate) fn finish(self, status: Option<u16>, effective_url: Option<String>) -> Response {
        Response {
            status: status.unwrap_or(self.status),
            headers: self.headers,
            body: self.body,
            effective_url,
        }
    }
}

/// An HTTP response: status code, headers, and the complete body.
///
/// Header names are stored as the server sent them. Duplicate headers are
/// not merged; the last occurrence wins. Lookup via [`header`](Self::header)
/// is case-insensitive.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    effective_url: Option<String>,
}

impl Response {
    /// The response status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Look up a header value by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All response headers, keyed as received.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the response, returning the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// The response body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The URL the transfer ended up at after any redirects.
    pub fn effective_url(&self) -> Option<&str> {
        self.effective_url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_headers_keep_the_last_value() {
        let mut builder = ResponseBuilder::new();
        builder.insert_header("Set-Cookie".into(), "a=1".into());
        builder.insert_header("Set-Cookie".into(), "b=2".into());

        let response = builder.finish(Some(200), None);

        assert_eq!(response.header("set-cookie"), Some("b=2"));
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn header_lookup_ignores_case_but_keys_are_preserved() {
        let mut builder = ResponseBuilder::new();
        builder.insert_header("X-Server".into(), "recurl".into());

        let response = builder.finish(Some(200), None);

        assert_eq!(response.header("x-server"), Some("recurl"));
        assert_eq!(response.header("X-SERVER"), Some("recurl"));
        assert!(response.headers().contains_key("X-Server"));
    }

    #[test]
    fn new_status_line_discards_intermediate_state() {
        let mut builder = ResponseBuilder::new();
        builder.start_message(302);
        builder.insert_header("Location".into(), "/next".into());
        builder.append_body(b"moved");

        builder.start_message(200);
        builder.insert_header("Content-Type".into(), "text/plain".into());
        builder.append_body(b"hello");

        let response = builder.finish(Some(200), None);

        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Location"), None);
        assert_eq!(response.body(), b"hello");
    }

    #[test]
    fn engine_status_takes_precedence_over_parsed_status() {
        let mut builder = ResponseBuilder::new();
        builder.start_message(200);

        assert_eq!(builder.finish(Some(204), None).status(), 204);
    }

    #[test]
    fn parsed_status_is_the_fallback() {
        let mut builder = ResponseBuilder::new();
        builder.start_message(200);

        assert_eq!(builder.finish(None, None).status(), 200);
    }
}
