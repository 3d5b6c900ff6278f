use std::fmt;

/// Line terminator used on the wire and inside captured bodies.
pub const CRLF: &str = "\r\n";

/// Envelope and identity data accumulated over one SMTP session.
///
/// A session counts as started once `greeting` is set by HELO/EHLO. Only the
/// envelope part (`return_path`, `recipients`, `headers`, `body`) is cleared
/// by [`SessionState::reset`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub greeting: String,
    pub server_name: String,
    pub client_name: String,
    pub return_path: String,
    pub recipients: Vec<String>,
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl SessionState {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Default::default()
        }
    }

    pub fn has_started(&self) -> bool {
        !self.greeting.is_empty()
    }

    /// Drop the envelope, keep the greeting and both identities.
    pub fn reset(&mut self) {
        self.return_path.clear();
        self.recipients.clear();
        self.headers.clear();
        self.body.clear();
    }

    /// Store a dot-terminated DATA block.
    ///
    /// Lines up to the first blank one are headers. The blank separator
    /// itself is dropped and every later line, blank or not, goes to the
    /// body with a CRLF appended.
    pub fn set_data<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut headers = Vec::new();
        let mut body = Vec::new();
        let mut in_body = false;

        for line in lines {
            let line = line.as_ref();
            if in_body {
                body.extend_from_slice(line.as_bytes());
                body.extend_from_slice(CRLF.as_bytes());
            } else if line.trim().is_empty() {
                in_body = true;
            } else {
                headers.push(line.to_string());
            }
        }

        self.headers = headers;
        self.body = body;
    }

    /// Render the envelope as `MAIL`/`RCPT`/`DATA` lines followed by the
    /// headers, a blank line and the body bytes as received.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for line in std::iter::once(format!("MAIL FROM: <{}>", self.return_path))
            .chain(self.recipients.iter().map(|r| format!("RCPT TO: <{}>", r)))
            .chain(std::iter::once("DATA".to_string()))
            .chain(self.headers.iter().cloned())
            .chain(std::iter::once(String::new()))
        {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(CRLF.as_bytes());
        }

        out.extend_from_slice(&self.body);
        out
    }
}

/// Text form of [`SessionState::render`]. Body bytes that are not valid
/// UTF-8 show up as U+FFFD; use `render` when the exact bytes matter.
impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.render()))
    }
}
