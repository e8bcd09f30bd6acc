//! ASCII line protocol between workers and the server.
//!
//! Requests: `{kernel_type}|{request_id}|{source_tag}[|{unique_id}]\n`
//! Responses: `{request_id}|{1 or 0}|{reason}\n`
//!
//! Fields must not contain `|`. Records are bounded by the ring slot size;
//! anything longer is truncated at the sender.

use crate::error::{KschedError, KschedResult};

/// A parsed admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kernel_type: String,
    pub request_id: String,
    pub source_tag: String,
    pub unique_id: Option<String>,
}

impl Request {
    /// Parse one request line. Trailing `\n`/`\r` are stripped first.
    ///
    /// Fewer than three fields is a malformed request — the caller logs and
    /// drops it without responding.
    pub fn parse(line: &str) -> KschedResult<Self> {
        let line = trim_line_end(line);
        let mut parts = line.split('|');
        let kernel_type = parts.next().unwrap_or("");
        let request_id = parts.next();
        let source_tag = parts.next();
        let (request_id, source_tag) = match (request_id, source_tag) {
            (Some(id), Some(src)) => (id, src),
            _ => return Err(KschedError::MalformedRequest(line.to_string())),
        };
        let unique_id = parts.next().map(str::to_string);
        Ok(Self {
            kernel_type: kernel_type.to_string(),
            request_id: request_id.to_string(),
            source_tag: source_tag.to_string(),
            unique_id,
        })
    }

    /// Render the newline-terminated wire form.
    pub fn format(&self) -> String {
        match &self.unique_id {
            Some(uid) => format!(
                "{}|{}|{}|{}\n",
                self.kernel_type, self.request_id, self.source_tag, uid
            ),
            None => format!("{}|{}|{}\n", self.kernel_type, self.request_id, self.source_tag),
        }
    }
}

/// A parsed admission verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: String,
    pub allowed: bool,
    pub reason: String,
}

impl Response {
    /// Render the newline-terminated wire form. The request id is echoed
    /// verbatim from the client.
    pub fn format(&self) -> String {
        format!(
            "{}|{}|{}\n",
            self.request_id,
            if self.allowed { '1' } else { '0' },
            self.reason
        )
    }

    /// Parse one response line (worker side).
    pub fn parse(line: &str) -> KschedResult<Self> {
        let line = trim_line_end(line);
        let mut parts = line.split('|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(verdict), Some(reason)) if verdict == "0" || verdict == "1" => {
                Ok(Self {
                    request_id: id.to_string(),
                    allowed: verdict == "1",
                    reason: reason.to_string(),
                })
            }
            _ => Err(KschedError::MalformedRequest(line.to_string())),
        }
    }
}

/// Strip trailing `\n` and `\r` bytes.
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}
