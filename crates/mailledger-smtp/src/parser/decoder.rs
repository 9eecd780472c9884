//! Streaming SMTP reply decoder.
//!
//! Unlike [`parse_reply`](super::parse_reply), which expects the caller to
//! have already split a complete reply into lines, [`SmtpDecoder`] owns an
//! append-only byte buffer and extracts replies as CRLF-terminated lines
//! arrive, tolerating a CR and LF split across separate appends.

use bytes::BytesMut;

use crate::types::{Reply, ReplyCode};

/// A parsed enhanced mail system status code (RFC 3463), e.g. `2.1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Status class: 2 (success), 4 (transient failure), or 5 (permanent failure).
    pub class: u8,
    /// Subject subcode.
    pub subject: u16,
    /// Detail subcode.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses a single whitespace-delimited token as an enhanced status code.
    ///
    /// Returns `None` if the token isn't in `class.subject.detail` form or
    /// the class isn't one of `2`, `4`, `5`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let mut parts = token.split('.');
        let class: u8 = parts.next()?.parse().ok()?;
        let subject: u16 = parts.next()?.parse().ok()?;
        let detail: u16 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        if !matches!(class, 2 | 4 | 5) {
            return None;
        }
        Some(Self {
            class,
            subject,
            detail,
        })
    }

    /// Extracts the enhanced status code from a reply's first message line,
    /// if its first whitespace-delimited token parses as one.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Option<Self> {
        let first_line = reply.message.first()?;
        let token = first_line.split_whitespace().next()?;
        Self::parse(token)
    }
}

struct PendingReply {
    code: ReplyCode,
    lines: Vec<String>,
}

/// Accumulates SMTP reply bytes across reads and emits complete replies.
///
/// Feed it bytes as they arrive with [`push`](Self::push), then drain
/// whatever complete replies are now available with [`decode`](Self::decode).
/// Malformed lines are discarded silently along with any in-progress
/// multi-line assembly; the decoder recovers on the next well-formed line.
#[derive(Default)]
pub struct SmtpDecoder {
    buffer: BytesMut,
    pending: Option<PendingReply>,
}

impl SmtpDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly-received bytes to the internal buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drains and returns every reply that is now complete.
    pub fn decode(&mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        while let Some(line) = self.take_line() {
            let Some((code, sep, rest)) = Self::parse_line(&line) else {
                self.pending = None;
                continue;
            };

            match sep {
                b'-' => match &mut self.pending {
                    Some(pending) if pending.code == code => pending.lines.push(rest),
                    _ => {
                        self.pending = Some(PendingReply {
                            code,
                            lines: vec![rest],
                        });
                    }
                },
                b' ' => {
                    let mut lines = match self.pending.take() {
                        Some(pending) if pending.code == code => pending.lines,
                        _ => Vec::new(),
                    };
                    lines.push(rest);
                    replies.push(Reply::new(code, lines));
                }
                _ => unreachable!("parse_line only returns '-' or ' '"),
            }
        }
        replies
    }

    /// Removes and returns the next CRLF-terminated line from the buffer,
    /// or `None` if no complete line is buffered yet.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.windows(2).position(|w| w == b"\r\n")?;
        let line = self.buffer.split_to(pos);
        let _ = self.buffer.split_to(2);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Parses a line as `DDD SEP rest`. Returns `None` if malformed.
    fn parse_line(line: &str) -> Option<(ReplyCode, u8, String)> {
        if line.len() < 4 {
            return None;
        }
        let code_str = &line[0..3];
        if !code_str.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let code = code_str.parse::<u16>().ok()?;
        let sep = line.as_bytes()[3];
        if sep != b'-' && sep != b' ' {
            return None;
        }
        Some((ReplyCode::new(code), sep, line[4..].to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_line_reply() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250 OK\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ReplyCode::new(250));
        assert_eq!(replies[0].message, vec!["OK".to_string()]);
    }

    #[test]
    fn decodes_multi_line_reply() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250-First\r\n250-Second\r\n250 Last\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].message,
            vec!["First".to_string(), "Second".to_string(), "Last".to_string()]
        );
    }

    #[test]
    fn tolerates_crlf_split_across_pushes() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250 O");
        assert!(decoder.decode().is_empty());
        decoder.push(b"K\r");
        assert!(decoder.decode().is_empty());
        decoder.push(b"\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message, vec!["OK".to_string()]);
    }

    #[test]
    fn tolerates_lone_cr_at_buffer_end_without_premature_split() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250 OK\r");
        assert!(decoder.decode().is_empty());
        decoder.push(b"\n250 Again\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].message, vec!["OK".to_string()]);
        assert_eq!(replies[1].message, vec!["Again".to_string()]);
    }

    #[test]
    fn differing_code_in_continuation_restarts_pending() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250-First\r\n451-Second\r\n451 Third\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ReplyCode::new(451));
        assert_eq!(
            replies[0].message,
            vec!["Second".to_string(), "Third".to_string()]
        );
    }

    #[test]
    fn differing_code_on_final_line_drops_pending_partial() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250-First\r\n550 Different\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ReplyCode::new(550));
        assert_eq!(replies[0].message, vec!["Different".to_string()]);
    }

    #[test]
    fn malformed_line_is_skipped_and_recovers() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"not a reply\r\n250 OK\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ReplyCode::new(250));
    }

    #[test]
    fn malformed_line_discards_pending_multiline_assembly() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250-First\r\nXX\r\n250 OK\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message, vec!["OK".to_string()]);
    }

    #[test]
    fn empty_continuation_line_is_preserved() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250-\r\n250 Done\r\n");
        let replies = decoder.decode();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].message,
            vec![String::new(), "Done".to_string()]
        );
    }

    #[test]
    fn extracts_enhanced_status_code() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250 2.1.0 Sender OK\r\n");
        let replies = decoder.decode();
        let enhanced = EnhancedStatusCode::from_reply(&replies[0]).unwrap();
        assert_eq!(enhanced.class, 2);
        assert_eq!(enhanced.subject, 1);
        assert_eq!(enhanced.detail, 0);
    }

    #[test]
    fn missing_enhanced_status_code_is_none() {
        let mut decoder = SmtpDecoder::new();
        decoder.push(b"250 OK\r\n");
        let replies = decoder.decode();
        assert!(EnhancedStatusCode::from_reply(&replies[0]).is_none());
    }
}
