//! Secret redaction for logged/traced IMAP traffic.
//!
//! [`Redactor`] scans outbound bytes as they are written to the wire and
//! reports which byte ranges must never reach logs: LOGIN passwords and
//! AUTHENTICATE initial responses / SASL continuation payloads. A single
//! logical command may be written in one `write()` call or split across
//! many (pipelining, small TCP writes, `LITERAL+` legs); the redactor is
//! driven incrementally so the reported spans are identical either way.

/// A byte range within the buffer passed to [`Redactor::feed`] that must be
/// treated as secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretSpan {
    /// Offset into the fed buffer where the secret range starts.
    pub start: usize,
    /// Number of secret bytes.
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Word {
    /// Not yet inside a value; looking for the next non-space byte.
    Before,
    /// Inside a quoted astring; `escaped` tracks a pending backslash.
    Quoted { escaped: bool },
    /// Inside a bare (unquoted) astring; ends at the next space or CRLF.
    Bare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Not scanning anything secret.
    Idle,
    /// Skipping the LOGIN username argument (index 0) before the password (index 1).
    LoginArg { index: u8, word: Word },
    /// Skipping the AUTHENTICATE mechanism name before an optional initial response.
    AuthMech { word: Word },
    /// The remainder of the current line is a secret SASL initial response.
    AuthInitialResponse,
    /// The remainder of the current line is a secret SASL continuation payload.
    AuthContinuation,
}

/// Tracks which bytes of outbound IMAP traffic are secret, across arbitrary
/// write-boundary splits.
#[derive(Debug, Clone)]
pub struct Redactor {
    state: State,
}

impl Default for Redactor {
    fn default() -> Self {
        Self { state: State::Idle }
    }
}

impl Redactor {
    /// Creates a redactor in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Call before writing a serialized `LOGIN <user> <pass>` command (after
    /// the tag and verb, i.e. positioned right before the username astring).
    pub fn begin_login(&mut self) {
        self.state = State::LoginArg {
            index: 0,
            word: Word::Before,
        };
    }

    /// Call before writing a serialized `AUTHENTICATE <mechanism> [initial]`
    /// command (positioned right before the mechanism name).
    pub fn begin_authenticate(&mut self) {
        self.state = State::AuthMech { word: Word::Before };
    }

    /// Call before writing a SASL continuation line in response to a `+`
    /// continuation request during an AUTHENTICATE exchange. The entire line
    /// up to CRLF is secret.
    pub fn begin_continuation(&mut self) {
        self.state = State::AuthContinuation;
    }

    /// Returns the redactor to the idle state, e.g. after a command fails to
    /// serialize or is abandoned before being written.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Feeds the next chunk of outbound bytes and returns the secret byte
    /// ranges within `buf`, merging adjacent secret bytes into spans.
    ///
    /// Idempotent to how `buf` is chunked: feeding `b"ab"` then `b"cd"`
    /// reports the same absolute secret positions as feeding `b"abcd"` once.
    pub fn feed(&mut self, buf: &[u8]) -> Vec<SecretSpan> {
        let mut spans = Vec::new();
        let mut secret_start: Option<usize> = None;

        for (i, &byte) in buf.iter().enumerate() {
            let is_secret = self.step(byte);

            match (is_secret, secret_start) {
                (true, None) => secret_start = Some(i),
                (false, Some(start)) => {
                    spans.push(SecretSpan {
                        start,
                        length: i - start,
                    });
                    secret_start = None;
                }
                _ => {}
            }
        }

        if let Some(start) = secret_start {
            spans.push(SecretSpan {
                start,
                length: buf.len() - start,
            });
        }

        spans
    }

    /// Advances the state machine by one byte and returns whether that byte
    /// is secret.
    fn step(&mut self, byte: u8) -> bool {
        match self.state {
            State::Idle => false,

            State::LoginArg { index, word } => match word {
                Word::Before => {
                    if byte == b' ' {
                        false
                    } else if byte == b'"' {
                        self.state = State::LoginArg {
                            index,
                            word: Word::Quoted { escaped: false },
                        };
                        false
                    } else {
                        self.state = State::LoginArg {
                            index,
                            word: Word::Bare,
                        };
                        index == 1
                    }
                }
                Word::Bare => {
                    if byte == b' ' || byte == b'\r' {
                        self.advance_login_arg(index, byte);
                        false
                    } else {
                        index == 1
                    }
                }
                Word::Quoted { escaped } => {
                    if escaped {
                        self.state = State::LoginArg {
                            index,
                            word: Word::Quoted { escaped: false },
                        };
                        index == 1
                    } else if byte == b'\\' {
                        self.state = State::LoginArg {
                            index,
                            word: Word::Quoted { escaped: true },
                        };
                        index == 1
                    } else if byte == b'"' {
                        self.advance_login_arg(index, byte);
                        false
                    } else {
                        index == 1
                    }
                }
            },

            State::AuthMech { word } => match word {
                Word::Before => {
                    if byte == b' ' {
                        false
                    } else {
                        self.state = State::AuthMech { word: Word::Bare };
                        false
                    }
                }
                Word::Bare => {
                    if byte == b' ' {
                        self.state = State::AuthInitialResponse;
                        false
                    } else if byte == b'\r' {
                        self.state = State::Idle;
                        false
                    } else {
                        false
                    }
                }
                Word::Quoted { .. } => false,
            },

            State::AuthInitialResponse => {
                if byte == b'\r' {
                    self.state = State::Idle;
                    false
                } else {
                    true
                }
            }

            State::AuthContinuation => {
                if byte == b'\r' {
                    self.state = State::Idle;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Returns `buf` with every byte inside `spans` replaced by `*`, for
    /// tracing output that must never contain the real secret bytes.
    #[must_use]
    pub fn mask(buf: &[u8], spans: &[SecretSpan]) -> Vec<u8> {
        let mut out = buf.to_vec();
        for span in spans {
            for b in &mut out[span.start..span.start + span.length] {
                *b = b'*';
            }
        }
        out
    }

    /// Transitions out of a finished LOGIN argument word on the given
    /// terminator byte (space, closing quote, or CRLF).
    fn advance_login_arg(&mut self, index: u8, terminator: u8) {
        if index == 1 || terminator == b'\r' {
            self.state = State::Idle;
            return;
        }

        self.state = State::LoginArg {
            index: index + 1,
            word: Word::Before,
        };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret_bytes(buf: &[u8], spans: &[SecretSpan]) -> Vec<u8> {
        let mut mask = vec![false; buf.len()];
        for span in spans {
            for b in &mut mask[span.start..span.start + span.length] {
                *b = true;
            }
        }
        buf.iter()
            .zip(mask)
            .filter_map(|(&b, secret)| secret.then_some(b))
            .collect()
    }

    #[test]
    fn login_redacts_only_the_password() {
        let line = b"A0001 LOGIN user@example.com \"pass word\"\r\n";
        let mut redactor = Redactor::new();
        redactor.begin_login();
        // Skip tag+verb; begin_login positions right before the username.
        let body = &line[b"A0001 LOGIN ".len()..];
        let spans = redactor.feed(body);
        assert_eq!(secret_bytes(body, &spans), b"pass word");
    }

    #[test]
    fn login_password_survives_arbitrary_chunking() {
        let line = b"user \"pass word\"\r\n".to_vec();
        let whole = {
            let mut r = Redactor::new();
            r.begin_login();
            secret_bytes(&line, &r.feed(&line))
        };

        for split in 0..=line.len() {
            let mut r = Redactor::new();
            r.begin_login();
            let spans_a = r.feed(&line[..split]);
            let spans_b = r.feed(&line[split..]);
            let mut secret = secret_bytes(&line[..split], &spans_a);
            secret.extend(secret_bytes(&line[split..], &spans_b));
            assert_eq!(secret, whole, "mismatch splitting at {split}");
        }
    }

    #[test]
    fn authenticate_initial_response_is_secret() {
        let line = b"XOAUTH2 dXNlcj1hQGIuY29tAWF1dGg9QmVhcmVyIHQBAQ==\r\n";
        let mut redactor = Redactor::new();
        redactor.begin_authenticate();
        let spans = redactor.feed(line);
        assert_eq!(
            secret_bytes(line, &spans),
            b"dXNlcj1hQGIuY29tAWF1dGg9QmVhcmVyIHQBAQ=="
        );
    }

    #[test]
    fn authenticate_without_initial_response_redacts_nothing() {
        let line = b"CRAM-MD5\r\n";
        let mut redactor = Redactor::new();
        redactor.begin_authenticate();
        let spans = redactor.feed(line);
        assert!(spans.is_empty());
    }

    #[test]
    fn continuation_line_is_fully_secret() {
        let line = b"dXNlcgBzZWNyZXQ=\r\n";
        let mut redactor = Redactor::new();
        redactor.begin_continuation();
        let spans = redactor.feed(line);
        assert_eq!(secret_bytes(line, &spans), b"dXNlcgBzZWNyZXQ=");
    }

    #[test]
    fn mask_replaces_only_secret_bytes() {
        let line = b"user \"pass word\"\r\n".to_vec();
        let mut redactor = Redactor::new();
        redactor.begin_login();
        let spans = redactor.feed(&line);
        let masked = Redactor::mask(&line, &spans);
        assert_eq!(masked, b"user \"*********\"\r\n");
    }

    #[test]
    fn idle_redacts_nothing() {
        let mut redactor = Redactor::new();
        let spans = redactor.feed(b"A0002 NOOP\r\n");
        assert!(spans.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn login_redaction_is_split_invariant(
            user in "[a-zA-Z0-9]{1,12}",
            pass in "[a-zA-Z0-9]{1,12}",
            split in 0usize..40,
        ) {
            let line = format!("{user} {pass}\r\n").into_bytes();
            let split = split.min(line.len());

            let whole = {
                let mut r = Redactor::new();
                r.begin_login();
                secret_bytes(&line, &r.feed(&line))
            };

            let mut r = Redactor::new();
            r.begin_login();
            let spans_a = r.feed(&line[..split]);
            let spans_b = r.feed(&line[split..]);
            let mut secret = secret_bytes(&line[..split], &spans_a);
            secret.extend(secret_bytes(&line[split..], &spans_b));

            prop_assert_eq!(secret, whole);
            prop_assert_eq!(whole, pass.into_bytes());
        }
    }
}
