//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Mailbox, Reply, ReplyCode};
use base64::Engine;
use std::collections::HashSet;
use std::marker::PhantomData;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// Type-state marker for an in-progress BDAT chunked transfer (RFC 3030).
#[derive(Debug)]
pub struct Chunking;

/// Result of sending one BDAT chunk: either more chunks are expected, or
/// the `LAST` chunk completed the transaction.
#[derive(Debug)]
pub enum BdatOutcome {
    /// The transfer continues; more chunks may follow.
    More(Client<Chunking>),
    /// `LAST` was sent and the server accepted the complete message.
    Done(Client<Connected>),
}

/// Parses a VRFY/EXPN reply line as `<name> <addr>` or a bare `<addr>`,
/// preserving the display name when one is present.
fn parse_mailbox_line(line: &str) -> Option<Mailbox> {
    let line = line.trim();
    if let Some(rest) = line.strip_suffix('>')
        && let Some((name, addr)) = rest.rsplit_once('<')
    {
        let name = name.trim();
        return if name.is_empty() {
            Mailbox::new(addr).ok()
        } else {
            Mailbox::with_name(name, addr).ok()
        };
    }

    if let Some((name, addr)) = line.rsplit_once(' ')
        && let Ok(mailbox) = Mailbox::with_name(name.trim(), addr)
    {
        return Some(mailbox);
    }

    Mailbox::new(line).ok()
}

/// Writes `message` with CRLF normalization and leading-dot byte-stuffing,
/// followed by the `.\r\n` terminator.
async fn write_dot_stuffed(stream: &mut SmtpStream, message: &[u8]) -> Result<()> {
    for line in message.split(|&b| b == b'\n') {
        let line = if !line.is_empty() && line[line.len() - 1] == b'\r' {
            &line[..line.len() - 1]
        } else {
            line
        };

        if !line.is_empty() && line[0] == b'.' {
            stream.write_all(b".").await?;
        }

        stream.write_all(line).await?;
        stream.write_all(b"\r\n").await?;
    }

    stream.write_all(b".\r\n").await
}

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = Self::read_reply(&mut stream).await?;
        if !greeting.is_success() {
            return Err(Error::smtp_error(
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }

        // Extract hostname from greeting (first word after code)
        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            _state: PhantomData,
        })
    }

    /// Sends HELO (no extension discovery; prefer [`ehlo`](Self::ehlo) when
    /// the server is known to support ESMTP).
    ///
    /// # Errors
    ///
    /// Returns an error if the HELO command fails.
    pub async fn helo(mut self, client_hostname: &str) -> Result<Self> {
        let cmd = Command::Helo {
            hostname: client_hostname.to_string(),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(self)
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let cmd = Command::Ehlo {
            hostname: client_hostname.to_string(),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        // Parse extensions from EHLO response (skip first line which is greeting)
        let mut extensions = HashSet::new();
        for line in reply.message.iter().skip(1) {
            extensions.insert(Extension::parse(line));
        }

        self.server_info.extensions = extensions;
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let cmd = Command::StartTls;
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        // Upgrade stream to TLS
        self.stream = self.stream.upgrade_to_tls(hostname).await?;

        // Send EHLO again after STARTTLS
        let cmd = Command::Ehlo {
            hostname: hostname.to_string(),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        // Re-parse extensions
        let mut extensions = HashSet::new();
        for line in reply.message.iter().skip(1) {
            extensions.insert(Extension::parse(line));
        }
        self.server_info.extensions = extensions;

        Ok(self)
    }

    /// Authenticates using PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        // Build PLAIN response: \0username\0password
        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());

        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(encoded),
        };

        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(mut self, from: Address) -> Result<Client<MailTransaction>> {
        let cmd = Command::MailFrom {
            from,
            body: None,
            size: None,
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }

    /// Runs an entire mail transaction (MAIL FROM, RCPT TO, DATA, message)
    /// in one pipelined round trip under PIPELINING (RFC 2920).
    ///
    /// # Errors
    ///
    /// Returns an error if PIPELINING is not supported, any recipient is
    /// rejected, or the server rejects the message.
    pub async fn send_mail_pipelined(
        mut self,
        from: Address,
        to: Vec<Address>,
        message: &[u8],
    ) -> Result<Client<Connected>> {
        Self::pipelined_send(&mut self.stream, &self.server_info, from, &to, message).await?;

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(mut self, from: Address) -> Result<Client<MailTransaction>> {
        let cmd = Command::MailFrom {
            from,
            body: None,
            size: None,
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }

    /// Runs an entire mail transaction (MAIL FROM, RCPT TO, DATA, message)
    /// in one pipelined round trip under PIPELINING (RFC 2920).
    ///
    /// # Errors
    ///
    /// Returns an error if PIPELINING is not supported, any recipient is
    /// rejected, or the server rejects the message.
    pub async fn send_mail_pipelined(
        mut self,
        from: Address,
        to: Vec<Address>,
        message: &[u8],
    ) -> Result<Client<Connected>> {
        Self::pipelined_send(&mut self.stream, &self.server_info, from, &to, message).await?;

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }
}

impl Client<MailTransaction> {
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        let cmd = Command::RcptTo { to };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }

    /// Resets the transaction and returns to authenticated/connected state.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        let cmd = Command::Rset;
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        let cmd = Command::RcptTo { to };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let cmd = Command::Data;
        let reply = self.send_command(cmd).await?;

        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }

    /// Resets the transaction and returns to connected state.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        let cmd = Command::Rset;
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }

    /// Sends the first BDAT chunk (RFC 3030) in place of DATA.
    ///
    /// Writes `BDAT <n> [LAST]` as one write, then the exact `chunk.len()`
    /// payload bytes as a second write, then reads one reply. Dot-stuffing
    /// is not applied; BDAT transfers raw octets.
    ///
    /// # Errors
    ///
    /// Returns an error if CHUNKING is not supported or the server
    /// rejects the chunk.
    pub async fn bdat(mut self, chunk: &[u8], last: bool) -> Result<BdatOutcome> {
        if !self.server_info.supports_chunking() {
            return Err(Error::NotSupported("CHUNKING".into()));
        }

        let cmd = Command::Bdat {
            size: chunk.len(),
            last,
        };
        self.stream.write_all(&cmd.serialize()).await?;
        self.stream.write_all(chunk).await?;
        let reply = Self::read_reply(&mut self.stream).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        if last {
            Ok(BdatOutcome::Done(Client {
                stream: self.stream,
                server_info: self.server_info,
                _state: PhantomData,
            }))
        } else {
            Ok(BdatOutcome::More(Client {
                stream: self.stream,
                server_info: self.server_info,
                _state: PhantomData,
            }))
        }
    }
}

impl Client<Chunking> {
    /// Sends a subsequent BDAT chunk, continuing a transfer started with
    /// [`Client::<RecipientAdded>::bdat`].
    ///
    /// # Errors
    ///
    /// Returns an error if CHUNKING is not supported or the server
    /// rejects the chunk.
    pub async fn bdat(mut self, chunk: &[u8], last: bool) -> Result<BdatOutcome> {
        if !self.server_info.supports_chunking() {
            return Err(Error::NotSupported("CHUNKING".into()));
        }

        let cmd = Command::Bdat {
            size: chunk.len(),
            last,
        };
        self.stream.write_all(&cmd.serialize()).await?;
        self.stream.write_all(chunk).await?;
        let reply = Self::read_reply(&mut self.stream).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        if last {
            Ok(BdatOutcome::Done(Client {
                stream: self.stream,
                server_info: self.server_info,
                _state: PhantomData,
            }))
        } else {
            Ok(BdatOutcome::More(Client {
                stream: self.stream,
                server_info: self.server_info,
                _state: PhantomData,
            }))
        }
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Message should be RFC 5322 formatted. Line endings will be normalized to CRLF.
    /// The terminating "." line will be added automatically.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        write_dot_stuffed(&mut self.stream, message).await?;

        // Read server response
        let reply = Self::read_reply(&mut self.stream).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        })
    }
}

// Common implementation for all states
impl<S> Client<S> {
    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        let data = cmd.serialize();
        self.stream.write_all(&data).await?;
        Self::read_reply(&mut self.stream).await
    }

    async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = stream.read_line().await?;
            if line.is_empty() {
                continue;
            }

            let is_last = is_last_reply_line(&line);
            lines.push(line);

            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }

    /// Writes MAIL FROM, every RCPT TO, and DATA back-to-back under
    /// PIPELINING (RFC 2920) without interleaved reads, then drains the
    /// N+1 replies (MAIL FROM plus each RCPT TO) and the DATA reply before
    /// sending the message payload.
    ///
    /// A 5xx on MAIL FROM aborts without sending the payload; the queued
    /// RCPT TO and DATA replies are still read first so the reply stream
    /// stays aligned for whatever command follows.
    async fn pipelined_send(
        stream: &mut SmtpStream,
        server_info: &ServerInfo,
        from: Address,
        to: &[Address],
        message: &[u8],
    ) -> Result<Reply> {
        if !server_info.supports_pipelining() {
            return Err(Error::NotSupported("PIPELINING".into()));
        }

        let mut commands = Command::MailFrom {
            from,
            body: None,
            size: None,
        }
        .serialize();
        for addr in to {
            commands.extend_from_slice(&Command::RcptTo { to: addr.clone() }.serialize());
        }
        commands.extend_from_slice(&Command::Data.serialize());
        stream.write_all(&commands).await?;

        let mail_reply = Self::read_reply(stream).await?;
        let mut rcpt_replies = Vec::with_capacity(to.len());
        for _ in to {
            rcpt_replies.push(Self::read_reply(stream).await?);
        }
        let data_reply = Self::read_reply(stream).await?;

        if mail_reply.is_transient_error() || mail_reply.is_permanent_error() {
            return Err(Error::smtp_error(
                mail_reply.code.as_u16(),
                mail_reply.message_text(),
            ));
        }
        if let Some(bad) = rcpt_replies.iter().find(|r| !r.is_success()) {
            return Err(Error::smtp_error(bad.code.as_u16(), bad.message_text()));
        }
        if data_reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(
                data_reply.code.as_u16(),
                data_reply.message_text(),
            ));
        }

        write_dot_stuffed(stream, message).await?;
        Self::read_reply(stream).await
    }

    /// Verifies a mailbox address (VRFY), available in any state.
    ///
    /// Returns `Ok(None)` when the server declines to confirm (e.g. `252`
    /// or a non-2xx reply) rather than an error, since VRFY refusal is a
    /// routine, policy-driven outcome rather than a protocol failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be sent or the reply cannot
    /// be read.
    pub async fn vrfy(&mut self, address: &str) -> Result<Option<Mailbox>> {
        let cmd = Command::Vrfy {
            address: address.to_string(),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Ok(None);
        }

        Ok(reply.message.first().and_then(|line| parse_mailbox_line(line)))
    }

    /// Expands a mailing list (EXPN), available in any state.
    ///
    /// Returns an empty vector when the server declines rather than an
    /// error, for the same reason as [`vrfy`](Self::vrfy).
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be sent or the reply cannot
    /// be read.
    pub async fn expn(&mut self, name: &str) -> Result<Vec<Mailbox>> {
        let cmd = Command::Expn {
            name: name.to_string(),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Ok(Vec::new());
        }

        Ok(reply
            .message
            .iter()
            .filter_map(|line| parse_mailbox_line(line))
            .collect())
    }

    /// Requests help text (HELP), available in any state. Returns the raw
    /// reply lines and their newline-joined concatenation.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn help(&mut self, argument: Option<&str>) -> Result<(Vec<String>, String)> {
        let cmd = Command::Help {
            argument: argument.map(str::to_string),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        let text = reply.message.join("\n");
        Ok((reply.message.clone(), text))
    }

    /// Sends NOOP, available in any state.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the command.
    pub async fn noop(&mut self) -> Result<()> {
        let reply = self.send_command(Command::Noop).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(())
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let cmd = Command::Quit;
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(())
    }
}
