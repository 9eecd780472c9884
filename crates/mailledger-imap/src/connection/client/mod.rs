//! Type-state IMAP client connection.
//!
//! Uses the type-state pattern to enforce valid state transitions at compile time.
//! The IMAP connection states are:
//!
//! - `NotAuthenticated`: Initial state after connection
//! - `Authenticated`: After successful LOGIN/AUTHENTICATE
//! - `Selected`: After successful SELECT/EXAMINE
//!
//! Each state only exposes methods that are valid for that state.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::states::{Authenticated, NotAuthenticated, Selected};
use super::compressed::CompressedStream;
use super::framed::FramedStream;
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::redact::{Redactor, SecretSpan};
use crate::types::{Capability, Status};
use crate::{Error, Result};

/// IMAP client connection with type-state.
///
/// The type parameter `State` tracks the connection state at compile time.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tag_gen: TagGenerator,
    pub(crate) capabilities: Vec<Capability>,
    pub(crate) redactor: Redactor,
    _state: PhantomData<State>,
}

// Manual Debug implementation since FramedStream doesn't implement Debug
impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tag_gen", &self.tag_gen)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Shared implementation for all states.
impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the server capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Checks if the server has a specific capability.
    #[must_use]
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Returns true if the server supports `IMAP4rev2`.
    #[must_use]
    pub fn supports_imap4rev2(&self) -> bool {
        self.has_capability(&Capability::Imap4Rev2)
    }

    /// Returns true if the server supports IDLE (RFC 2177).
    #[must_use]
    pub fn supports_idle(&self) -> bool {
        self.has_capability(&Capability::Idle)
    }

    /// Returns true if the server supports MOVE (RFC 6851).
    #[must_use]
    pub fn supports_move(&self) -> bool {
        self.has_capability(&Capability::Move)
    }

    /// Returns true if the server supports NAMESPACE (RFC 2342).
    #[must_use]
    pub fn supports_namespace(&self) -> bool {
        self.has_capability(&Capability::Namespace)
    }

    /// Returns true if the server supports CONDSTORE (RFC 7162).
    #[must_use]
    pub fn supports_condstore(&self) -> bool {
        self.has_capability(&Capability::CondStore)
    }

    /// Returns true if the server supports UIDPLUS (RFC 4315).
    #[must_use]
    pub fn supports_uidplus(&self) -> bool {
        self.has_capability(&Capability::UidPlus)
    }

    /// Returns true if LOGIN is disabled (e.g., before STARTTLS).
    #[must_use]
    pub fn login_disabled(&self) -> bool {
        self.has_capability(&Capability::LoginDisabled)
    }

    /// Returns true if the server supports SORT (RFC 5256).
    #[must_use]
    pub fn supports_sort(&self) -> bool {
        self.has_capability(&Capability::Sort)
    }

    /// Returns true if the server supports `SORT=DISPLAY` (RFC 5957).
    #[must_use]
    pub fn supports_sort_display(&self) -> bool {
        self.has_capability(&Capability::SortDisplay)
    }

    /// Returns true if the server supports ESEARCH (RFC 4731).
    #[must_use]
    pub fn supports_esearch(&self) -> bool {
        self.has_capability(&Capability::ESearch)
    }

    /// Returns true if the server supports ANNOTATE-EXPERIMENT-1.
    #[must_use]
    pub fn supports_annotation(&self) -> bool {
        self.has_capability(&Capability::AnnotateExperiment1)
    }

    /// Returns true if the server supports METADATA (RFC 5464).
    #[must_use]
    pub fn supports_metadata(&self) -> bool {
        self.has_capability(&Capability::Metadata)
    }

    /// Returns true if the server supports ACL (RFC 4314).
    #[must_use]
    pub fn supports_acl(&self) -> bool {
        self.has_capability(&Capability::Acl)
    }

    /// Returns true if the server supports QUOTA (RFC 9208).
    #[must_use]
    pub fn supports_quota(&self) -> bool {
        self.has_capability(&Capability::Quota)
    }

    /// Returns true if the server supports `COMPRESS=DEFLATE` (RFC 4978).
    #[must_use]
    pub fn supports_compress(&self) -> bool {
        self.has_capability(&Capability::CompressDeflate)
    }

    /// Returns true if the server supports AUTH=PLAIN (SASL PLAIN mechanism).
    #[must_use]
    pub fn supports_auth_plain(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| matches!(c, Capability::Auth(m) if m.eq_ignore_ascii_case("PLAIN")))
    }

    /// Sends a NOOP command to keep the connection alive.
    pub async fn noop(&mut self) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Noop.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;

        Ok(())
    }

    /// Sends a CAPABILITY command and updates the stored capabilities.
    pub async fn capability(&mut self) -> Result<Vec<Capability>> {
        let tag = self.tag_gen.next();
        let cmd = Command::Capability.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;

        // Parse capabilities from untagged responses
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Capability(caps))) =
                ResponseParser::parse(response_bytes)
            {
                self.capabilities.clone_from(&caps);
                return Ok(caps);
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(self.capabilities.clone())
    }

    /// Writes a serialized command whose bytes from `secret_offset` onward
    /// must never reach logs (a LOGIN password or AUTHENTICATE initial
    /// response). The redactor must already be primed via `begin_login`/
    /// `begin_authenticate` before calling this.
    pub(crate) async fn write_command_redacted(
        &mut self,
        cmd: &[u8],
        secret_offset: usize,
    ) -> Result<()> {
        let spans: Vec<_> = self
            .redactor
            .feed(&cmd[secret_offset..])
            .into_iter()
            .map(|span| SecretSpan {
                start: span.start + secret_offset,
                length: span.length,
            })
            .collect();
        tracing::trace!(
            command = %String::from_utf8_lossy(&Redactor::mask(cmd, &spans)),
            "writing command"
        );
        self.stream.write_command(cmd).await
    }

    /// Sends an ID command (RFC 2971), exchanging client/server
    /// identification parameters.
    ///
    /// `parameters` of `None` sends `ID NIL`. Returns the server's own
    /// identification parameters, if any.
    pub async fn id(
        &mut self,
        parameters: Option<Vec<(String, String)>>,
    ) -> Result<Option<Vec<(String, String)>>> {
        let tag = self.tag_gen.next();
        let cmd = Command::Id { parameters }.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let mut result = None;
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Id(server_params))) =
                ResponseParser::parse(response_bytes)
            {
                result = server_params;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(result)
    }

    /// Activates `COMPRESS=DEFLATE` (RFC 4978), wrapping the transport in a
    /// raw-DEFLATE stream for the remainder of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureUnavailable`] if the server lacks the
    /// `COMPRESS=DEFLATE` capability.
    pub async fn compress(mut self) -> Result<Client<CompressedStream<S>, State>> {
        if !self.has_capability(&Capability::CompressDeflate) {
            return Err(Error::FeatureUnavailable("COMPRESS=DEFLATE".to_string()));
        }

        let tag = self.tag_gen.next();
        let cmd = Command::Compress.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;

        let inner = self.stream.into_inner();
        Ok(Client {
            stream: FramedStream::new(CompressedStream::new(inner)),
            tag_gen: self.tag_gen,
            capabilities: self.capabilities,
            redactor: self.redactor,
            _state: PhantomData,
        })
    }

    /// Reads responses until we get a tagged response matching our tag.
    pub(crate) async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut accumulator = super::framed::ResponseAccumulator::new(tag);
        accumulator.read_until_tagged(&mut self.stream).await
    }

    /// Checks that the tagged response is OK.
    pub(crate) fn check_tagged_ok(responses: &[Vec<u8>], tag: &str) -> Result<()> {
        // Find the tagged response (should be the last one)
        for response_bytes in responses.iter().rev() {
            if let Ok(Response::Tagged {
                tag: resp_tag,
                status,
                code: _,
                text,
            }) = ResponseParser::parse(response_bytes)
                && resp_tag.as_str() == tag
            {
                return match status {
                    Status::Ok | Status::PreAuth => Ok(()),
                    Status::No => Err(Error::No(text)),
                    Status::Bad => Err(Error::Bad(text)),
                    Status::Bye => Err(Error::Bye(text)),
                };
            }
        }

        Err(Error::Protocol("missing tagged response".to_string()))
    }
}
