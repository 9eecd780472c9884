//! Implementation for the authenticated state.

use std::fmt::Write;
use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::command::Command;
use crate::parser::{Response, ResponseParser, StatusItem, UntaggedResponse};
use crate::types::{Capability, Mailbox, MailboxStatus, ResponseCode, Status};
use crate::{Error, Result};

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Selects a mailbox for read-write access.
    ///
    /// Consumes self and returns a selected client on success.
    pub async fn select(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let tag = self.tag_gen.next();
        let cmd = Command::Select {
            mailbox: Mailbox::new(mailbox),
            condstore: false,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let status = Self::parse_mailbox_status(&responses);
        Self::check_tagged_ok(&responses, &tag)?;

        Ok((
            Client {
                stream: self.stream,
                tag_gen: self.tag_gen,
                capabilities: self.capabilities,
                redactor: self.redactor,
                _state: PhantomData,
            },
            status,
        ))
    }

    /// Examines a mailbox for read-only access.
    ///
    /// Consumes self and returns a selected client on success.
    pub async fn examine(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let tag = self.tag_gen.next();
        let cmd = Command::Examine {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let status = Self::parse_mailbox_status(&responses);
        Self::check_tagged_ok(&responses, &tag)?;

        Ok((
            Client {
                stream: self.stream,
                tag_gen: self.tag_gen,
                capabilities: self.capabilities,
                redactor: self.redactor,
                _state: PhantomData,
            },
            status,
        ))
    }

    /// Lists mailboxes matching a pattern.
    pub async fn list(
        &mut self,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<crate::types::ListResponse>> {
        let tag = self.tag_gen.next();
        let cmd = Command::List {
            reference: reference.to_string(),
            pattern: pattern.to_string(),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let mut list_responses = Vec::new();

        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::List(item))) =
                ResponseParser::parse(response_bytes)
            {
                list_responses.push(item);
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(list_responses)
    }

    /// Creates a new mailbox.
    pub async fn create(&mut self, mailbox: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Create {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Deletes a mailbox.
    pub async fn delete(&mut self, mailbox: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Delete {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Renames a mailbox.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Rename {
            from: Mailbox::new(from),
            to: Mailbox::new(to),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Subscribes to a mailbox.
    pub async fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Subscribe {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Unsubscribes from a mailbox.
    pub async fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Unsubscribe {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Gets the status of a mailbox without selecting it.
    pub async fn status(
        &mut self,
        mailbox: &str,
        items: Vec<crate::command::StatusAttribute>,
    ) -> Result<Vec<StatusItem>> {
        let tag = self.tag_gen.next();
        let cmd = Command::Status {
            mailbox: Mailbox::new(mailbox),
            items,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let mut result = Vec::new();

        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Status { items, .. })) =
                ResponseParser::parse(response_bytes)
            {
                result.extend(items);
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(result)
    }

    /// Enables the given capabilities (RFC 5161).
    ///
    /// Returns the capabilities the server actually enabled.
    pub async fn enable(&mut self, capabilities: Vec<String>) -> Result<Vec<Capability>> {
        let tag = self.tag_gen.next();
        let cmd = Command::Enable { capabilities }.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let mut enabled = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Enabled(caps))) =
                ResponseParser::parse(response_bytes)
            {
                enabled = caps;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(enabled)
    }

    /// Lists subscribed mailboxes matching a pattern (RFC 3501 LSUB).
    pub async fn lsub(
        &mut self,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<crate::types::ListResponse>> {
        let tag = self.tag_gen.next();
        let cmd = Command::Lsub {
            reference: reference.to_string(),
            pattern: pattern.to_string(),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let mut list_responses = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Lsub(item))) =
                ResponseParser::parse(response_bytes)
            {
                list_responses.push(item);
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(list_responses)
    }

    /// Queries the server's personal/other-users/shared namespaces
    /// (RFC 2342). Each tier is returned as raw, unparsed text.
    pub async fn namespace(&mut self) -> Result<(Option<String>, Option<String>, Option<String>)> {
        let tag = self.tag_gen.next();
        let cmd = Command::Namespace.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let responses = self.read_until_tagged(&tag).await?;
        let mut namespaces = (None, None, None);
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Namespace {
                personal,
                other,
                shared,
            })) = ResponseParser::parse(response_bytes)
            {
                namespaces = (personal, other, shared);
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(namespaces)
    }

    /// Grants or revokes rights on a mailbox for an identifier (RFC 4314
    /// SETACL). `rights` may be prefixed with `+`/`-` to add/remove rather
    /// than replace.
    pub async fn set_acl(&mut self, mailbox: &str, identifier: &str, rights: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::SetAcl {
            mailbox: Mailbox::new(mailbox),
            identifier: identifier.to_string(),
            rights: rights.to_string(),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Removes all rights for an identifier on a mailbox (RFC 4314 DELETEACL).
    pub async fn delete_acl(&mut self, mailbox: &str, identifier: &str) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::DeleteAcl {
            mailbox: Mailbox::new(mailbox),
            identifier: identifier.to_string(),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Queries the rights granted per identifier on a mailbox (RFC 4314
    /// GETACL).
    pub async fn get_acl(&mut self, mailbox: &str) -> Result<Vec<(String, String)>> {
        let tag = self.tag_gen.next();
        let cmd = Command::GetAcl {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut rights = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Acl {
                rights: mailbox_rights,
                ..
            })) = ResponseParser::parse(response_bytes)
            {
                rights = mailbox_rights;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(rights)
    }

    /// Queries which rights could be granted to an identifier on a mailbox
    /// (RFC 4314 LISTRIGHTS). Returns `(required, optional)`.
    pub async fn list_rights(
        &mut self,
        mailbox: &str,
        identifier: &str,
    ) -> Result<(String, Vec<String>)> {
        let tag = self.tag_gen.next();
        let cmd = Command::ListRights {
            mailbox: Mailbox::new(mailbox),
            identifier: identifier.to_string(),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut result = (String::new(), Vec::new());
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::ListRights {
                required,
                optional,
                ..
            })) = ResponseParser::parse(response_bytes)
            {
                result = (required, optional);
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(result)
    }

    /// Queries the rights the authenticated user holds on a mailbox (RFC
    /// 4314 MYRIGHTS).
    pub async fn my_rights(&mut self, mailbox: &str) -> Result<String> {
        let tag = self.tag_gen.next();
        let cmd = Command::MyRights {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut rights = String::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::MyRights {
                rights: my_rights, ..
            })) = ResponseParser::parse(response_bytes)
            {
                rights = my_rights;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(rights)
    }

    /// Queries resource usage/limits for a quota root (RFC 9208 GETQUOTA).
    /// Returns `(resource, usage, limit)` triples.
    pub async fn get_quota(&mut self, root: &str) -> Result<Vec<(String, u64, u64)>> {
        let tag = self.tag_gen.next();
        let cmd = Command::GetQuota {
            root: root.to_string(),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut resources = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Quota {
                resources: quota_resources,
                ..
            })) = ResponseParser::parse(response_bytes)
            {
                resources = quota_resources;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(resources)
    }

    /// Queries which quota roots apply to a mailbox (RFC 9208 GETQUOTAROOT).
    pub async fn get_quota_root(&mut self, mailbox: &str) -> Result<Vec<String>> {
        let tag = self.tag_gen.next();
        let cmd = Command::GetQuotaRoot {
            mailbox: Mailbox::new(mailbox),
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut roots = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::QuotaRoot {
                roots: quota_roots, ..
            })) = ResponseParser::parse(response_bytes)
            {
                roots = quota_roots;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(roots)
    }

    /// Sets resource limits on a quota root (RFC 9208 SETQUOTA).
    pub async fn set_quota(&mut self, root: &str, resources: Vec<(String, u64)>) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::SetQuota {
            root: root.to_string(),
            resources,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Fetches metadata entries for a mailbox, or server-level entries when
    /// `mailbox` is empty (RFC 5464 GETMETADATA).
    pub async fn get_metadata(
        &mut self,
        mailbox: &str,
        entries: Vec<String>,
    ) -> Result<Vec<(String, Option<String>)>> {
        let tag = self.tag_gen.next();
        let cmd = Command::GetMetadata {
            mailbox: Mailbox::new(mailbox),
            entries,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut result = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Metadata {
                entries: metadata_entries,
                ..
            })) = ResponseParser::parse(response_bytes)
            {
                result = metadata_entries;
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(result)
    }

    /// Sets or deletes metadata entries for a mailbox, or server-level
    /// entries when `mailbox` is empty (RFC 5464 SETMETADATA). A `None`
    /// value deletes the entry.
    pub async fn set_metadata(
        &mut self,
        mailbox: &str,
        entries: Vec<(String, Option<String>)>,
    ) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::SetMetadata {
            mailbox: Mailbox::new(mailbox),
            entries,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Fetches annotation attributes for a mailbox (ANNOTATE-EXPERIMENT-1
    /// GETANNOTATION).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnnotationNotSupported`] if the server doesn't
    /// advertise ANNOTATE-EXPERIMENT-1.
    pub async fn get_annotation(
        &mut self,
        mailbox: &str,
        entries: Vec<String>,
        attributes: Vec<String>,
    ) -> Result<Vec<(String, String, Vec<(String, Option<String>)>)>> {
        if !self.supports_annotation() {
            return Err(Error::AnnotationNotSupported);
        }

        let tag = self.tag_gen.next();
        let cmd = Command::GetAnnotation {
            mailbox: Mailbox::new(mailbox),
            entries,
            attributes,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        let mut result = Vec::new();
        for response_bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Annotation {
                mailbox,
                entry,
                attributes,
            })) = ResponseParser::parse(response_bytes)
            {
                result.push((mailbox.to_string(), entry, attributes));
            }
        }

        Self::check_tagged_ok(&responses, &tag)?;
        Ok(result)
    }

    /// Sets or deletes annotation attributes on a mailbox entry
    /// (ANNOTATE-EXPERIMENT-1 SETANNOTATION). A `None` value deletes the
    /// attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnnotationNotSupported`] if the server doesn't
    /// advertise ANNOTATE-EXPERIMENT-1.
    pub async fn set_annotation(
        &mut self,
        mailbox: &str,
        entry: &str,
        attributes: Vec<(String, Option<String>)>,
    ) -> Result<()> {
        if !self.supports_annotation() {
            return Err(Error::AnnotationNotSupported);
        }

        let tag = self.tag_gen.next();
        let cmd = Command::SetAnnotation {
            mailbox: Mailbox::new(mailbox),
            entry: entry.to_string(),
            attributes,
        }
        .serialize(&tag);

        self.stream.write_command(&cmd).await?;
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Appends a message to a mailbox.
    ///
    /// The message should be a complete RFC 5322 message.
    pub async fn append(
        &mut self,
        mailbox: &str,
        flags: Option<Vec<crate::types::Flag>>,
        message: &[u8],
    ) -> Result<()> {
        let tag = self.tag_gen.next();

        // APPEND uses literals which require continuation handling
        // First, send the command with literal size
        let mut cmd = format!("{tag} APPEND ");
        cmd.push_str(&Mailbox::new(mailbox).to_string());
        if let Some(ref f) = flags {
            cmd.push_str(" (");
            for (i, flag) in f.iter().enumerate() {
                if i > 0 {
                    cmd.push(' ');
                }
                cmd.push_str(flag.as_str());
            }
            cmd.push(')');
        }
        // Writing to a String never fails
        let _ = write!(cmd, " {{{}}}\r\n", message.len());

        self.stream.write_command(cmd.as_bytes()).await?;

        // Wait for continuation response
        let response = self.stream.read_response().await?;
        if !response.starts_with(b"+") {
            let parsed = ResponseParser::parse(&response)?;
            if let Response::Tagged { status, text, .. } = parsed {
                return match status {
                    Status::No => Err(Error::No(text)),
                    Status::Bad => Err(Error::Bad(text)),
                    _ => Err(Error::Protocol("unexpected response to APPEND".to_string())),
                };
            }
            return Err(Error::Protocol(
                "expected continuation for APPEND".to_string(),
            ));
        }

        // Send the message data
        self.stream.write_command(message).await?;
        self.stream.write_command(b"\r\n").await?;

        // Read the tagged response
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(())
    }

    /// Gracefully disconnects from the server.
    pub async fn logout(mut self) -> Result<()> {
        let tag = self.tag_gen.next();
        let cmd = Command::Logout.serialize(&tag);
        self.stream.write_command(&cmd).await?;

        let _ = self.read_until_tagged(&tag).await;
        Ok(())
    }

    /// Parses mailbox status from SELECT/EXAMINE responses.
    pub(super) fn parse_mailbox_status(responses: &[Vec<u8>]) -> MailboxStatus {
        let mut status = MailboxStatus::default();

        for response_bytes in responses {
            if let Ok(Response::Untagged(untagged)) = ResponseParser::parse(response_bytes) {
                match untagged {
                    UntaggedResponse::Exists(n) => status.exists = n,
                    UntaggedResponse::Recent(n) => status.recent = n,
                    UntaggedResponse::Flags(flags) => status.flags = flags,
                    UntaggedResponse::Ok {
                        code: Some(code), ..
                    } => match code {
                        ResponseCode::UidValidity(v) => {
                            status.uid_validity = Some(v);
                        }
                        ResponseCode::UidNext(v) => {
                            status.uid_next = Some(v);
                        }
                        ResponseCode::Unseen(v) => {
                            status.unseen = Some(v);
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }

        status
    }
}
