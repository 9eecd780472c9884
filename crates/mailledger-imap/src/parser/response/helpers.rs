//! Parser helper functions.

use crate::parser::lexer::{Lexer, Token};
use crate::types::{
    Capability, Flag, Flags, ListResponse, Mailbox, MailboxAttribute, ResponseCode, SeqNum, Uid,
    UidValidity,
};
use crate::{Error, Result};

use super::types::StatusItem;

/// Parses a SORT response: a space-separated list of sequence numbers.
pub fn parse_sort_response(lexer: &mut Lexer<'_>) -> Result<Vec<SeqNum>> {
    parse_search_response(lexer)
}

/// Parses an ESEARCH response (RFC 4731).
pub fn parse_esearch_response(lexer: &mut Lexer<'_>) -> Result<(Option<String>, bool, Vec<(String, String)>)> {
    let mut tag = None;
    let mut uid = false;
    let mut data = Vec::new();

    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    if lexer.peek() == Some(b'(') {
        lexer.advance();
        let atom = lexer.read_atom_string()?;
        if atom.eq_ignore_ascii_case("TAG") {
            lexer.expect_space()?;
            tag = Some(lexer.read_astring()?);
        }
        lexer.expect(Token::RParen)?;
    }

    loop {
        if lexer.peek() != Some(b' ') {
            break;
        }
        lexer.advance();
        let atom = match lexer.next_token()? {
            Token::Atom(s) => s.to_string(),
            Token::Eof | Token::Crlf => break,
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in ESEARCH: {token:?}"),
                });
            }
        };

        if atom.eq_ignore_ascii_case("UID") {
            uid = true;
            continue;
        }

        lexer.expect_space()?;
        let value = read_word(lexer);
        data.push((atom.to_uppercase(), value));
    }

    Ok((tag, uid, data))
}

/// Parses an ID response (RFC 2971): a parenthesized list of key/value pairs, or NIL.
pub fn parse_id_response(lexer: &mut Lexer<'_>) -> Result<Option<Vec<(String, String)>>> {
    match lexer.next_token()? {
        Token::Nil => return Ok(None),
        Token::LParen => {}
        token => {
            return Err(Error::Parse {
                position: lexer.position(),
                message: format!("Expected NIL or ( in ID response, got {token:?}"),
            });
        }
    }

    let mut params = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::QuotedString(key) | Token::Atom(key) => {
                let key = key.to_string();
                lexer.expect_space()?;
                let value = lexer.read_nstring()?.unwrap_or_default();
                params.push((key, value));
            }
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in ID response: {token:?}"),
                });
            }
        }
    }

    Ok(Some(params))
}

/// Parses an ENABLED response: the list of extensions the server enabled.
pub fn parse_enabled_response(lexer: &mut Lexer<'_>) -> Result<Vec<Capability>> {
    parse_capability_data(lexer)
}

/// Parses an ACL response (RFC 4314).
pub fn parse_acl_response(lexer: &mut Lexer<'_>) -> Result<(Mailbox, Vec<(String, String)>)> {
    let mailbox = Mailbox::new(lexer.read_astring()?);
    let mut rights = Vec::new();

    loop {
        if lexer.peek() != Some(b' ') {
            break;
        }
        lexer.advance();
        let identifier = lexer.read_astring()?;
        lexer.expect_space()?;
        let perms = lexer.read_astring()?;
        rights.push((identifier, perms));
    }

    Ok((mailbox, rights))
}

/// Parses a LISTRIGHTS response (RFC 4314).
pub fn parse_listrights_response(
    lexer: &mut Lexer<'_>,
) -> Result<(Mailbox, String, String, Vec<String>)> {
    let mailbox = Mailbox::new(lexer.read_astring()?);
    lexer.expect_space()?;
    let identifier = lexer.read_astring()?;
    lexer.expect_space()?;
    let required = lexer.read_astring()?;

    let mut optional = Vec::new();
    loop {
        if lexer.peek() != Some(b' ') {
            break;
        }
        lexer.advance();
        optional.push(lexer.read_astring()?);
    }

    Ok((mailbox, identifier, required, optional))
}

/// Parses a MYRIGHTS response (RFC 4314).
pub fn parse_myrights_response(lexer: &mut Lexer<'_>) -> Result<(Mailbox, String)> {
    let mailbox = Mailbox::new(lexer.read_astring()?);
    lexer.expect_space()?;
    let rights = lexer.read_astring()?;
    Ok((mailbox, rights))
}

/// Parses a QUOTA response (RFC 9208).
pub fn parse_quota_response(lexer: &mut Lexer<'_>) -> Result<(String, Vec<(String, u64, u64)>)> {
    let root = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut resources = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::Atom(name) => {
                lexer.expect_space()?;
                let usage = u64::from(lexer.read_number()?);
                lexer.expect_space()?;
                let limit = u64::from(lexer.read_number()?);
                resources.push((name.to_string(), usage, limit));
            }
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in QUOTA response: {token:?}"),
                });
            }
        }
    }

    Ok((root, resources))
}

/// Parses a QUOTAROOT response (RFC 9208).
pub fn parse_quotaroot_response(lexer: &mut Lexer<'_>) -> Result<(Mailbox, Vec<String>)> {
    let mailbox = Mailbox::new(lexer.read_astring()?);
    let mut roots = Vec::new();

    loop {
        if lexer.peek() != Some(b' ') {
            break;
        }
        lexer.advance();
        roots.push(lexer.read_astring()?);
    }

    Ok((mailbox, roots))
}

/// Parses a METADATA response (RFC 5464).
pub fn parse_metadata_response(
    lexer: &mut Lexer<'_>,
) -> Result<(Mailbox, Vec<(String, Option<String>)>)> {
    let mailbox = Mailbox::new(lexer.read_astring()?);
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut entries = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::QuotedString(entry) | Token::Atom(entry) => {
                let entry = entry.to_string();
                lexer.expect_space()?;
                let value = lexer.read_nstring()?;
                entries.push((entry, value));
            }
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in METADATA response: {token:?}"),
                });
            }
        }
    }

    Ok((mailbox, entries))
}

/// Parses an ANNOTATION response (ANNOTATE-EXPERIMENT-1): a mailbox, an
/// annotation entry path, and a parenthesized list of attribute/value pairs.
/// Literal attribute values (`{5}\r\nHello`) are resolved by the lexer at
/// tokenization time, so they arrive here as ordinary string tokens.
pub fn parse_annotation_response(
    lexer: &mut Lexer<'_>,
) -> Result<(Mailbox, String, Vec<(String, Option<String>)>)> {
    let mailbox = Mailbox::new(lexer.read_astring()?);
    lexer.expect_space()?;
    let entry = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut attributes = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::QuotedString(attribute) | Token::Atom(attribute) => {
                let attribute = attribute.to_string();
                lexer.expect_space()?;
                let value = lexer.read_nstring()?;
                attributes.push((attribute, value));
            }
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in ANNOTATION response: {token:?}"),
                });
            }
        }
    }

    Ok((mailbox, entry, attributes))
}

/// Reads a bare word (atom-like run of non-space bytes) without lexer token rules,
/// used for ESEARCH return-option values such as UID sets (`2,10:11`).
fn read_word(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();
    let end = remaining
        .iter()
        .position(|&b| b == b' ' || b == b'\r')
        .unwrap_or(remaining.len());
    let word = String::from_utf8_lossy(&remaining[..end]).to_string();
    lexer.skip(end);
    word
}

/// Parses a response code.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom_string()?;
    let upper = atom.to_uppercase();

    let code = match upper.as_str() {
        "ALERT" => ResponseCode::Alert,
        "PARSE" => ResponseCode::Parse,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "NOMODSEQ" => ResponseCode::NoModSeq,
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            let uid = Uid::new(n).ok_or_else(|| Error::Parse {
                position: lexer.position(),
                message: "Invalid UID 0".to_string(),
            })?;
            ResponseCode::UidNext(uid)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            let validity = UidValidity::new(n).ok_or_else(|| Error::Parse {
                position: lexer.position(),
                message: "Invalid UIDVALIDITY 0".to_string(),
            })?;
            ResponseCode::UidValidity(validity)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            let seq = SeqNum::new(n).ok_or_else(|| Error::Parse {
                position: lexer.position(),
                message: "Invalid sequence number 0".to_string(),
            })?;
            ResponseCode::Unseen(seq)
        }
        "HIGHESTMODSEQ" => {
            lexer.expect_space()?;
            let n = u64::from(lexer.read_number()?);
            ResponseCode::HighestModSeq(n)
        }
        "CAPABILITY" => {
            let caps = parse_capability_data(lexer)?;
            ResponseCode::Capability(caps)
        }
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            let flags = parse_flag_list(lexer)?;
            ResponseCode::PermanentFlags(flags.into_iter().collect())
        }
        _ => {
            // Skip until ]
            while lexer.peek() != Some(b']') && !lexer.is_eof() {
                lexer.advance();
            }
            ResponseCode::Unknown(atom.to_string())
        }
    };

    // Skip to closing bracket
    while lexer.peek() != Some(b']') && !lexer.is_eof() {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Parses capability data.
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Atom(s) = lexer.next_token()? {
            caps.push(Capability::parse(s));
        }
    }

    Ok(caps)
}

/// Parses a flag list.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Flags> {
    lexer.expect(Token::LParen)?;

    let mut flags = Flags::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => flags.insert(Flag::parse(s)),
            Token::Space => continue,
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in flag list: {token:?}"),
                });
            }
        }
    }

    Ok(flags)
}

/// Parses a LIST response.
pub fn parse_list_response(lexer: &mut Lexer<'_>) -> Result<ListResponse> {
    // Parse attributes
    lexer.expect(Token::LParen)?;
    let mut attributes = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => attributes.push(MailboxAttribute::parse(s)),
            Token::Space => continue,
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in LIST attributes: {token:?}"),
                });
            }
        }
    }

    lexer.expect_space()?;

    // Parse delimiter
    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        token => {
            return Err(Error::Parse {
                position: lexer.position(),
                message: format!("Expected delimiter, got {token:?}"),
            });
        }
    };

    lexer.expect_space()?;

    // Parse mailbox name
    let mailbox_name = lexer.read_astring()?;

    Ok(ListResponse {
        attributes,
        delimiter,
        mailbox: Mailbox::new(mailbox_name),
    })
}

/// Parses a SEARCH response.
pub fn parse_search_response(lexer: &mut Lexer<'_>) -> Result<Vec<SeqNum>> {
    let mut nums = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Number(n) = lexer.next_token()?
            && let Some(seq) = SeqNum::new(n)
        {
            nums.push(seq);
        }
    }

    Ok(nums)
}

/// Parses a STATUS response.
pub fn parse_status_response(lexer: &mut Lexer<'_>) -> Result<(Mailbox, Vec<StatusItem>)> {
    let mailbox_name = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::Atom(name) => {
                lexer.expect_space()?;
                let value = lexer.read_number()?;

                let item = match name.to_uppercase().as_str() {
                    "MESSAGES" => StatusItem::Messages(value),
                    "RECENT" => StatusItem::Recent(value),
                    "UIDNEXT" => {
                        if let Some(uid) = Uid::new(value) {
                            StatusItem::UidNext(uid)
                        } else {
                            continue;
                        }
                    }
                    "UIDVALIDITY" => {
                        if let Some(v) = UidValidity::new(value) {
                            StatusItem::UidValidity(v)
                        } else {
                            continue;
                        }
                    }
                    "UNSEEN" => StatusItem::Unseen(value),
                    "HIGHESTMODSEQ" => StatusItem::HighestModSeq(u64::from(value)),
                    _ => continue,
                };
                items.push(item);
            }
            _ => continue,
        }
    }

    Ok((Mailbox::new(mailbox_name), items))
}

/// Reads text until CRLF.
pub fn read_text_until_crlf(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();

    // Find CRLF
    let end = remaining
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(remaining.len());

    lexer.skip(end);

    // Skip CRLF if present
    if lexer.peek() == Some(b'\r') {
        lexer.skip(2);
    }

    String::from_utf8_lossy(&remaining[..end]).to_string()
}
