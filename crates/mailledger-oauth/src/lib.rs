//! # mailledger-oauth
//!
//! `OAuth2` SASL response builders for email protocols (IMAP/SMTP).
//!
//! Full authorization-flow and token-refresh support is out of scope here;
//! callers obtain an access token through whatever flow suits their
//! application and hand it to [`sasl::xoauth2_response`] or
//! [`sasl::oauthbearer_response`] to build the AUTHENTICATE initial response.
//!
//! ## Using with IMAP/SMTP
//!
//! ```
//! use mailledger_oauth::sasl::{oauthbearer_response, xoauth2_response};
//!
//! // OAUTHBEARER (RFC 7628 standard)
//! let auth_string = oauthbearer_response("user@gmail.com", "ya29.a0...");
//! // Send: AUTHENTICATE OAUTHBEARER {auth_string}
//!
//! // XOAUTH2 (Google/Microsoft proprietary)
//! let auth_string = xoauth2_response("user@gmail.com", "ya29.a0...");
//! // Send: AUTHENTICATE XOAUTH2 {auth_string}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod sasl;
