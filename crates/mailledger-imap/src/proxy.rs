//! Client-side proxy handshakes.
//!
//! Establishes a tunnel to the real mail server through an intermediate
//! proxy before any IMAP traffic (or the TLS handshake, for implicit TLS)
//! begins. The caller connects a plain TCP stream to the *proxy's* host and
//! port, then calls [`connect_through_proxy`] to negotiate the tunnel; the
//! same stream is then handed to [`crate::connection::stream::upgrade_to_tls`]
//! or used directly for plaintext/STARTTLS connections.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, ProxyErrorKind, Result};

/// Which proxy protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// HTTP `CONNECT` tunneling (RFC 9110 section 9.3.6).
    Http,
    /// SOCKS4 (no DNS resolution on the client side).
    Socks4,
    /// SOCKS4a (proxy resolves the hostname).
    Socks4a,
    /// SOCKS5 (RFC 1928).
    Socks5,
}

/// Username/password credentials for proxy authentication.
#[derive(Debug, Clone)]
pub struct ProxyCredentials {
    /// Proxy username.
    pub username: String,
    /// Proxy password.
    pub password: String,
}

/// Proxy connection configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Which proxy protocol to use.
    pub kind: ProxyKind,
    /// Proxy hostname or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional proxy credentials.
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyConfig {
    /// Creates a configuration for an unauthenticated proxy.
    #[must_use]
    pub fn new(kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    /// Attaches credentials to this configuration.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Negotiates a tunnel to `target_host:target_port` over `stream`, which must
/// already be connected to the proxy named in `config`.
///
/// # Errors
///
/// Returns [`Error::ProxyError`] if the proxy rejects the request, requires
/// authentication that was not supplied, or sends a malformed reply, and
/// [`Error::Io`] on transport failures.
pub async fn connect_through_proxy<S>(
    stream: &mut S,
    config: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match config.kind {
        ProxyKind::Http => http_connect(stream, config, target_host, target_port).await,
        ProxyKind::Socks4 | ProxyKind::Socks4a => {
            socks4_connect(stream, config, target_host, target_port).await
        }
        ProxyKind::Socks5 => socks5_connect(stream, config, target_host, target_port).await,
    }
}

async fn http_connect<S>(
    stream: &mut S,
    config: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n"
    );

    if let Some(creds) = &config.credentials {
        use base64::Engine as _;
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", creds.username, creds.password));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }

    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(Error::Io)?;

    let status_line = read_http_status_line(stream).await?;
    let code = parse_http_status_code(&status_line)?;

    match code {
        200..=299 => Ok(()),
        407 => Err(Error::ProxyError {
            kind: ProxyErrorKind::AuthRequired,
            msg: status_line,
        }),
        _ => Err(Error::ProxyError {
            kind: ProxyErrorKind::Rejected,
            msg: status_line,
        }),
    }
}

async fn read_http_status_line<S>(stream: &mut S) -> Result<String>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).await.map_err(Error::Io)?;
        if n == 0 {
            return Err(Error::ConnectionClosed(
                "proxy closed connection during CONNECT".to_string(),
            ));
        }
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            break;
        }
        if line.len() > 8192 {
            return Err(Error::ProxyError {
                kind: ProxyErrorKind::ProtocolViolation,
                msg: "HTTP status line too long".to_string(),
            });
        }
    }

    // Drain remaining response headers up to the blank line terminator.
    let mut blank_run = 0;
    loop {
        let n = stream.read(&mut byte).await.map_err(Error::Io)?;
        if n == 0 {
            break;
        }
        if byte[0] == b'\r' || byte[0] == b'\n' {
            blank_run += 1;
        } else {
            blank_run = 0;
        }
        if blank_run >= 4 {
            break;
        }
    }

    String::from_utf8(line)
        .map(|s| s.trim_end().to_string())
        .map_err(|_| Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: "non-UTF-8 HTTP status line".to_string(),
        })
}

fn parse_http_status_code(status_line: &str) -> Result<u16> {
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: format!("malformed HTTP status line: {status_line}"),
        })
}

async fn socks4_connect<S>(
    stream: &mut S,
    config: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut request = Vec::with_capacity(16);
    request.push(0x04); // SOCKS version 4
    request.push(0x01); // CONNECT
    request.extend_from_slice(&target_port.to_be_bytes());

    let is_socks4a = matches!(config.kind, ProxyKind::Socks4a);
    let resolved: Option<std::net::Ipv4Addr> = target_host.parse().ok();

    if resolved.is_none() && !is_socks4a {
        return Err(Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: "SOCKS4 requires a pre-resolved IPv4 address; use SOCKS4a or SOCKS5 for hostnames"
                .to_string(),
        });
    }

    match resolved {
        Some(addr) => request.extend_from_slice(&addr.octets()),
        None => request.extend_from_slice(&[0, 0, 0, 1]), // invalid IP signals SOCKS4a
    }

    let user_id = config
        .credentials
        .as_ref()
        .map_or("", |c| c.username.as_str());
    request.extend_from_slice(user_id.as_bytes());
    request.push(0x00);

    if resolved.is_none() {
        request.extend_from_slice(target_host.as_bytes());
        request.push(0x00);
    }

    stream.write_all(&request).await.map_err(Error::Io)?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.map_err(Error::Io)?;

    if reply[0] != 0x00 {
        return Err(Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: format!("malformed SOCKS4 reply (version byte {:#04x})", reply[0]),
        });
    }

    match reply[1] {
        0x5A => Ok(()),
        0x5B => Err(Error::ProxyError {
            kind: ProxyErrorKind::Rejected,
            msg: "SOCKS4 request rejected or failed".to_string(),
        }),
        0x5C | 0x5D => Err(Error::ProxyError {
            kind: ProxyErrorKind::AuthFailed,
            msg: "SOCKS4 identd verification failed".to_string(),
        }),
        code => Err(Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: format!("unknown SOCKS4 reply code {code:#04x}"),
        }),
    }
}

async fn socks5_connect<S>(
    stream: &mut S,
    config: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let offers_userpass = config.credentials.is_some();
    let methods: &[u8] = if offers_userpass { &[0x00, 0x02] } else { &[0x00] };

    let mut greeting = vec![0x05, u8::try_from(methods.len()).unwrap_or(0)];
    greeting.extend_from_slice(methods);
    stream.write_all(&greeting).await.map_err(Error::Io)?;

    let mut chosen = [0u8; 2];
    stream.read_exact(&mut chosen).await.map_err(Error::Io)?;

    if chosen[0] != 0x05 {
        return Err(Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: "SOCKS5 server did not reply with version 5".to_string(),
        });
    }

    match chosen[1] {
        0x00 => {}
        0x02 => socks5_userpass_auth(stream, config).await?,
        0xFF => {
            return Err(Error::ProxyError {
                kind: ProxyErrorKind::AuthRequired,
                msg: "SOCKS5 server accepted no offered authentication method".to_string(),
            });
        }
        method => {
            return Err(Error::ProxyError {
                kind: ProxyErrorKind::ProtocolViolation,
                msg: format!("SOCKS5 server chose unsupported method {method:#04x}"),
            });
        }
    }

    let mut request = vec![0x05, 0x01, 0x00]; // VER, CONNECT, RSV
    if let Ok(addr) = target_host.parse::<std::net::Ipv4Addr>() {
        request.push(0x01);
        request.extend_from_slice(&addr.octets());
    } else if let Ok(addr) = target_host.parse::<std::net::Ipv6Addr>() {
        request.push(0x04);
        request.extend_from_slice(&addr.octets());
    } else {
        request.push(0x03);
        request.push(u8::try_from(target_host.len()).map_err(|_| Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: "target hostname too long for SOCKS5".to_string(),
        })?);
        request.extend_from_slice(target_host.as_bytes());
    }
    request.extend_from_slice(&target_port.to_be_bytes());

    stream.write_all(&request).await.map_err(Error::Io)?;

    let mut reply_head = [0u8; 4];
    stream.read_exact(&mut reply_head).await.map_err(Error::Io)?;

    if reply_head[0] != 0x05 {
        return Err(Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: "malformed SOCKS5 CONNECT reply".to_string(),
        });
    }

    let addr_len = match reply_head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len_byte = [0u8; 1];
            stream.read_exact(&mut len_byte).await.map_err(Error::Io)?;
            usize::from(len_byte[0])
        }
        atyp => {
            return Err(Error::ProxyError {
                kind: ProxyErrorKind::ProtocolViolation,
                msg: format!("unknown SOCKS5 address type {atyp:#04x}"),
            });
        }
    };

    let mut bound_addr = vec![0u8; addr_len + 2]; // + BND.PORT
    stream
        .read_exact(&mut bound_addr)
        .await
        .map_err(Error::Io)?;

    match reply_head[1] {
        0x00 => Ok(()),
        0x02 => Err(Error::ProxyError {
            kind: ProxyErrorKind::Rejected,
            msg: "SOCKS5: connection not allowed by ruleset".to_string(),
        }),
        0x03 => Err(Error::ProxyError {
            kind: ProxyErrorKind::HostUnreachable,
            msg: "SOCKS5: network unreachable".to_string(),
        }),
        0x04 => Err(Error::ProxyError {
            kind: ProxyErrorKind::HostUnreachable,
            msg: "SOCKS5: host unreachable".to_string(),
        }),
        0x05 => Err(Error::ProxyError {
            kind: ProxyErrorKind::Rejected,
            msg: "SOCKS5: connection refused by destination".to_string(),
        }),
        code => Err(Error::ProxyError {
            kind: ProxyErrorKind::ProtocolViolation,
            msg: format!("SOCKS5 CONNECT failed with reply code {code:#04x}"),
        }),
    }
}

async fn socks5_userpass_auth<S>(stream: &mut S, config: &ProxyConfig) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let creds = config.credentials.as_ref().ok_or_else(|| Error::ProxyError {
        kind: ProxyErrorKind::AuthRequired,
        msg: "SOCKS5 server requires username/password authentication".to_string(),
    })?;

    let mut request = vec![0x01]; // auth sub-negotiation version
    request.push(u8::try_from(creds.username.len()).unwrap_or(0));
    request.extend_from_slice(creds.username.as_bytes());
    request.push(u8::try_from(creds.password.len()).unwrap_or(0));
    request.extend_from_slice(creds.password.as_bytes());

    stream.write_all(&request).await.map_err(Error::Io)?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.map_err(Error::Io)?;

    if reply[1] != 0x00 {
        return Err(Error::ProxyError {
            kind: ProxyErrorKind::AuthFailed,
            msg: "SOCKS5 username/password authentication rejected".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn http_connect_succeeds_on_200() {
        let (mut client, mut server) = duplex(4096);
        let config = ProxyConfig::new(ProxyKind::Http, "proxy.example.com", 8080);

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let n = server.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("CONNECT "));
            server
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
        });

        connect_through_proxy(&mut client, &config, "imap.example.com", 993)
            .await
            .unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn http_connect_rejects_non_2xx() {
        let (mut client, mut server) = duplex(4096);
        let config = ProxyConfig::new(ProxyKind::Http, "proxy.example.com", 8080);

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
        });

        let err = connect_through_proxy(&mut client, &config, "imap.example.com", 993)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyError { kind: ProxyErrorKind::Rejected, .. }));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn socks4_connect_succeeds_on_grant() {
        let (mut client, mut server) = duplex(4096);
        let config = ProxyConfig::new(ProxyKind::Socks4a, "proxy.example.com", 1080);

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(buf[0], 0x04);
            assert_eq!(buf[1], 0x01);
            server
                .write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            let _ = n;
        });

        connect_through_proxy(&mut client, &config, "imap.example.com", 993)
            .await
            .unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn socks5_connect_succeeds_without_auth() {
        let (mut client, mut server) = duplex(4096);
        let config = ProxyConfig::new(ProxyKind::Socks5, "proxy.example.com", 1080);

        let server_task = tokio::spawn(async move {
            let mut greeting = [0u8; 2];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01]);
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..3], &[0x05, 0x01, 0x00]);
            // ATYP + address + port is variable length; drain the rest.
            let mut rest = vec![0u8; 64];
            let n = server.read(&mut rest).await.unwrap();
            let _ = n;

            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        connect_through_proxy(&mut client, &config, "imap.example.com", 993)
            .await
            .unwrap();
        server_task.await.unwrap();
    }
}
