//! Client side of SOCKS5 (RFC 1928) with username/password
//! sub-negotiation (RFC 1929).

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TrialError;

const VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Username/password pair for RFC 1929 authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Destination carried in the CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Already resolved; the proxy connects without a lookup.
    Ip(SocketAddr),
    /// Resolved remotely by the proxy.
    Domain(String, u16),
}

impl TargetAddr {
    /// Literal IPs become [`TargetAddr::Ip`], anything else is sent as a
    /// domain name.
    pub fn from_host(host: &str, port: u16) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(_) => TargetAddr::Domain(host.to_string(), port),
        }
    }
}

/// Run the full negotiation over an open connection to the proxy: method
/// selection, optional authentication, then CONNECT. On return the stream is
/// a tunnel to `target`.
pub async fn negotiate<S>(
    stream: &mut S,
    target: &TargetAddr,
    credentials: Option<&Credentials>,
) -> Result<(), TrialError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&greeting(credentials))
        .await
        .map_err(handshake_io)?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(handshake_io)?;
    if choice[0] != VERSION {
        return Err(TrialError::Handshake(format!(
            "unexpected SOCKS version {:#04x} in method selection",
            choice[0]
        )));
    }

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USER_PASS, Some(creds)) => authenticate(stream, creds).await?,
        (METHOD_USER_PASS, None) => {
            return Err(TrialError::Handshake(
                "proxy requires username/password authentication".to_string(),
            ))
        }
        (METHOD_NONE_ACCEPTABLE, _) => {
            return Err(TrialError::Handshake(
                "proxy accepted none of the offered authentication methods".to_string(),
            ))
        }
        (other, _) => {
            return Err(TrialError::Handshake(format!(
                "proxy selected unsupported method {other:#04x}"
            )))
        }
    }

    stream
        .write_all(&connect_request(target)?)
        .await
        .map_err(handshake_io)?;
    read_connect_reply(stream).await
}

async fn authenticate<S>(stream: &mut S, credentials: &Credentials) -> Result<(), TrialError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&auth_request(credentials)?)
        .await
        .map_err(handshake_io)?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.map_err(handshake_io)?;
    if status[1] != 0x00 {
        return Err(TrialError::Handshake(format!(
            "authentication rejected (status {:#04x})",
            status[1]
        )));
    }
    Ok(())
}

async fn read_connect_reply<S>(stream: &mut S) -> Result<(), TrialError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(handshake_io)?;
    if header[0] != VERSION {
        return Err(TrialError::Handshake(format!(
            "unexpected SOCKS version {:#04x} in CONNECT reply",
            header[0]
        )));
    }
    if header[1] != 0x00 {
        return Err(reply_error(header[1]));
    }

    // Bound address and port; the value itself is not needed.
    let remaining = match header[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(handshake_io)?;
            len[0] as usize + 2
        }
        other => {
            return Err(TrialError::Handshake(format!(
                "unknown address type {other:#04x} in CONNECT reply"
            )))
        }
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await.map_err(handshake_io)?;
    Ok(())
}

fn greeting(credentials: Option<&Credentials>) -> Vec<u8> {
    match credentials {
        Some(_) => vec![VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS],
        None => vec![VERSION, 1, METHOD_NO_AUTH],
    }
}

fn auth_request(credentials: &Credentials) -> Result<Vec<u8>, TrialError> {
    let user = credentials.username.as_bytes();
    let pass = credentials.password.as_bytes();
    let user_len = u8::try_from(user.len())
        .map_err(|_| TrialError::Handshake("username longer than 255 bytes".to_string()))?;
    let pass_len = u8::try_from(pass.len())
        .map_err(|_| TrialError::Handshake("password longer than 255 bytes".to_string()))?;

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(AUTH_VERSION);
    request.push(user_len);
    request.extend_from_slice(user);
    request.push(pass_len);
    request.extend_from_slice(pass);
    Ok(request)
}

fn connect_request(target: &TargetAddr) -> Result<Vec<u8>, TrialError> {
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    let port = match target {
        TargetAddr::Ip(addr) => {
            match addr.ip() {
                IpAddr::V4(ip) => {
                    request.push(ATYP_IPV4);
                    request.extend_from_slice(&ip.octets());
                }
                IpAddr::V6(ip) => {
                    request.push(ATYP_IPV6);
                    request.extend_from_slice(&ip.octets());
                }
            }
            addr.port()
        }
        TargetAddr::Domain(host, port) => {
            let len = u8::try_from(host.len()).map_err(|_| {
                TrialError::InvalidTarget(format!("host name longer than 255 bytes: {host}"))
            })?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
            *port
        }
    };
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// Map a non-zero CONNECT reply code. Codes describing the proxy's own
/// attempt to reach the target are connection failures; the rest are
/// negotiation failures.
fn reply_error(code: u8) -> TrialError {
    let reason = match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    };
    let message = format!("proxy replied {code:#04x}: {reason}");
    match code {
        0x03..=0x05 => TrialError::Connection(message),
        _ => TrialError::Handshake(message),
    }
}

fn handshake_io(err: std::io::Error) -> TrialError {
    TrialError::Handshake(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            username: user.to_string(),
            password: pass.to_string(),
        }
    }

    #[test]
    fn target_from_literal_ip_is_not_sent_as_domain() {
        assert_eq!(
            TargetAddr::from_host("10.0.0.7", 443),
            TargetAddr::Ip("10.0.0.7:443".parse().unwrap())
        );
        assert_eq!(
            TargetAddr::from_host("::1", 80),
            TargetAddr::Ip("[::1]:80".parse().unwrap())
        );
        assert_eq!(
            TargetAddr::from_host("example.com", 80),
            TargetAddr::Domain("example.com".to_string(), 80)
        );
    }

    #[test]
    fn greeting_offers_user_pass_only_with_credentials() {
        assert_eq!(greeting(None), vec![0x05, 0x01, 0x00]);
        assert_eq!(greeting(Some(&creds("u", "p"))), vec![0x05, 0x02, 0x00, 0x02]);
    }

    #[test]
    fn auth_request_layout() {
        let req = auth_request(&creds("bob", "pw")).unwrap();
        assert_eq!(req, vec![0x01, 3, b'b', b'o', b'b', 2, b'p', b'w']);
    }

    #[test]
    fn auth_request_rejects_oversized_fields() {
        let long = "x".repeat(256);
        assert!(matches!(
            auth_request(&creds(&long, "p")),
            Err(TrialError::Handshake(_))
        ));
    }

    #[test]
    fn connect_request_domain_layout() {
        let req = connect_request(&TargetAddr::Domain("a.io".to_string(), 443)).unwrap();
        assert_eq!(
            req,
            vec![0x05, 0x01, 0x00, 0x03, 4, b'a', b'.', b'i', b'o', 0x01, 0xBB]
        );
    }

    #[test]
    fn connect_request_ipv4_layout() {
        let req = connect_request(&TargetAddr::Ip("1.2.3.4:80".parse().unwrap())).unwrap();
        assert_eq!(req, vec![0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x00, 0x50]);
    }

    #[test]
    fn connect_request_ipv6_uses_atyp_4() {
        let req = connect_request(&TargetAddr::Ip("[::1]:8080".parse().unwrap())).unwrap();
        assert_eq!(req[3], 0x04);
        assert_eq!(req.len(), 4 + 16 + 2);
    }

    #[test]
    fn reply_codes_are_classified() {
        assert!(matches!(reply_error(0x05), TrialError::Connection(_)));
        assert!(matches!(reply_error(0x04), TrialError::Connection(_)));
        assert!(matches!(reply_error(0x02), TrialError::Handshake(_)));
        assert!(matches!(reply_error(0x07), TrialError::Handshake(_)));
        assert!(reply_error(0x05).to_string().contains("connection refused"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let debug = format!("{:?}", creds("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn negotiate_without_auth() {
        let (mut client, mut proxy) = duplex(256);
        let server = tokio::spawn(async move {
            let mut hello = [0u8; 3];
            proxy.read_exact(&mut hello).await.unwrap();
            assert_eq!(hello, [0x05, 0x01, 0x00]);
            proxy.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 5];
            proxy.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[0x05, 0x01, 0x00, 0x03]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            proxy.read_exact(&mut rest).await.unwrap();
            assert_eq!(&rest[..head[4] as usize], b"example.com");

            // Reply with a domain-typed bound address to exercise that path.
            proxy
                .write_all(&[0x05, 0x00, 0x00, 0x03, 2, b'h', b'p', 0x00, 0x01])
                .await
                .unwrap();
        });

        let target = TargetAddr::Domain("example.com".to_string(), 80);
        negotiate(&mut client, &target, None).await.expect("handshake should succeed");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn negotiate_with_auth() {
        let (mut client, mut proxy) = duplex(256);
        let server = tokio::spawn(async move {
            let mut hello = [0u8; 4];
            proxy.read_exact(&mut hello).await.unwrap();
            proxy.write_all(&[0x05, 0x02]).await.unwrap();

            let mut auth = [0u8; 8];
            proxy.read_exact(&mut auth).await.unwrap();
            assert_eq!(auth, [0x01, 3, b'b', b'o', b'b', 2, b'p', b'w']);
            proxy.write_all(&[0x01, 0x00]).await.unwrap();

            let mut connect = [0u8; 10];
            proxy.read_exact(&mut connect).await.unwrap();
            proxy
                .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
                .await
                .unwrap();
        });

        let target = TargetAddr::Ip("10.1.1.1:443".parse().unwrap());
        negotiate(&mut client, &target, Some(&creds("bob", "pw")))
            .await
            .expect("authenticated handshake should succeed");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_auth_is_a_handshake_error() {
        let (mut client, mut proxy) = duplex(256);
        tokio::spawn(async move {
            let mut hello = [0u8; 4];
            proxy.read_exact(&mut hello).await.unwrap();
            proxy.write_all(&[0x05, 0x02]).await.unwrap();
            let mut auth = [0u8; 8];
            proxy.read_exact(&mut auth).await.unwrap();
            proxy.write_all(&[0x01, 0x01]).await.unwrap();
        });

        let target = TargetAddr::Domain("example.com".to_string(), 80);
        let err = negotiate(&mut client, &target, Some(&creds("bob", "pw")))
            .await
            .unwrap_err();
        assert!(matches!(err, TrialError::Handshake(ref m) if m.contains("rejected")));
    }

    #[tokio::test]
    async fn auth_demanded_without_credentials_fails() {
        let (mut client, mut proxy) = duplex(256);
        tokio::spawn(async move {
            let mut hello = [0u8; 3];
            proxy.read_exact(&mut hello).await.unwrap();
            proxy.write_all(&[0x05, 0x02]).await.unwrap();
        });

        let target = TargetAddr::Domain("example.com".to_string(), 80);
        let err = negotiate(&mut client, &target, None).await.unwrap_err();
        assert!(matches!(err, TrialError::Handshake(_)));
    }

    #[tokio::test]
    async fn refused_connect_is_a_connection_error() {
        let (mut client, mut proxy) = duplex(256);
        tokio::spawn(async move {
            let mut hello = [0u8; 3];
            proxy.read_exact(&mut hello).await.unwrap();
            proxy.write_all(&[0x05, 0x00]).await.unwrap();
            let mut connect = [0u8; 10];
            proxy.read_exact(&mut connect).await.unwrap();
            proxy.write_all(&[0x05, 0x05, 0x00, 0x01]).await.unwrap();
        });

        let target = TargetAddr::Ip("10.0.0.1:80".parse().unwrap());
        let err = negotiate(&mut client, &target, None).await.unwrap_err();
        assert!(matches!(err, TrialError::Connection(_)));
    }

    #[tokio::test]
    async fn proxy_closing_early_is_a_handshake_error() {
        let (mut client, proxy) = duplex(256);
        drop(proxy);
        let target = TargetAddr::Domain("example.com".to_string(), 80);
        let err = negotiate(&mut client, &target, None).await.unwrap_err();
        assert!(matches!(err, TrialError::Handshake(_)));
    }
}
