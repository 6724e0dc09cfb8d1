use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HOST, USER_AGENT};
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};

use crate::error::{ProxyBenchError, TrialError, TrialFailure};
use crate::http::socks5::{self, Credentials, TargetAddr};
use crate::http::stream::FirstByteStream;
use crate::http::timing::{derive_socks5_handshake, PhaseCollector, PhaseTimings};

/// Display name used for clients that talk to the target without a proxy.
pub const DIRECT_CONNECTION_NAME: &str = "Direct Connection";

const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";

// ---------------------------------------------------------------------------
// RequestExecutor
// ---------------------------------------------------------------------------

/// Performs one measured round trip per call.
///
/// Implementations hold no run-scoped mutable state, so a single instance can
/// be shared by every worker of a run.
pub trait RequestExecutor: Send + Sync + 'static {
    /// Display name recorded on every run driven through this executor.
    fn name(&self) -> &str;

    /// Issue a single GET against `target_url`. Never retries.
    ///
    /// Failures still carry the timing captured up to the point of failure,
    /// with `total` always populated.
    fn execute(
        &self,
        target_url: &str,
    ) -> impl Future<Output = Result<PhaseTimings, TrialFailure>> + Send;
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A `host:port` pair, as written in proxy definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `host:port` or `[v6]:port`.
    pub fn parse(addr: &str) -> Result<Self, ProxyBenchError> {
        let addr = addr.trim();
        let invalid = || ProxyBenchError::Validation(format!("invalid host:port address: {addr:?}"));

        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            addr.rsplit_once(':').ok_or_else(invalid)?
        };
        if host.is_empty() || (host.contains(':') && !addr.starts_with('[')) {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The parts of a target URL the dial chain needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    /// Bare host, IPv6 brackets removed.
    host: String,
    port: u16,
    tls: bool,
    /// Value for the `Host` header.
    authority: String,
    path_and_query: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, TrialError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| TrialError::InvalidTarget(format!("{url}: {e}")))?;

        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(TrialError::InvalidTarget(format!(
                    "{url}: unsupported scheme {other:?}"
                )))
            }
        };
        let raw_host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TrialError::InvalidTarget(format!("{url}: missing host")))?;
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        let authority = match uri.port_u16() {
            Some(port) => format!("{raw_host}:{port}"),
            None => raw_host.to_string(),
        };
        let path_and_query = uri
            .path_and_query()
            .map(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/")
            .to_string();

        Ok(Self {
            host: raw_host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            tls,
            authority,
            path_and_query,
        })
    }
}

// ---------------------------------------------------------------------------
// ProxyClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Route {
    Direct,
    Socks5 {
        proxy: Endpoint,
        credentials: Option<Credentials>,
    },
}

/// Phase-instrumented HTTP client that dials through a SOCKS5 proxy or
/// straight to the target.
///
/// Every call opens a fresh TCP connection (and a fresh SOCKS5 and TLS
/// handshake where applicable). Pooled connections would zero out the
/// connect and handshake phases, so nothing is ever reused.
///
/// TLS certificates and host names are not verified: the client measures
/// latency, not trust.
pub struct ProxyClient {
    name: String,
    route: Route,
    timeout: Duration,
    user_agent: String,
    resolve_target_locally: bool,
    tls: tokio_native_tls::TlsConnector,
}

/// Builder for [`ProxyClient`].
pub struct ProxyClientBuilder {
    name: Option<String>,
    route: Route,
    timeout: Duration,
    user_agent: String,
    resolve_target_locally: bool,
}

impl Default for ProxyClientBuilder {
    fn default() -> Self {
        Self {
            name: None,
            route: Route::Direct,
            timeout: Duration::from_secs(10),
            user_agent: format!("proxybench/{}", env!("CARGO_PKG_VERSION")),
            resolve_target_locally: false,
        }
    }
}

impl ProxyClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tunnel every request through the SOCKS5 proxy at `proxy`.
    pub fn socks5(mut self, proxy: Endpoint) -> Self {
        let credentials = match &self.route {
            Route::Socks5 { credentials, .. } => credentials.clone(),
            Route::Direct => None,
        };
        self.route = Route::Socks5 { proxy, credentials };
        self
    }

    /// Username/password for the proxy. Ignored in direct mode.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        if let Route::Socks5 { credentials, .. } = &mut self.route {
            *credentials = Some(Credentials {
                username: username.into(),
                password: password.into(),
            });
        }
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Deadline for one whole round trip, dial included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    /// Resolve the target host locally and send the proxy an IP instead of
    /// a domain name. Makes `target_dns_lookup` observable in proxy mode.
    pub fn resolve_target_locally(mut self, enabled: bool) -> Self {
        self.resolve_target_locally = enabled;
        self
    }

    pub fn build(self) -> Result<ProxyClient, ProxyBenchError> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        let name = self.name.unwrap_or_else(|| match &self.route {
            Route::Direct => DIRECT_CONNECTION_NAME.to_string(),
            Route::Socks5 { proxy, .. } => format!("socks5://{proxy}"),
        });

        Ok(ProxyClient {
            name,
            route: self.route,
            timeout: self.timeout,
            user_agent: self.user_agent,
            resolve_target_locally: self.resolve_target_locally,
            tls: tokio_native_tls::TlsConnector::from(connector),
        })
    }
}

impl ProxyClient {
    pub fn builder() -> ProxyClientBuilder {
        ProxyClientBuilder::new()
    }

    /// A client without a proxy, named [`DIRECT_CONNECTION_NAME`].
    pub fn direct(timeout: Duration) -> Result<Self, ProxyBenchError> {
        ProxyClientBuilder::new().timeout(timeout).build()
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.route, Route::Direct)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn measure(&self, target_url: &str) -> Result<PhaseTimings, TrialFailure> {
        let mut collector = PhaseCollector::start();
        let outcome =
            match tokio::time::timeout(self.timeout, self.round_trip(target_url, &mut collector))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TrialError::Timeout(self.timeout)),
            };
        collector.finish(outcome)
    }

    async fn round_trip(
        &self,
        target_url: &str,
        collector: &mut PhaseCollector,
    ) -> Result<u16, TrialError> {
        let target = Target::parse(target_url)?;
        let request = self.build_request(&target)?;

        let stream = match &self.route {
            Route::Direct => dial_direct(&target, collector).await?,
            Route::Socks5 { proxy, credentials } => {
                self.dial_socks5(proxy, credentials.as_ref(), &target, collector)
                    .await?
            }
        };

        let slot = collector.first_byte_slot();
        if target.tls {
            let started = Instant::now();
            let handshake = self.tls.connect(&target.host, stream).await;
            collector.tls_handshake = started.elapsed();
            let stream = handshake.map_err(|e| TrialError::Tls(e.to_string()))?;
            exchange(FirstByteStream::new(stream, slot), request).await
        } else {
            exchange(FirstByteStream::new(stream, slot), request).await
        }
    }

    /// Open the tunnel: proxy DNS, proxy TCP connect, then SOCKS5
    /// negotiation. The negotiation time is derived from the combined dial
    /// span rather than timed on its own.
    async fn dial_socks5(
        &self,
        proxy: &Endpoint,
        credentials: Option<&Credentials>,
        target: &Target,
        collector: &mut PhaseCollector,
    ) -> Result<TcpStream, TrialError> {
        let destination = if self.resolve_target_locally {
            let addrs = resolve(&target.host, target.port, &mut collector.target_dns_lookup).await?;
            TargetAddr::Ip(first_addr(&addrs, &target.host)?)
        } else {
            TargetAddr::from_host(&target.host, target.port)
        };

        let dial_started = Instant::now();
        let proxy_addrs = resolve(&proxy.host, proxy.port, &mut collector.proxy_dns).await?;
        let mut stream = connect_any(&proxy_addrs, &mut collector.proxy_tcp_connect).await?;
        let negotiated = socks5::negotiate(&mut stream, &destination, credentials).await;
        let dial = dial_started.elapsed();

        collector.socks5_handshake =
            derive_socks5_handshake(dial, collector.proxy_tcp_connect, collector.proxy_dns);
        negotiated?;
        collector.target_tcp_connect = dial;
        Ok(stream)
    }

    fn build_request(&self, target: &Target) -> Result<Request<Empty<Bytes>>, TrialError> {
        Request::builder()
            .method(Method::GET)
            .uri(target.path_and_query.as_str())
            .header(HOST, target.authority.as_str())
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, ACCEPT_VALUE)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .header(CONNECTION, "close")
            .body(Empty::new())
            .map_err(|e| TrialError::InvalidTarget(e.to_string()))
    }
}

impl RequestExecutor for ProxyClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        target_url: &str,
    ) -> impl Future<Output = Result<PhaseTimings, TrialFailure>> + Send {
        self.measure(target_url)
    }
}

// ---------------------------------------------------------------------------
// Dial helpers
// ---------------------------------------------------------------------------

async fn dial_direct(target: &Target, collector: &mut PhaseCollector) -> Result<TcpStream, TrialError> {
    let addrs = resolve(&target.host, target.port, &mut collector.target_dns_lookup).await?;
    connect_any(&addrs, &mut collector.target_tcp_connect).await
}

/// Resolve `host`, recording the lookup time into `elapsed`. Literal IPs are
/// returned as-is and leave `elapsed` at zero.
async fn resolve(host: &str, port: u16, elapsed: &mut Duration) -> Result<Vec<SocketAddr>, TrialError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let started = Instant::now();
    let lookup = lookup_host((host, port)).await;
    *elapsed = started.elapsed();

    let addrs: Vec<SocketAddr> = lookup
        .map_err(|e| TrialError::Connection(format!("DNS lookup for {host} failed: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(TrialError::Connection(format!(
            "DNS lookup for {host} returned no addresses"
        )));
    }
    Ok(addrs)
}

fn first_addr(addrs: &[SocketAddr], host: &str) -> Result<SocketAddr, TrialError> {
    addrs
        .first()
        .copied()
        .ok_or_else(|| TrialError::Connection(format!("no address for {host}")))
}

/// Connect to the first reachable address. The recorded time spans every
/// attempt.
async fn connect_any(addrs: &[SocketAddr], elapsed: &mut Duration) -> Result<TcpStream, TrialError> {
    let started = Instant::now();
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                *elapsed = started.elapsed();
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_error = Some(format!("connect to {addr} failed: {e}")),
        }
    }
    *elapsed = started.elapsed();
    Err(TrialError::Connection(
        last_error.unwrap_or_else(|| "no address to connect to".to_string()),
    ))
}

/// Send the request over a fresh HTTP/1.1 connection and return the status.
///
/// The clock stops when the response head arrives; the body is discarded
/// with the connection.
async fn exchange<S>(io: S, request: Request<Empty<Bytes>>) -> Result<u16, TrialError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = http1::handshake::<_, Empty<Bytes>>(TokioIo::new(io))
        .await
        .map_err(|e| TrialError::Connection(e.to_string()))?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("connection closed with error: {e}");
        }
    });

    let response = sender.send_request(request).await;
    driver.abort();

    let response = response.map_err(|e| TrialError::Connection(e.to_string()))?;
    Ok(response.status().as_u16())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
