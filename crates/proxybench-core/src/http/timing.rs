use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{TrialError, TrialFailure};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One named, causally ordered slice of a request's end-to-end latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ProxyDns,
    ProxyTcpConnect,
    Socks5Handshake,
    TargetDnsLookup,
    TargetTcpConnect,
    TlsHandshake,
    TimeToFirstByte,
    Total,
}

impl Phase {
    /// Every phase, in causal order.
    pub const ALL: [Phase; 8] = [
        Phase::ProxyDns,
        Phase::ProxyTcpConnect,
        Phase::Socks5Handshake,
        Phase::TargetDnsLookup,
        Phase::TargetTcpConnect,
        Phase::TlsHandshake,
        Phase::TimeToFirstByte,
        Phase::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ProxyDns => "proxy_dns",
            Phase::ProxyTcpConnect => "proxy_tcp_connect",
            Phase::Socks5Handshake => "socks5_handshake",
            Phase::TargetDnsLookup => "target_dns_lookup",
            Phase::TargetTcpConnect => "target_tcp_connect",
            Phase::TlsHandshake => "tls_handshake",
            Phase::TimeToFirstByte => "time_to_first_byte",
            Phase::Total => "total",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PhaseTimings
// ---------------------------------------------------------------------------

/// The completed timing record of a single trial.
///
/// Phases that were not observed (DNS for a literal IP, target DNS performed
/// remotely by the proxy, TLS for plain HTTP) are zero rather than absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PhaseTimings {
    pub proxy_dns: Duration,
    pub proxy_tcp_connect: Duration,
    /// Derived by subtraction, see [`derive_socks5_handshake`].
    pub socks5_handshake: Duration,
    pub target_dns_lookup: Duration,
    /// Direct mode: the TCP connect to the target. Proxy mode: the whole
    /// tunnel establishment, from dial start to the SOCKS5 CONNECT reply.
    pub target_tcp_connect: Duration,
    pub tls_handshake: Duration,
    /// Measured from request issuance, not from the end of the handshake.
    pub time_to_first_byte: Duration,
    /// Always populated, also on failure.
    pub total: Duration,
    pub success: bool,
    /// `0` when no response was received.
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PhaseTimings {
    pub fn get(&self, phase: Phase) -> Duration {
        match phase {
            Phase::ProxyDns => self.proxy_dns,
            Phase::ProxyTcpConnect => self.proxy_tcp_connect,
            Phase::Socks5Handshake => self.socks5_handshake,
            Phase::TargetDnsLookup => self.target_dns_lookup,
            Phase::TargetTcpConnect => self.target_tcp_connect,
            Phase::TlsHandshake => self.tls_handshake,
            Phase::TimeToFirstByte => self.time_to_first_byte,
            Phase::Total => self.total,
        }
    }
}

/// Whether a status code counts as a successful trial.
pub fn is_success_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Approximate the SOCKS5 negotiation time from the combined dial span.
///
/// The negotiation is not timestamped at byte granularity: it is whatever is
/// left of the dial after proxy DNS and proxy TCP connect, clamped at zero
/// so clock jitter between the sub-measurements never yields a negative
/// value.
pub fn derive_socks5_handshake(
    dial: Duration,
    proxy_tcp_connect: Duration,
    proxy_dns: Duration,
) -> Duration {
    dial.saturating_sub(proxy_tcp_connect)
        .saturating_sub(proxy_dns)
}

// ---------------------------------------------------------------------------
// PhaseCollector
// ---------------------------------------------------------------------------

/// Mutable per-trial timing state, passed explicitly down the dial chain.
///
/// Each invocation of the client allocates its own collector; nothing in it
/// is shared between trials.
#[derive(Debug)]
pub struct PhaseCollector {
    started: Instant,
    pub(crate) proxy_dns: Duration,
    pub(crate) proxy_tcp_connect: Duration,
    pub(crate) socks5_handshake: Duration,
    pub(crate) target_dns_lookup: Duration,
    pub(crate) target_tcp_connect: Duration,
    pub(crate) tls_handshake: Duration,
    first_byte: Arc<OnceLock<Instant>>,
}

impl PhaseCollector {
    /// Start the clock. Request issuance is the reference point for both
    /// TTFB and total.
    pub fn start() -> Self {
        Self::started_at(Instant::now())
    }

    fn started_at(started: Instant) -> Self {
        Self {
            started,
            proxy_dns: Duration::ZERO,
            proxy_tcp_connect: Duration::ZERO,
            socks5_handshake: Duration::ZERO,
            target_dns_lookup: Duration::ZERO,
            target_tcp_connect: Duration::ZERO,
            tls_handshake: Duration::ZERO,
            first_byte: Arc::new(OnceLock::new()),
        }
    }

    /// Handle given to the stream wrapper that observes the first response
    /// byte. Only the first write wins.
    pub fn first_byte_slot(&self) -> Arc<OnceLock<Instant>> {
        Arc::clone(&self.first_byte)
    }

    /// Stop the clock and turn the collected phases into a trial record.
    ///
    /// `outcome` is the response status, or the error that prevented one.
    pub fn finish(self, outcome: Result<u16, TrialError>) -> Result<PhaseTimings, TrialFailure> {
        let total = self.started.elapsed();
        let time_to_first_byte = self
            .first_byte
            .get()
            .map(|at| at.saturating_duration_since(self.started).min(total))
            .unwrap_or_default();

        let mut timings = PhaseTimings {
            proxy_dns: self.proxy_dns,
            proxy_tcp_connect: self.proxy_tcp_connect,
            socks5_handshake: self.socks5_handshake,
            target_dns_lookup: self.target_dns_lookup,
            target_tcp_connect: self.target_tcp_connect,
            tls_handshake: self.tls_handshake,
            time_to_first_byte,
            total,
            success: false,
            status_code: 0,
            error_message: None,
        };

        let error = match outcome {
            Ok(status) if is_success_status(status) => {
                timings.status_code = status;
                timings.success = true;
                return Ok(timings);
            }
            Ok(status) => {
                timings.status_code = status;
                TrialError::HttpStatus(status)
            }
            Err(error) => error,
        };

        timings.error_message = Some(error.to_string());
        Err(TrialFailure { timings, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_are_stable() {
        let names: Vec<&str> = Phase::ALL.iter().map(Phase::as_str).collect();
        assert_eq!(
            names,
            [
                "proxy_dns",
                "proxy_tcp_connect",
                "socks5_handshake",
                "target_dns_lookup",
                "target_tcp_connect",
                "tls_handshake",
                "time_to_first_byte",
                "total",
            ]
        );
    }

    #[test]
    fn phase_serializes_as_snake_case() {
        let json = serde_json::to_string(&Phase::TimeToFirstByte).unwrap();
        assert_eq!(json, "\"time_to_first_byte\"");
    }

    #[test]
    fn get_reads_the_matching_field() {
        let timings = PhaseTimings {
            proxy_dns: Duration::from_millis(1),
            tls_handshake: Duration::from_millis(6),
            total: Duration::from_millis(9),
            ..Default::default()
        };
        assert_eq!(timings.get(Phase::ProxyDns), Duration::from_millis(1));
        assert_eq!(timings.get(Phase::TlsHandshake), Duration::from_millis(6));
        assert_eq!(timings.get(Phase::Total), Duration::from_millis(9));
        assert_eq!(timings.get(Phase::TargetDnsLookup), Duration::ZERO);
    }

    #[test]
    fn success_range_is_half_open() {
        assert!(!is_success_status(199));
        assert!(is_success_status(200));
        assert!(is_success_status(302));
        assert!(is_success_status(399));
        assert!(!is_success_status(400));
        assert!(!is_success_status(0));
    }

    #[test]
    fn handshake_is_dial_minus_proxy_phases() {
        let derived = derive_socks5_handshake(
            Duration::from_millis(50),
            Duration::from_millis(20),
            Duration::from_millis(5),
        );
        assert_eq!(derived, Duration::from_millis(25));
    }

    #[test]
    fn handshake_never_goes_negative() {
        // Sub-measurements can exceed the enclosing span by clock jitter.
        let derived = derive_socks5_handshake(
            Duration::from_micros(900),
            Duration::from_millis(1),
            Duration::from_micros(300),
        );
        assert_eq!(derived, Duration::ZERO);

        let derived = derive_socks5_handshake(Duration::ZERO, Duration::MAX, Duration::MAX);
        assert_eq!(derived, Duration::ZERO);
    }

    #[test]
    fn finish_success_keeps_status_and_phases() {
        let mut collector = PhaseCollector::start();
        collector.target_tcp_connect = Duration::from_millis(3);
        let timings = collector.finish(Ok(204)).expect("204 is a success");
        assert!(timings.success);
        assert_eq!(timings.status_code, 204);
        assert_eq!(timings.target_tcp_connect, Duration::from_millis(3));
        assert!(timings.error_message.is_none());
        assert!(timings.total >= timings.time_to_first_byte);
    }

    #[test]
    fn finish_bad_status_is_a_failure_with_status() {
        let collector = PhaseCollector::start();
        let failure = collector.finish(Ok(503)).unwrap_err();
        assert_eq!(failure.error, TrialError::HttpStatus(503));
        assert!(!failure.timings.success);
        assert_eq!(failure.timings.status_code, 503);
        assert_eq!(failure.timings.error_message.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn finish_network_error_keeps_partial_phases_and_total() {
        let started = Instant::now() - Duration::from_millis(40);
        let mut collector = PhaseCollector::started_at(started);
        collector.proxy_tcp_connect = Duration::from_millis(12);
        let failure = collector
            .finish(Err(TrialError::Connection("reset".to_string())))
            .unwrap_err();
        assert_eq!(failure.timings.status_code, 0);
        assert_eq!(failure.timings.proxy_tcp_connect, Duration::from_millis(12));
        assert!(failure.timings.total >= Duration::from_millis(40));
        assert!(failure
            .timings
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("reset")));
    }

    #[test]
    fn first_byte_slot_sets_ttfb_once() {
        let started = Instant::now() - Duration::from_millis(30);
        let collector = PhaseCollector::started_at(started);
        let slot = collector.first_byte_slot();
        let first = started + Duration::from_millis(10);
        assert!(slot.set(first).is_ok());
        assert!(slot.set(started + Duration::from_millis(20)).is_err());

        let timings = collector.finish(Ok(200)).unwrap();
        assert_eq!(timings.time_to_first_byte, Duration::from_millis(10));
    }

    #[test]
    fn unobserved_first_byte_leaves_ttfb_zero() {
        let timings = PhaseCollector::start()
            .finish(Err(TrialError::Timeout(Duration::from_secs(1))))
            .unwrap_err()
            .timings;
        assert_eq!(timings.time_to_first_byte, Duration::ZERO);
    }
}
