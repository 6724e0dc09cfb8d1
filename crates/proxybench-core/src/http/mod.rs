pub mod client;
pub mod socks5;
pub mod stream;
pub mod timing;

pub use client::{Endpoint, ProxyClient, ProxyClientBuilder, RequestExecutor, DIRECT_CONNECTION_NAME};
pub use socks5::{Credentials, TargetAddr};
pub use timing::{derive_socks5_handshake, Phase, PhaseCollector, PhaseTimings};
