//! One client [`quinn::Endpoint`] shared across origins, with a cached H3
//! connection (and hence 0-RTT session ticket) per `(host, port)`. Mirrors
//! the shape of `crates/mesio/src/downloader/client.rs`'s `ClientPool`, but
//! keyed on origin rather than protocol.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use h3::client::SendRequest;
use h3_quinn::OpenStreams;
use parking_lot::Mutex;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Endpoint, TransportConfig};
use rustls::ClientConfig as RustlsClientConfig;
use tracing::{debug, instrument};

use crate::error::{DashBetaError, Result};
use crate::quic::InsecureServerVerifier;

/// A connection origin: scheme is always implicitly `https` over QUIC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub host: Arc<str>,
    pub port: u16,
}

impl Origin {
    pub fn from_url(url: &url::Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| DashBetaError::protocol("URL has no host"))?;
        Ok(Self {
            host: Arc::from(host),
            port: url.port_or_known_default().unwrap_or(443),
        })
    }
}

struct CachedConnection {
    send_request: SendRequest<OpenStreams, bytes::Bytes>,
}

/// Hands out an H3 `SendRequest` per origin, reusing the underlying QUIC
/// connection (and its session ticket cache) across segment requests to the
/// same host. Connections are established lazily on first use.
pub struct ConnectionPool {
    endpoint: Endpoint,
    connections: Mutex<HashMap<Origin, Arc<CachedConnection>>>,
    connect_timeout: std::time::Duration,
}

impl ConnectionPool {
    pub fn new(connect_timeout: std::time::Duration) -> Result<Self> {
        let mut endpoint = Endpoint::client("[::]:0".parse().unwrap())
            .or_else(|_| Endpoint::client("0.0.0.0:0".parse().unwrap()))
            .map_err(DashBetaError::from)?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let verifier = InsecureServerVerifier::new(&provider);
        let mut rustls_config = RustlsClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|error| DashBetaError::protocol(format!("unsupported TLS versions: {error}")))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        rustls_config.alpn_protocols = vec![b"h3".to_vec()];
        // Session ticket resumption across connections to the same origin
        // ('s 0-RTT requirement) falls out of rustls's default
        // client session storage, which is shared by this one `ClientConfig`.

        let quic_crypto = QuicClientConfig::try_from(rustls_config)
            .map_err(|error| DashBetaError::protocol(format!("invalid QUIC TLS config: {error}")))?;
        let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(None);
        client_config.transport_config(Arc::new(transport));
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            connections: Mutex::new(HashMap::new()),
            connect_timeout,
        })
    }

    #[instrument(skip(self), fields(host = %origin.host, port = origin.port))]
    pub async fn send_request_for(
        &self,
        origin: &Origin,
    ) -> Result<SendRequest<OpenStreams, bytes::Bytes>> {
        if let Some(cached) = self.connections.lock().get(origin) {
            return Ok(cached.send_request.clone());
        }

        let addr = (origin.host.as_ref(), origin.port)
            .to_socket_addrs()
            .map_err(DashBetaError::from)?
            .next()
            .ok_or_else(|| DashBetaError::network(format!("could not resolve {}", origin.host)))?;

        debug!(%addr, "opening new QUIC connection");
        let connecting = self
            .endpoint
            .connect(addr, &origin.host)
            .map_err(|error| DashBetaError::network(error.to_string()))?;
        let quinn_conn = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| DashBetaError::Timeout {
                reason: "QUIC handshake".into(),
            })?
            .map_err(DashBetaError::from)?;

        let h3_conn = h3_quinn::Connection::new(quinn_conn);
        let (mut driver, send_request) = h3::client::new(h3_conn)
            .await
            .map_err(|error| DashBetaError::protocol(format!("H3 handshake failed: {error}")))?;

        // The connection driver must be polled for the life of the
        // connection; run it on its own task, detached from any one request.
        tokio::spawn(async move {
            if let Err(error) = driver.wait_idle().await {
                debug!(%error, "H3 connection driver exited");
            }
        });

        self.connections.lock().insert(
            origin.clone(),
            Arc::new(CachedConnection {
                send_request: send_request.clone(),
            }),
        );
        Ok(send_request)
    }

    /// Evict a cached connection, e.g. after a fatal stream error, so the
    /// next request re-dials.
    pub fn evict(&self, origin: &Origin) {
        self.connections.lock().remove(origin);
    }
}
