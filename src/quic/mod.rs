//! QUIC/H3 transport glue: one `quinn::Endpoint` + connection-per-origin,
//! ALPN `h3`, with 0-RTT session-ticket reuse when a prior connection to the
//! same origin is still cached. Certificate verification is
//! pluggable; the default experimental verifier accepts all certificates,
//! matching `verify_mode=ssl.CERT_NONE` in
//! `original_source/dash_emulator_quic/downloader/quic/client_nostream.py`.

mod insecure_verifier;
mod pool;

pub use insecure_verifier::InsecureServerVerifier;
pub use pool::{ConnectionPool, Origin};
