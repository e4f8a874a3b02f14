use thiserror::Error;

/// Error taxonomy for the daemon.
///
/// Only [`Error::Config`] is fatal at startup; every other variant is either retried
/// by the connection manager (resolve/connect/sni/tls_handshake/ws_handshake/read, one
/// variant per stage) or logged-and-skipped (wire parse).
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("wire parse error: {0}")]
    WireParse(#[from] serde_json::Error),

    #[error("DNS resolution failed: {0}")]
    Resolve(std::io::Error),

    #[error("TCP connect failed: {0}")]
    Connect(std::io::Error),

    #[error("SNI construction failed: {0}")]
    Sni(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(std::io::Error),

    #[error("WebSocket handshake failed: {0}")]
    WsHandshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("read error: {0}")]
    Read(String),
}

pub type Result<T> = std::result::Result<T, Error>;
