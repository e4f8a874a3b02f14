//! Async state machine driving one upstream WSS connection: resolve, connect, TLS
//! handshake, WS upgrade, read. Reconnects across failures with exponential backoff
//! and is cooperatively cancellable at every suspension point.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::{RetryConfig, WsConfig};
use crate::error::Error;
use crate::queue::HandoffQueue;
use crate::trade::Trade;

/// Build the `/stream?streams=...` upgrade path from a lowercased trade-pair list.
/// Pure function, no network or config lookups involved.
pub fn build_stream_target(pairs: &[String]) -> String {
    if pairs.is_empty() {
        return "/stream?streams=".to_string();
    }
    let streams: Vec<String> = pairs.iter().map(|p| format!("{p}@trade")).collect();
    format!("/stream?streams={}", streams.join("/"))
}

/// Per-attempt idempotency guard around scheduling a reconnect. Only the first call
/// since the last [`fire`](Self::fire) actually schedules; later calls are no-ops.
#[derive(Default)]
pub struct ReconnectScheduler {
    pending: AtomicBool,
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call newly set the pending flag, `false` if a reconnect
    /// was already scheduled.
    pub fn schedule(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the pending flag once the reconnect timer has fired and a new attempt
    /// begins.
    pub fn fire(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// A handle callers use to request a stop; cheap to clone, shared with the supervisor.
#[derive(Clone)]
pub struct ConnectionHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Outcome of one call to [`ConnectionManager::run`].
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// `Stop` was requested; the caller should not restart.
    Stopped,
    /// `retry_attempt` reached `max_retry_attempts`; the caller should apply its own
    /// (supervisor-level) backoff before trying again.
    Exhausted,
}

/// Owns one logical upstream connection's retry lifecycle. Each call to `run` drives
/// the connection until it is stopped or exhausts its retries; the caller is expected
/// to construct a fresh `ConnectionManager` per supervisor "life".
pub struct ConnectionManager {
    ws: WsConfig,
    retry: RetryConfig,
    trade_pairs: Vec<String>,
    queue: Arc<HandoffQueue>,
    tls_connector: tokio_rustls::TlsConnector,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ConnectionManager {
    pub fn new(ws: WsConfig, retry: RetryConfig, trade_pairs: Vec<String>, queue: Arc<HandoffQueue>) -> Self {
        // Idempotent: `main` installs this too, but unit tests construct a
        // `ConnectionManager` directly without going through `main`.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            ws,
            retry,
            trade_pairs,
            queue,
            tls_connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            stopped: self.stopped.clone(),
            notify: self.notify.clone(),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drive resolve -> connect -> TLS -> WS -> read, reconnecting with backoff on
    /// every stage's failure, until stopped or retries are exhausted.
    pub async fn run(&self) -> ConnectionOutcome {
        let mut backoff = Backoff::new(
            Duration::from_secs(self.retry.base_retry_sec as u64),
            Duration::from_secs(self.retry.max_retry_sec as u64),
        );
        let scheduler = ReconnectScheduler::new();

        loop {
            if self.is_stopped() {
                return ConnectionOutcome::Stopped;
            }

            match self.attempt(&mut backoff).await {
                Ok(()) => {
                    // `attempt` only returns Ok on a clean Stop observed mid-read.
                    return ConnectionOutcome::Stopped;
                }
                Err(reason) => {
                    if self.is_stopped() {
                        return ConnectionOutcome::Stopped;
                    }
                    warn!(reason = %reason, attempt = backoff.attempt(), "connection attempt failed");

                    if !scheduler.schedule() {
                        // Already have a reconnect scheduled; nothing else to do.
                        continue;
                    }

                    if backoff.exhausted(self.retry.max_retry_attempts) {
                        scheduler.fire();
                        return ConnectionOutcome::Exhausted;
                    }

                    let delay = backoff.current_delay();
                    let notified = self.notify.notified();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = notified => {
                            scheduler.fire();
                            return ConnectionOutcome::Stopped;
                        }
                    }
                    backoff.advance(self.retry.max_retry_attempts);
                    scheduler.fire();
                }
            }
        }
    }

    /// One resolve-through-read attempt. Returns `Ok(())` only if a `Stop` was
    /// observed while reading (a clean exit, not a failure); any stage error is
    /// returned as a tagged [`Error`] variant for logging and backoff scheduling.
    /// Resets `backoff` to its base delay as soon as the WS handshake completes, per
    /// the "success resets the retry counter" contract.
    async fn attempt(&self, backoff: &mut Backoff) -> Result<(), Error> {
        let handshake_timeout = Duration::from_secs(self.ws.handshake_timeout_sec as u64);

        let notified = self.notify.notified();
        let resolve = self.resolve();
        let addrs = tokio::select! {
            r = resolve => r.map_err(Error::Resolve)?,
            _ = notified => return Ok(()),
        };

        let notified = self.notify.notified();
        let tcp = self.connect(&addrs);
        let tcp = tokio::select! {
            r = tcp => r.map_err(Error::Connect)?,
            _ = notified => return Ok(()),
        };

        let server_name = ServerName::try_from(self.ws.host.clone())
            .map_err(|e| Error::Sni(e.to_string()))?;

        let notified = self.notify.notified();
        let tls = timeout(handshake_timeout, self.tls_connector.connect(server_name, tcp));
        let tls_stream = tokio::select! {
            r = tls => r
                .map_err(|_| Error::TlsHandshake(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "ssl handshake timed out",
                )))?
                .map_err(Error::TlsHandshake)?,
            _ = notified => return Ok(()),
        };

        let target = build_stream_target(&self.trade_pairs);
        let url = format!("wss://{}:{}{}", self.ws.host, self.ws.port, target);
        let request = url.into_client_request().map_err(Error::WsHandshake)?;

        let notified = self.notify.notified();
        let ws = timeout(
            handshake_timeout,
            tokio_tungstenite::client_async(request, tls_stream),
        );
        let (mut ws_stream, _response) = tokio::select! {
            r = ws => r
                .map_err(|_| Error::WsHandshake(tokio_tungstenite::tungstenite::Error::Io(
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "ws handshake timed out"),
                )))?
                .map_err(Error::WsHandshake)?,
            _ = notified => return Ok(()),
        };

        info!(host = %self.ws.host, port = %self.ws.port, "websocket handshake complete");
        backoff.reset();

        let idle_timeout = if self.ws.idle_timeout_sec > 0 {
            Some(Duration::from_secs(self.ws.idle_timeout_sec as u64))
        } else {
            None
        };

        loop {
            if self.is_stopped() {
                return Ok(());
            }

            let notified = self.notify.notified();
            let next = Self::next_frame(&mut ws_stream, idle_timeout);
            let frame = tokio::select! {
                r = next => r,
                _ = notified => return Ok(()),
            };

            match frame {
                Some(Ok(text)) => match Trade::parse(&text) {
                    Ok(trade) if trade.is_valid() => self.queue.push(trade),
                    Ok(trade) => debug!(symbol = %trade.symbol, "discarding invalid trade"),
                    Err(e) => debug!(error = %e, "discarding unparseable frame"),
                },
                Some(Err(e)) => return Err(Error::Read(e.to_string())),
                None => return Err(Error::Read("stream ended".to_string())),
            }
        }
    }

    async fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.ws.host.as_str(), self.port()))
            .await?
            .collect();
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "DNS resolution returned no addresses",
            ));
        }
        Ok(addrs)
    }

    fn port(&self) -> u16 {
        self.ws.port.parse().unwrap_or(443)
    }

    /// Try each resolved address in turn until one connects.
    async fn connect(&self, addrs: &[SocketAddr]) -> std::io::Result<TcpStream> {
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "no addresses to connect to")
        }))
    }

    /// Read frames until a text frame arrives, the stream closes, or an error or
    /// idle timeout occurs. Ping/pong/binary frames are transparently skipped;
    /// they never reach `Trade::parse`.
    async fn next_frame<S>(
        ws_stream: &mut tokio_tungstenite::WebSocketStream<S>,
        idle_timeout: Option<Duration>,
    ) -> Option<Result<String, tokio_tungstenite::tungstenite::Error>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            let next = ws_stream.next();
            let message = match idle_timeout {
                Some(d) => match timeout(d, next).await {
                    Ok(m) => m,
                    Err(_) => {
                        return Some(Err(tokio_tungstenite::tungstenite::Error::Io(
                            std::io::Error::new(std::io::ErrorKind::TimedOut, "idle timeout"),
                        )))
                    }
                },
                None => next.await,
            };

            match message {
                Some(Ok(Message::Text(t))) => return Some(Ok(t)),
                Some(Ok(Message::Close(_))) => {
                    return Some(Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stream target builder is a pure function of the trade-pair list.
    #[test]
    fn empty_pairs_build_empty_target() {
        assert_eq!(build_stream_target(&[]), "/stream?streams=");
    }

    #[test]
    fn pairs_build_joined_target() {
        let pairs = vec!["a".to_string(), "b".to_string()];
        assert_eq!(build_stream_target(&pairs), "/stream?streams=a@trade/b@trade");
    }

    /// The scheduler is idempotent between schedule and fire.
    #[test]
    fn reconnect_scheduler_is_idempotent_until_fired() {
        let s = ReconnectScheduler::new();
        assert!(s.schedule());
        assert!(!s.schedule());
        assert!(!s.schedule());
        s.fire();
        assert!(s.schedule());
    }

    #[test]
    fn connection_handle_stop_is_observable() {
        let queue = Arc::new(HandoffQueue::new());
        let mgr = ConnectionManager::new(
            WsConfig::default(),
            RetryConfig::default(),
            vec!["btcusdt".into()],
            queue,
        );
        let handle = mgr.handle();
        assert!(!handle.is_stopped());
        handle.stop();
        assert!(handle.is_stopped());
        assert!(mgr.is_stopped());
    }
}
