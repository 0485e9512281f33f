//! Long-lived push connection delivering order updates.
//!
//! Task layout once started:
//! - reader: owns the read half, answers pings, forwards translated orders
//!   and reconnects with exponential backoff after any disconnect
//! - keepalive: refreshes the session token and sends transport pings
//!
//! The write half lives behind a mutex shared by both tasks and `stop`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SessionProvider, StreamError};
use crate::config::StreamConfig;
use crate::error::PluginResult;
use crate::models::PspOrder;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Frame → order. `Ok(None)` means the frame is not an order update.
pub type OrderTranslator = Arc<dyn Fn(&str) -> PluginResult<Option<PspOrder>> + Send + Sync>;

const ORDER_CHANNEL_CAPACITY: usize = 1024;

struct Shared {
    ws_base_url: String,
    settings: StreamConfig,
    session: Arc<dyn SessionProvider>,
    sink: Mutex<Option<WsSink>>,
    listen_key: RwLock<Option<String>>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn current_key(&self) -> Option<String> {
        match self.listen_key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_key(&self, key: Option<String>) -> Option<String> {
        let mut guard = match self.listen_key.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, key)
    }

    /// Open a fresh session and connect to it. The previous session, if
    /// any, is closed best-effort.
    async fn connect(&self) -> Result<WsSource, StreamError> {
        let key = self.session.open().await?;
        let url = format!("{}/{}", self.ws_base_url.trim_end_matches('/'), key);
        let ws = match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                let _ = self.session.close(&key).await;
                return Err(e.into());
            }
        };
        let (sink, source) = ws.split();

        *self.sink.lock().await = Some(sink);
        if let Some(old) = self.replace_key(Some(key)) {
            if let Err(e) = self.session.close(&old).await {
                debug!(error = %e, "Closing superseded listen key failed");
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("Order stream connected");
        Ok(source)
    }

    async fn drop_sink(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    async fn send(&self, message: Message) {
        if let Some(sink) = self.sink.lock().await.as_mut() {
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Write to order stream failed");
            }
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.settings.initial_delay())
            .with_max_interval(self.settings.max_delay())
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Push stream of order updates for one exchange account.
pub struct OrderStream {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl OrderStream {
    pub fn new(ws_base_url: &str, settings: StreamConfig, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ws_base_url: ws_base_url.to_string(),
                settings,
                session,
                sink: Mutex::new(None),
                listen_key: RwLock::new(None),
                connected: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Connect and spawn the background tasks. Orders arrive on the
    /// returned channel until `stop` is called.
    pub async fn start(
        &self,
        translate: OrderTranslator,
    ) -> Result<mpsc::Receiver<PspOrder>, StreamError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StreamError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let source = match self.shared.connect().await {
            Ok(source) => source,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(ORDER_CHANNEL_CAPACITY);
        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(read_loop(self.shared.clone(), source, translate, tx)));
        tasks.push(tokio::spawn(keepalive_loop(self.shared.clone())));
        Ok(rx)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn listen_key(&self) -> Option<String> {
        self.shared.current_key()
    }

    /// Signal every task, close the connection and release the session.
    /// Safe to call more than once and while the reader is mid-frame.
    pub async fn stop(&self) -> Result<(), StreamError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.cancel.cancel();

        self.shared.send(Message::Close(None)).await;

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Order stream task panicked");
            }
        }
        // A reconnect racing the cancel may have installed a fresh sink.
        self.shared.drop_sink().await;

        if let Some(key) = self.shared.replace_key(None) {
            self.shared.session.close(&key).await?;
        }
        info!("Order stream stopped");
        Ok(())
    }
}

enum Disconnect {
    Cancelled,
    Lost,
    ReceiverGone,
}

async fn pump(
    shared: &Shared,
    source: &mut WsSource,
    translate: &OrderTranslator,
    tx: &mpsc::Sender<PspOrder>,
) -> Disconnect {
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Disconnect::Cancelled,
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => match translate(&text) {
                    Ok(Some(order)) => {
                        debug!(order = %order.reference, status = ?order.status, "Order update");
                        if tx.send(order).await.is_err() {
                            return Disconnect::ReceiverGone;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, code = e.code(), "Dropping order stream frame"),
                },
                Some(Ok(Message::Ping(data))) => shared.send(Message::Pong(data)).await,
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "Order stream closed by server");
                    return Disconnect::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Order stream read failed");
                    return Disconnect::Lost;
                }
                None => return Disconnect::Lost,
            },
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut source: WsSource,
    translate: OrderTranslator,
    tx: mpsc::Sender<PspOrder>,
) {
    let mut backoff = shared.backoff();
    loop {
        match pump(&shared, &mut source, &translate, &tx).await {
            Disconnect::Cancelled => return,
            Disconnect::ReceiverGone => {
                info!("Order receiver dropped, reader exiting");
                shared.drop_sink().await;
                return;
            }
            Disconnect::Lost => shared.drop_sink().await,
        }

        source = loop {
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| shared.settings.max_delay());
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match shared.connect().await {
                Ok(source) => {
                    backoff.reset();
                    break source;
                }
                Err(e) => warn!(error = %e, delay_ms = delay.as_millis() as u64, "Order stream reconnect failed"),
            }
        };
    }
}

async fn refresh_session(shared: &Shared, key: &str) {
    if let Err(e) = shared.session.keepalive(key).await {
        warn!(error = %e, "Listen key keepalive failed, requesting a new one");
        match shared.session.open().await {
            Ok(fresh) => {
                shared.replace_key(Some(fresh));
            }
            Err(e) => warn!(error = %e, "Listen key renewal failed"),
        }
    }
}

async fn keepalive_loop(shared: Arc<Shared>) {
    let refresh_every = shared.settings.session_refresh();
    let ping_every = shared.settings.ping_interval();
    let mut refresh = interval_at(Instant::now() + refresh_every, refresh_every);
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = refresh.tick() => {
                if let Some(key) = shared.current_key() {
                    refresh_session(&shared, &key).await;
                }
            }
            _ = ping.tick() => shared.send(Message::Ping(Vec::new())).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use super::*;
    use crate::money::CurrencyTable;
    use crate::stream::ExecutionReportTranslator;
    use crate::stream::report::fixtures::execution_report;
    use crate::stream::session::mock::MockSession;

    struct Script {
        frames: Vec<String>,
        hang_up: bool,
    }

    fn settings() -> StreamConfig {
        StreamConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            session_refresh_secs: 3600,
            ping_secs: 3600,
        }
    }

    fn translator() -> OrderTranslator {
        let t = ExecutionReportTranslator::new(
            CurrencyTable::iso4217().with("BTC", 8).with("USDT", 6),
            &["USDT"],
        );
        Arc::new(move |frame: &str| t.translate(frame))
    }

    /// One script per accepted connection, in order. Returns the base URL
    /// and the request paths the server saw.
    async fn spawn_server(scripts: Vec<Script>) -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let paths = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = paths.clone();

        tokio::spawn(async move {
            for script in scripts {
                let (tcp, _) = listener.accept().await.unwrap();
                let seen = seen.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    seen.lock().unwrap().push(req.uri().path().to_string());
                    Ok(resp)
                };
                let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
                for frame in script.frames {
                    ws.send(Message::Text(frame)).await.unwrap();
                }
                if script.hang_up {
                    let _ = ws.close(None).await;
                } else {
                    tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
                }
            }
        });

        (format!("ws://{}/ws", addr), paths)
    }

    async fn next_order(rx: &mut mpsc::Receiver<PspOrder>) -> PspOrder {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for order")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_delivers_orders_and_stop_releases_session() {
        let (url, paths) = spawn_server(vec![Script {
            frames: vec![
                execution_report(1, "NEW", "0"),
                r#"{"e":"outboundAccountPosition","E":1}"#.to_string(),
                "not json".to_string(),
                execution_report(2, "FILLED", "0.5"),
            ],
            hang_up: false,
        }])
        .await;
        let session = Arc::new(MockSession::default());
        let stream = OrderStream::new(&url, settings(), session.clone());

        let mut rx = stream.start(translator()).await.unwrap();
        assert_eq!(next_order(&mut rx).await.reference, "1");
        let filled = next_order(&mut rx).await;
        assert_eq!(filled.reference, "2");
        assert_eq!(filled.status, crate::models::OrderStatus::Filled);

        assert!(stream.is_connected());
        assert_eq!(stream.listen_key().as_deref(), Some("key-1"));
        assert_eq!(paths.lock().unwrap().clone(), vec!["/ws/key-1".to_string()]);

        stream.stop().await.unwrap();
        assert_eq!(session.closed(), vec!["key-1".to_string()]);
        assert!(stream.listen_key().is_none());
        assert!(!stream.is_connected());

        stream.stop().await.unwrap();
        assert_eq!(session.closed().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_with_new_session() {
        let (url, paths) = spawn_server(vec![
            Script {
                frames: vec![execution_report(1, "NEW", "0")],
                hang_up: true,
            },
            Script {
                frames: vec![execution_report(2, "NEW", "0")],
                hang_up: false,
            },
        ])
        .await;
        let session = Arc::new(MockSession::default());
        let stream = OrderStream::new(&url, settings(), session.clone());

        let mut rx = stream.start(translator()).await.unwrap();
        assert_eq!(next_order(&mut rx).await.reference, "1");
        assert_eq!(next_order(&mut rx).await.reference, "2");

        assert_eq!(session.opened(), 2);
        assert_eq!(
            paths.lock().unwrap().clone(),
            vec!["/ws/key-1".to_string(), "/ws/key-2".to_string()]
        );

        stream.stop().await.unwrap();
        assert_eq!(session.closed(), vec!["key-1".to_string(), "key-2".to_string()]);
    }

    #[tokio::test]
    async fn test_start_guards() {
        let (url, _) = spawn_server(vec![Script {
            frames: Vec::new(),
            hang_up: false,
        }])
        .await;
        let stream = OrderStream::new(&url, settings(), Arc::new(MockSession::default()));

        let _rx = stream.start(translator()).await.unwrap();
        assert!(matches!(
            stream.start(translator()).await,
            Err(StreamError::AlreadyRunning)
        ));

        stream.stop().await.unwrap();
        assert!(matches!(stream.start(translator()).await, Err(StreamError::Stopped)));
    }

    #[tokio::test]
    async fn test_connect_failure_releases_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        drop(listener);

        let session = Arc::new(MockSession::default());
        let stream = OrderStream::new(&url, settings(), session.clone());
        assert!(stream.start(translator()).await.is_err());
        assert_eq!(session.closed(), vec!["key-1".to_string()]);
    }
}
