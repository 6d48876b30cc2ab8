use async_trait::async_trait;
use common::ReconnectBackoff;
use connector_bitstamp::{spawn_fill_stream, FillStream, SessionState, StreamSession};
use connector_core::{ConnectorError, StreamConfig, StreamMode, StreamToken, StreamTokenProvider};
use execution_core::{create_stream_observer, Fill, OrderObserver, OrderSide};
use futures_util::{SinkExt, StreamExt};
use metrics::{create_metrics, SharedMetrics};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// One scripted server action.
#[derive(Clone)]
enum Step {
    Send(String),
    /// Wait until the client has sent this many text frames.
    AwaitSubscribes(usize),
    /// Wait until the test notifies.
    Wait(Arc<Notify>),
    /// Drop the socket without a close handshake.
    Drop,
}

#[derive(Clone)]
struct ConnectionLog {
    accepted_at: Instant,
    received: Arc<Mutex<Vec<String>>>,
}

/// Websocket server that runs `scripts[i]` on the i-th accepted connection.
///
/// Connections past the end of the list, and scripts that run out of steps,
/// stay open until the client leaves.
struct MockBitstampWs {
    addr: SocketAddr,
    connections: Arc<Mutex<Vec<ConnectionLog>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockBitstampWs {
    async fn spawn(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let logs = connections.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let log = ConnectionLog {
                            accepted_at: Instant::now(),
                            received: Arc::new(Mutex::new(Vec::new())),
                        };
                        let index = {
                            let mut logs = logs.lock().unwrap();
                            logs.push(log.clone());
                            logs.len() - 1
                        };
                        let script = scripts.get(index).cloned().unwrap_or_default();
                        tokio::spawn(serve(stream, script, log.received));
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn connection(&self, index: usize) -> ConnectionLog {
        self.connections.lock().unwrap()[index].clone()
    }

    fn received(&self, index: usize) -> Vec<String> {
        self.connection(index).received.lock().unwrap().clone()
    }
}

impl Drop for MockBitstampWs {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, script: Vec<Step>, received: Arc<Mutex<Vec<String>>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    let inbound = {
        let received = received.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = source.next().await {
                if let Message::Text(text) = msg {
                    received.lock().unwrap().push(text);
                }
            }
        })
    };

    for step in script {
        match step {
            Step::Send(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Step::AwaitSubscribes(count) => loop {
                let seen = received.lock().unwrap().len();
                if seen >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            Step::Wait(notify) => notify.notified().await,
            Step::Drop => {
                inbound.abort();
                return;
            }
        }
    }

    let _ = inbound.await;
}

struct MockTokens {
    calls: AtomicUsize,
    failures: usize,
}

impl MockTokens {
    fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTokenProvider for MockTokens {
    async fn generate_stream_token(&self) -> Result<StreamToken, ConnectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(ConnectorError::Auth("token endpoint unavailable".into()));
        }
        Ok(StreamToken {
            token: format!("tok-{}", call),
            user_id: 7,
        })
    }
}

fn config(url: String, mode: StreamMode, symbols: &[&str]) -> StreamConfig {
    StreamConfig {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        mode,
        channel_capacity: 16,
        backoff: ReconnectBackoff::fixed(Duration::from_millis(200)),
        idle_timeout: Duration::from_secs(2),
        ping_interval: Duration::from_millis(500),
        connect_timeout: Duration::from_secs(2),
        ws_url: url,
    }
}

fn ack(channel: &str) -> Step {
    Step::Send(format!(
        r#"{{"event":"bts:subscription_succeeded","channel":"{}","data":{{}}}}"#,
        channel
    ))
}

fn private_trade(order_id: u64, trade_id: u64, amount: &str) -> Step {
    Step::Send(format!(
        r#"{{"event":"trade","channel":"private-my_trades_btcusd-7","data":{{"id":{},"order_id":{},"amount":{},"price":"36000.5","fee":"0.1","side":"buy","microtimestamp":"1624118324669000"}}}}"#,
        trade_id, order_id, amount
    ))
}

fn public_trade(symbol: &str, trade_id: u64, buy_order_id: u64, sell_order_id: u64) -> Step {
    Step::Send(format!(
        r#"{{"event":"trade","channel":"live_trades_{}","data":{{"id":{},"amount":0.25,"price":36000.5,"type":0,"buy_order_id":{},"sell_order_id":{},"microtimestamp":"1624118324669000"}}}}"#,
        symbol, trade_id, buy_order_id, sell_order_id
    ))
}

async fn next_fill(stream: &mut FillStream) -> Fill {
    tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("timed out waiting for a fill")
        .expect("stream ended")
}

fn start(
    config: StreamConfig,
    observer: execution_core::SharedOrderObserver,
    tokens: Option<Arc<MockTokens>>,
) -> (FillStream, SharedMetrics) {
    let metrics = create_metrics();
    let mut session = StreamSession::new(config, observer, metrics.clone());
    if let Some(tokens) = tokens {
        session = session.with_token_provider(tokens);
    }
    (spawn_fill_stream(session).unwrap(), metrics)
}

#[tokio::test]
async fn public_stream_forwards_every_trade_in_order() {
    let server = MockBitstampWs::spawn(vec![vec![
        Step::AwaitSubscribes(1),
        ack("live_trades_btcusd"),
        public_trade("btcusd", 1, 10, 20),
        public_trade("btcusd", 2, 11, 21),
        public_trade("btcusd", 3, 12, 22),
    ]])
    .await;
    let (mut stream, metrics) = start(
        config(server.url(), StreamMode::Public, &["btcusd"]),
        create_stream_observer(),
        None,
    );

    let trades: Vec<u64> = vec![
        next_fill(&mut stream).await.trade_id,
        next_fill(&mut stream).await.trade_id,
        next_fill(&mut stream).await.trade_id,
    ];
    assert_eq!(trades, vec![1, 2, 3]);
    assert_eq!(stream.state(), SessionState::Streaming);

    assert_eq!(
        server.received(0),
        vec![r#"{"event":"bts:subscribe","data":{"channel":"live_trades_btcusd"}}"#]
    );

    assert!(stream.stop().await.unwrap().is_empty());
    assert_eq!(metrics.fills_forwarded(), 3);
    assert_eq!(metrics.frames_received(), 4);
}

#[tokio::test]
async fn private_stream_forwards_only_observed_orders() {
    let server = MockBitstampWs::spawn(vec![vec![
        Step::AwaitSubscribes(1),
        ack("private-my_trades_btcusd-7"),
        private_trade(101, 1, r#""0.5""#),
        private_trade(102, 2, r#""0.5""#),
        private_trade(103, 3, r#""0.5""#),
        private_trade(104, 4, r#""0.5""#),
    ]])
    .await;
    let observer = create_stream_observer();
    observer.observe(OrderSide::Buy, "btcusd", 101).unwrap();
    observer.observe(OrderSide::Buy, "btcusd", 103).unwrap();
    let tokens = MockTokens::failing_first(0);

    let (mut stream, metrics) = start(
        config(server.url(), StreamMode::Private, &["btcusd"]),
        observer,
        Some(tokens.clone()),
    );

    assert_eq!(next_fill(&mut stream).await.order_id, 101);
    assert_eq!(next_fill(&mut stream).await.order_id, 103);

    assert_eq!(tokens.calls(), 1);
    assert_eq!(
        server.received(0),
        vec![r#"{"event":"bts:subscribe","data":{"channel":"private-my_trades_btcusd-7","auth":"tok-1"}}"#]
    );

    assert!(stream.stop().await.unwrap().is_empty());
    assert_eq!(metrics.fills_forwarded(), 2);
    assert_eq!(metrics.fills_filtered(), 2);
}

#[tokio::test]
async fn quoted_and_bare_amounts_produce_the_same_size() {
    let server = MockBitstampWs::spawn(vec![vec![
        Step::AwaitSubscribes(1),
        private_trade(1, 1, r#""0.0009""#),
        private_trade(1, 2, "0.0009"),
    ]])
    .await;
    let observer = create_stream_observer();
    observer.observe(OrderSide::Buy, "btcusd", 1).unwrap();

    let (mut stream, _) = start(
        config(server.url(), StreamMode::Private, &["btcusd"]),
        observer,
        Some(MockTokens::failing_first(0)),
    );

    let quoted = next_fill(&mut stream).await;
    let bare = next_fill(&mut stream).await;
    assert_eq!(quoted.size, 0.0009);
    assert_eq!(quoted.size, bare.size);
    assert_eq!(quoted.filled_at, bare.filled_at);

    stream.stop().await.unwrap();
}

#[tokio::test]
async fn read_failure_reconnects_once_and_resubscribes_every_symbol() {
    let server = MockBitstampWs::spawn(vec![
        vec![
            Step::AwaitSubscribes(2),
            public_trade("btcusd", 1, 10, 20),
            Step::Drop,
        ],
        vec![Step::AwaitSubscribes(2), public_trade("ethusd", 2, 11, 21)],
    ])
    .await;
    let (mut stream, metrics) = start(
        config(server.url(), StreamMode::Public, &["btcusd", "ethusd"]),
        create_stream_observer(),
        None,
    );

    assert_eq!(next_fill(&mut stream).await.trade_id, 1);
    let second = next_fill(&mut stream).await;
    assert_eq!(second.trade_id, 2);
    assert_eq!(second.symbol, "ethusd");

    // No further reconnects while the second connection is healthy
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connection_count(), 2);

    let gap = server.connection(1).accepted_at - server.connection(0).accepted_at;
    assert!(gap >= Duration::from_millis(200), "reconnected after {:?}", gap);

    for index in 0..2 {
        let received = server.received(index);
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("live_trades_btcusd"));
        assert!(received[1].contains("live_trades_ethusd"));
    }

    stream.stop().await.unwrap();
    assert_eq!(metrics.reconnect_attempts(), 1);
}

#[tokio::test]
async fn server_reconnect_request_skips_backoff() {
    let server = MockBitstampWs::spawn(vec![
        vec![
            Step::AwaitSubscribes(1),
            public_trade("btcusd", 1, 10, 20),
            Step::Send(r#"{"event":"bts:request_reconnect","channel":"","data":""}"#.into()),
        ],
        vec![Step::AwaitSubscribes(1), public_trade("btcusd", 2, 11, 21)],
    ])
    .await;
    let mut config = config(server.url(), StreamMode::Public, &["btcusd"]);
    config.backoff = ReconnectBackoff::fixed(Duration::from_secs(30));
    let (mut stream, _) = start(config, create_stream_observer(), None);

    assert_eq!(next_fill(&mut stream).await.trade_id, 1);
    assert_eq!(next_fill(&mut stream).await.trade_id, 2);
    assert_eq!(server.connection_count(), 2);

    stream.stop().await.unwrap();
}

#[tokio::test]
async fn translation_errors_do_not_end_the_session() {
    let server = MockBitstampWs::spawn(vec![vec![
        Step::AwaitSubscribes(1),
        Step::Send("not json".into()),
        Step::Send(r#"{"event":"data","channel":"order_book_btcusd","data":{}}"#.into()),
        Step::Send(
            r#"{"event":"trade","channel":"live_trades_btcusd","data":{"id":1,"amount":"lots"}}"#
                .into(),
        ),
        public_trade("btcusd", 9, 10, 20),
    ]])
    .await;
    let (mut stream, metrics) = start(
        config(server.url(), StreamMode::Public, &["btcusd"]),
        create_stream_observer(),
        None,
    );

    assert_eq!(next_fill(&mut stream).await.trade_id, 9);
    assert_eq!(server.connection_count(), 1);

    stream.stop().await.unwrap();
    assert_eq!(metrics.translation_errors(), 3);
}

#[tokio::test]
async fn stop_during_backoff_returns_promptly() {
    // Nothing listens on this port, every connect fails
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut config = config(url, StreamMode::Public, &["btcusd"]);
    config.backoff = ReconnectBackoff::fixed(Duration::from_secs(60));
    let (stream, metrics) = start(config, create_stream_observer(), None);

    let mut states = stream.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SessionState::Reconnecting),
    )
    .await
    .expect("never entered backoff")
    .unwrap();

    let started = Instant::now();
    let remaining = tokio::time::timeout(Duration::from_secs(2), stream.stop())
        .await
        .expect("stop blocked behind backoff")
        .unwrap();

    assert!(remaining.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(*states.borrow(), SessionState::Stopped);
    assert_eq!(metrics.connection_failures(), 1);
}

#[tokio::test]
async fn auth_failure_is_retried_like_a_connect_failure() {
    let server = MockBitstampWs::spawn(vec![
        vec![],
        vec![Step::AwaitSubscribes(1), private_trade(5, 1, r#""1""#)],
    ])
    .await;
    let observer = create_stream_observer();
    observer.observe(OrderSide::Sell, "btcusd", 5).unwrap();
    let tokens = MockTokens::failing_first(1);

    let (mut stream, metrics) = start(
        config(server.url(), StreamMode::Private, &["btcusd"]),
        observer,
        Some(tokens.clone()),
    );

    assert_eq!(next_fill(&mut stream).await.order_id, 5);
    assert_eq!(tokens.calls(), 2);
    assert!(server.received(0).is_empty());
    assert!(server.received(1)[0].contains("tok-2"));

    stream.stop().await.unwrap();
    assert_eq!(metrics.auth_failures(), 1);
    assert_eq!(metrics.connection_failures(), 1);
}

#[tokio::test]
async fn placement_lock_orders_registration_before_fills() {
    let release = Arc::new(Notify::new());
    let server = MockBitstampWs::spawn(vec![vec![
        Step::AwaitSubscribes(1),
        private_trade(500, 1, r#""1""#),
        Step::Wait(release.clone()),
        private_trade(600, 2, r#""1""#),
    ]])
    .await;
    let observer = create_stream_observer();
    let tokens = MockTokens::failing_first(0);

    // A placement is in flight before the stream subscribes
    let placing = observer.lock().await.unwrap();
    let (mut stream, _) = start(
        config(server.url(), StreamMode::Private, &["btcusd"]),
        observer.clone(),
        Some(tokens.clone()),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tokens.calls(), 0, "token fetched while placement held the lock");
    assert!(server.connection_count() <= 1);
    if server.connection_count() == 1 {
        assert!(server.received(0).is_empty());
    }

    observer.observe(OrderSide::Buy, "btcusd", 500).unwrap();
    drop(placing);
    assert_eq!(next_fill(&mut stream).await.order_id, 500);

    // The fill for 600 arrives while its placement has not registered yet
    let placing = observer.lock().await.unwrap();
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(200)).await;
    observer.observe(OrderSide::Buy, "btcusd", 600).unwrap();
    drop(placing);

    let fill = next_fill(&mut stream).await;
    assert_eq!(fill.order_id, 600);
    assert_eq!(fill.side, OrderSide::Buy);

    stream.stop().await.unwrap();
}

#[tokio::test]
async fn stop_drains_fills_already_received() {
    let mut script = vec![Step::AwaitSubscribes(1)];
    for trade_id in 1..=5 {
        script.push(public_trade("btcusd", trade_id, 10, 20));
    }
    let server = MockBitstampWs::spawn(vec![script]).await;

    let mut config = config(server.url(), StreamMode::Public, &["btcusd"]);
    config.channel_capacity = 1;
    let (stream, metrics) = start(config, create_stream_observer(), None);

    // Nobody reads, so the session blocks on the full queue
    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics.frames_received() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let remaining = stream.stop().await.unwrap();
    let trades: Vec<u64> = remaining.iter().map(|f| f.trade_id).collect();
    assert_eq!(trades, vec![1, 2, 3, 4, 5]);
    assert_eq!(metrics.fills_dropped(), 0);
}

#[tokio::test]
async fn dropped_receiver_ends_the_session() {
    let server = MockBitstampWs::spawn(vec![vec![
        Step::AwaitSubscribes(1),
        public_trade("btcusd", 1, 10, 20),
    ]])
    .await;
    let (stream, _) = start(
        config(server.url(), StreamMode::Public, &["btcusd"]),
        create_stream_observer(),
        None,
    );

    let (fills, stop) = stream.split();
    drop(fills);

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !stop.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop.stop().await
    })
    .await
    .unwrap();
    assert!(matches!(result, Err(ConnectorError::ChannelClosed)));
}
