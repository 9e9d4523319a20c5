mod common;

use common::{assert_near, sent_frames, settle, Outcome, QueuedPoller, ScriptedConnector};
use live_realtime::channel::{
    ChannelDeps, ChannelManager, ChannelMode, ChannelOutput, ChannelState, ChatChannel,
};
use live_realtime::config::ChannelConfig;
use live_realtime::metrics::{MetricRecord, MetricsSink};
use live_realtime::monitor::ConnectionMonitor;
use live_realtime::protocol::{ChatServerFrame, WireMessage, WireUser};
use live_realtime::transport::SocketFrame;
use resilience::CircuitBreakerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const URL: &str = "ws://chat.test/ws";

fn config() -> ChannelConfig {
    ChannelConfig {
        socket_url: URL.to_string(),
        ..ChannelConfig::default()
    }
}

fn spawn_chat(
    connector: Arc<ScriptedConnector>,
    poller: Arc<QueuedPoller<ChatServerFrame>>,
    monitor: Arc<ConnectionMonitor>,
    config: &ChannelConfig,
) -> ChannelManager<ChatChannel> {
    ChannelManager::spawn(
        ChatChannel::new("s1"),
        config,
        ChannelDeps {
            connector,
            poll_source: poller,
            monitor,
            metrics: MetricsSink::disabled(),
        },
    )
}

fn polled_message(id: &str) -> ChatServerFrame {
    ChatServerFrame::Message(WireMessage {
        id: id.into(),
        user: WireUser {
            id: "u1".into(),
            display_name: "U1".into(),
            role: Default::default(),
        },
        text: "from http".into(),
        ts: 10,
        client_id: None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_join_sends_join_frame_once_connected() {
    let connector = ScriptedConnector::accepting();
    let manager = spawn_chat(
        connector.clone(),
        QueuedPoller::new(Vec::new()),
        ConnectionMonitor::new(true),
        &config(),
    );

    manager.join();
    settle().await;

    assert!(manager.is_connected());
    assert_eq!(manager.connection().mode, ChannelMode::Socket);
    let mut peer = connector.take_peer(URL).unwrap();
    let frames = sent_frames(&mut peer);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "join");
    assert_eq!(frames[0]["room"], "s1");
}

#[tokio::test(start_paused = true)]
async fn test_poller_covers_socket_outage_and_stops_after_reconnect() {
    let connector = ScriptedConnector::new(vec![Outcome::Refuse], Outcome::Accept);
    let poller = QueuedPoller::new(vec![vec![polled_message("1")]]);
    let manager = spawn_chat(
        connector.clone(),
        poller.clone(),
        ConnectionMonitor::new(true),
        &config(),
    );
    let mut outputs = manager.subscribe();

    manager.join();
    settle().await;

    // Within one fallback cycle of the failed connect
    let connection = manager.connection();
    assert_eq!(connection.state, ChannelState::Disconnected);
    assert_eq!(connection.mode, ChannelMode::Polling);
    assert_eq!(connection.reconnect_attempts, 1);
    assert!(poller.poll_count() >= 1);

    let mut polled = Vec::new();
    while let Ok(output) = outputs.try_recv() {
        if let ChannelOutput::Event(ChatServerFrame::Message(message)) = output {
            polled.push(message.id);
        }
    }
    assert_eq!(polled, vec!["1".to_string()]);

    // Reconnect fires after 1s and succeeds
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(manager.is_connected());
    assert_eq!(manager.connection().mode, ChannelMode::Socket);
    assert_eq!(manager.connection().reconnect_attempts, 0);

    let polls_after_reconnect = poller.poll_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(poller.poll_count(), polls_after_reconnect);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_doubles_then_resets() {
    let connector = ScriptedConnector::new(
        vec![Outcome::Accept, Outcome::Refuse, Outcome::Refuse, Outcome::Refuse],
        Outcome::Accept,
    );
    let manager = spawn_chat(
        connector.clone(),
        QueuedPoller::new(Vec::new()),
        ConnectionMonitor::new(true),
        &config(),
    );

    manager.join();
    settle().await;
    assert!(manager.is_connected());

    let peer = connector.take_peer(URL).unwrap();
    let dropped_at = Instant::now();
    peer.frames
        .send(SocketFrame::Closed(Some("server restart".into())))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;

    let attempts = connector.attempt_times();
    assert_eq!(attempts.len(), 5);
    let mut previous = dropped_at;
    for (attempt, expected_secs) in attempts[1..].iter().zip([1, 2, 4, 8]) {
        assert_near(*attempt - previous, Duration::from_secs(expected_secs));
        previous = *attempt;
    }

    let connection = manager.connection();
    assert_eq!(connection.state, ChannelState::Connected);
    assert_eq!(connection.reconnect_attempts, 0);
    assert!(connection.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_fails_and_network_online_retries() {
    let connector = ScriptedConnector::new(Vec::new(), Outcome::Refuse);
    let monitor = ConnectionMonitor::new(true);
    let config = ChannelConfig {
        max_reconnect_attempts: 2,
        ..config()
    };
    let manager = spawn_chat(
        connector.clone(),
        QueuedPoller::new(Vec::new()),
        monitor.clone(),
        &config,
    );

    manager.join();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let connection = manager.connection();
    assert_eq!(connection.state, ChannelState::Failed);
    assert_eq!(connection.mode, ChannelMode::Polling);
    assert_eq!(connection.last_error.as_deref(), Some("transport error: connection refused"));
    assert_eq!(connector.attempt_count(), 3);

    // Failed stays failed on its own
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 3);

    connector.set_fallback(Outcome::Accept);
    monitor.report(false);
    monitor.report(true);
    settle().await;

    assert!(manager.is_connected());
    assert_eq!(manager.connection().mode, ChannelMode::Socket);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_skips_pending_delay() {
    let connector = ScriptedConnector::new(vec![Outcome::Refuse], Outcome::Accept);
    let manager = spawn_chat(
        connector.clone(),
        QueuedPoller::new(Vec::new()),
        ConnectionMonitor::new(true),
        &config(),
    );

    manager.join();
    settle().await;
    assert_eq!(manager.connection().state, ChannelState::Disconnected);

    manager.reconnect();
    settle().await;
    assert!(manager.is_connected());

    // The scheduled attempt was cancelled
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_skips_polls() {
    let connector = ScriptedConnector::new(Vec::new(), Outcome::Refuse);
    let poller = QueuedPoller::<ChatServerFrame>::failing();
    let config = ChannelConfig {
        poll_interval: Duration::from_secs(1),
        max_reconnect_attempts: 0,
        poll_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        },
        ..config()
    };
    let manager = spawn_chat(connector, poller.clone(), ConnectionMonitor::new(true), &config);

    manager.join();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(manager.connection().state, ChannelState::Failed);
    assert_eq!(poller.poll_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_leave_sends_leave_and_shutdown_silences_timers() {
    let connector = ScriptedConnector::accepting();
    let (metrics, mut records) = MetricsSink::buffered(64);
    let mut manager = ChannelManager::spawn(
        ChatChannel::new("s1"),
        &config(),
        ChannelDeps {
            connector: connector.clone(),
            poll_source: QueuedPoller::<ChatServerFrame>::new(Vec::new()),
            monitor: ConnectionMonitor::new(true),
            metrics,
        },
    );

    manager.join();
    settle().await;
    let mut peer = connector.take_peer(URL).unwrap();

    manager.leave();
    settle().await;

    let types: Vec<_> = sent_frames(&mut peer)
        .into_iter()
        .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(types, vec!["join", "leave"]);
    assert_eq!(manager.connection().state, ChannelState::Closed);
    // Writer side dropped: the socket closes
    assert!(peer.sent.recv().await.is_none());

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);

    let mut states = Vec::new();
    while let Ok(record) = records.try_recv() {
        if let MetricRecord::ChannelStatus { state, .. } = record {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![ChannelState::Connecting, ChannelState::Connected, ChannelState::Closed]
    );
}
