// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Tether Contributors. All rights reserved.
//  https://github.com/tether-rs/tether
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! End-to-end scenarios for the connection manager against a scripted transport.
//!
//! All tests run on a paused tokio clock with jitter disabled, so backoff waits are exact
//! and take no wall-clock time.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use rstest::rstest;
use tempfile::TempDir;
use tether_common::{
    msgbus::{MessageBus, TypedMessageHandler},
    testing::wait_until_async,
};
use tether_core::paths::BundledResources;
use tether_network::{
    credentials::{Credentials, StaticCredentials},
    error::SessionError,
    session::{
        ConnectionManager, SessionConfig,
        events::{
            AUTH_CHANGED_TOPIC, AuthChanged, CONNECTION_CHANGED_TOPIC, ConnectionChanged,
            MESSAGE_RECEIVED_TOPIC, MessageReceived, NETWORK_CHANGED_TOPIC, NetworkChanged,
        },
    },
    state::ConnectionState,
    stubs::{MockOutcome, MockTransport, TransportCall},
    transport::TransportEvent,
};
use tokio::time::Instant;

/// Slack allowed on backoff timings for timer granularity.
const TIMER_SLACK: Duration = Duration::from_millis(20);

struct Harness {
    manager: ConnectionManager,
    transport: MockTransport,
    bus: Arc<MessageBus>,
    changes: Arc<Mutex<Vec<bool>>>,
    messages: Arc<Mutex<Vec<MessageReceived>>>,
    resources_dir: TempDir,
}

impl Harness {
    fn changes(&self) -> Vec<bool> {
        self.changes.lock().unwrap().clone()
    }

    fn messages(&self) -> Vec<MessageReceived> {
        self.messages.lock().unwrap().clone()
    }
}

fn test_config() -> SessionConfig {
    SessionConfig {
        host: "localhost".to_string(),
        port: 1883,
        system_trust_store: PathBuf::from("/nonexistent/ca-certificates.crt"),
        reconnect_jitter: 0.0,
        ..Default::default()
    }
}

/// Starts a session on `transport`. Must be called from within a tokio runtime.
fn start(transport: MockTransport) -> Harness {
    let bus = Arc::new(MessageBus::new());
    let changes = Arc::new(Mutex::new(Vec::new()));
    let messages = Arc::new(Mutex::new(Vec::new()));

    let changes_clone = changes.clone();
    bus.subscribe(
        CONNECTION_CHANGED_TOPIC,
        TypedMessageHandler::from(move |e: &ConnectionChanged| {
            changes_clone.lock().unwrap().push(e.connected);
        })
        .into(),
        None,
    )
    .unwrap();

    let messages_clone = messages.clone();
    bus.subscribe(
        MESSAGE_RECEIVED_TOPIC,
        TypedMessageHandler::from(move |e: &MessageReceived| {
            messages_clone.lock().unwrap().push(e.clone());
        })
        .into(),
        None,
    )
    .unwrap();

    let resources_dir = tempfile::tempdir().unwrap();
    let manager = ConnectionManager::initialize(
        test_config(),
        Box::new(transport.clone()),
        Arc::new(StaticCredentials::new(Credentials::new("1234", "secret"))),
        bus.clone(),
        &BundledResources::new(resources_dir.path()),
    )
    .unwrap();

    Harness {
        manager,
        transport,
        bus,
        changes,
        messages,
        resources_dir,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    wait_until_async(
        || {
            let result = condition();
            async move { result }
        },
        Duration::from_secs(600),
    )
    .await;
}

/// Lets the session run for a while so unexpected extra calls would show up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
    let gap = later - earlier;
    assert!(
        gap >= expected && gap <= expected + TIMER_SLACK,
        "Expected gap of {expected:?}, was {gap:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_back_off_then_connect() {
    let transport = MockTransport::new();
    transport.push_connect_outcomes([
        MockOutcome::Code(5),
        MockOutcome::Error("tls handshake failed".to_string()),
        MockOutcome::Code(-1),
    ]);
    let h = start(transport);

    wait_for(|| h.manager.is_connected()).await;

    let times = h.transport.connect_times();
    assert_eq!(times.len(), 4);
    assert_gap(times[0], times[1], Duration::from_secs(1));
    assert_gap(times[1], times[2], Duration::from_secs(2));
    assert_gap(times[2], times[3], Duration::from_secs(4));

    assert_eq!(h.manager.backoff_attempt(), 0);
    assert_eq!(h.manager.connect_attempts(), 4);
    assert_eq!(h.changes(), vec![true]);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_successful_connect_resets_attempt_counter() {
    let transport = MockTransport::new();
    transport.push_connect_outcomes([
        MockOutcome::Code(1),
        MockOutcome::Code(1),
        MockOutcome::Code(0),
        MockOutcome::Code(1),
    ]);
    let h = start(transport);

    wait_for(|| h.manager.is_connected()).await;
    h.transport.emit(TransportEvent::Disconnected { rc: 7 });
    wait_for(|| h.transport.connect_count() == 5 && h.manager.is_connected()).await;

    let times = h.transport.connect_times();
    assert_gap(times[0], times[1], Duration::from_secs(1));
    assert_gap(times[1], times[2], Duration::from_secs(2));
    // The failure after a success waits the first attempt's delay again
    assert_gap(times[3], times[4], Duration::from_secs(1));
    assert_eq!(h.changes(), vec![true, false, true]);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_subscribe_replays_once_per_connect() {
    let h = start(MockTransport::new());

    h.manager.subscribe("a").await.unwrap();
    h.manager.subscribe("a").await.unwrap();

    wait_for(|| h.transport.subscribed_topics().len() == 1).await;
    settle().await;
    assert_eq!(h.transport.subscribed_topics(), vec!["a"]);

    h.transport.emit(TransportEvent::Disconnected { rc: 1 });
    wait_for(|| h.transport.subscribed_topics().len() == 2).await;
    settle().await;

    assert_eq!(h.transport.subscribed_topics(), vec!["a", "a"]);
    assert_eq!(h.transport.connect_count(), 2);
    assert_eq!(h.manager.subscriptions(), vec!["a"]);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_before_connect_replays_once() {
    let transport = MockTransport::new().with_auto_connack(false);
    let h = start(transport);

    h.manager.subscribe("news").await.unwrap();
    settle().await;

    // Waiting on the server to acknowledge, no duplicate connects
    assert_eq!(h.transport.connect_count(), 1);
    assert!(!h.manager.is_connected());
    assert!(h.transport.subscribed_topics().is_empty());

    h.transport.emit(TransportEvent::Connected { rc: 0 });
    wait_for(|| h.manager.is_connected()).await;
    settle().await;

    assert_eq!(h.transport.subscribed_topics(), vec!["news"]);
    assert_eq!(h.transport.connect_count(), 1);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_while_connected_is_immediate() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    h.manager.subscribe("/t_ms").await.unwrap();
    assert_eq!(h.transport.subscribed_topics(), vec!["/t_ms"]);

    h.manager.subscribe("/t_ms").await.unwrap();
    assert_eq!(h.transport.subscribed_topics(), vec!["/t_ms"]);
    assert!(h.transport.calls().contains(&TransportCall::Subscribe {
        topic: "/t_ms".to_string(),
        qos: 0,
    }));

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_interrupts_backoff_wait() {
    let transport = MockTransport::new();
    transport.push_connect_outcomes(std::iter::repeat_n(MockOutcome::Code(1), 10));
    let h = start(transport);

    // Fourth failure leaves the session in an 8s wait
    wait_for(|| h.transport.connect_count() == 4).await;
    assert_eq!(h.manager.backoff_attempt(), 4);

    let start = Instant::now();
    h.manager.force_reconnect();
    wait_for(|| h.transport.connect_count() == 5).await;
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "Woke after {:?}",
        start.elapsed()
    );

    // The counter restarted, so the next wait is the first attempt's delay
    wait_for(|| h.transport.connect_count() == 6).await;
    let times = h.transport.connect_times();
    assert_gap(times[4], times[5], Duration::from_secs(1));

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_during_teardown_reconnects_again() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    // A second trigger arrives while the first forced disconnect is in progress
    let manager = h.manager.clone();
    let fired = AtomicBool::new(false);
    h.transport.set_disconnect_hook(move || {
        if !fired.swap(true, Ordering::AcqRel) {
            manager.force_reconnect();
        }
    });

    let start = Instant::now();
    h.manager.force_reconnect();
    wait_for(|| h.transport.connect_count() == 3 && h.manager.is_connected()).await;
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "Reconnected after {:?}",
        start.elapsed()
    );
    settle().await;

    assert_eq!(h.transport.disconnect_count(), 2);
    assert_eq!(h.transport.connect_count(), 3);
    assert_eq!(h.changes(), vec![true, false, true, false, true]);
    assert_eq!(h.manager.backoff_attempt(), 0);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_while_connected_keeps_next_backoff() {
    let transport = MockTransport::new();
    let h = start(transport);
    wait_for(|| h.manager.is_connected()).await;

    // The reconnect after the forced teardown fails and must still back off
    h.transport.push_connect_outcomes([MockOutcome::Code(1)]);
    h.manager.force_reconnect();
    wait_for(|| h.transport.connect_count() == 3).await;

    let times = h.transport.connect_times();
    assert_gap(times[1], times[2], Duration::from_secs(1));

    h.manager.shutdown().await;
}

#[rstest]
#[case::auth(AUTH_CHANGED_TOPIC)]
#[case::network(NETWORK_CHANGED_TOPIC)]
#[tokio::test(start_paused = true)]
async fn test_bus_event_forces_reconnect(#[case] topic: &str) {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    if topic == AUTH_CHANGED_TOPIC {
        h.bus.publish(topic, &AuthChanged);
    } else {
        h.bus.publish(topic, &NetworkChanged);
    }
    wait_for(|| h.changes().len() == 3).await;

    assert_eq!(h.changes(), vec![true, false, true]);
    assert_eq!(h.transport.disconnect_count(), 1);
    assert_eq!(h.transport.connect_count(), 2);

    // Fresh credentials are presented on the new connect
    let credential_sets = h
        .transport
        .count_calls(|call| matches!(call, TransportCall::SetCredentials { .. }));
    assert_eq!(credential_sets, 2);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_forced_reconnect_replays_subscriptions_in_order() {
    let h = start(MockTransport::new());
    for topic in ["/t_ms", "/orca_presence", "/messaging_events"] {
        h.manager.subscribe(topic).await.unwrap();
    }
    wait_for(|| h.transport.subscribed_topics().len() == 3).await;

    h.manager.force_reconnect();
    wait_for(|| h.transport.subscribed_topics().len() == 6).await;

    assert_eq!(
        h.transport.subscribed_topics(),
        vec![
            "/t_ms",
            "/orca_presence",
            "/messaging_events",
            "/t_ms",
            "/orca_presence",
            "/messaging_events",
        ]
    );

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_connack_emits_single_event() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    h.transport.emit(TransportEvent::Connected { rc: 0 });
    h.transport.emit(TransportEvent::Connected { rc: 0 });
    settle().await;

    assert_eq!(h.changes(), vec![true]);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_connack_reconnects() {
    let transport = MockTransport::new().with_auto_connack(false);
    let h = start(transport);
    settle().await;

    h.transport.emit(TransportEvent::Connected { rc: 5 });
    wait_for(|| h.transport.connect_count() == 2).await;

    assert!(!h.manager.is_connected());
    assert!(h.changes().is_empty());

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_messages_are_decoded_and_published() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    h.transport.emit(TransportEvent::Message {
        topic: "/t_ms".to_string(),
        payload: Bytes::from_static(&[0xff, 0xfe, 0xfd]),
    });
    h.transport.emit(TransportEvent::Message {
        topic: "/t_ms".to_string(),
        payload: Bytes::from_static("héllo".as_bytes()),
    });
    wait_for(|| !h.messages().is_empty()).await;
    settle().await;

    assert_eq!(
        h.messages(),
        vec![MessageReceived {
            topic: "/t_ms".to_string(),
            payload: "héllo".to_string(),
        }]
    );

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_failure_backs_off_and_resumes() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    h.transport
        .push_loop_outcomes([MockOutcome::Error("socket closed".to_string())]);
    wait_for(|| h.manager.backoff_attempt() == 1).await;
    let ticks = h.transport.loop_count();

    // No ticks during the one second wait
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.transport.loop_count(), ticks);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.transport.loop_count() > ticks);
    assert!(h.manager.is_connected());
    assert_eq!(h.transport.connect_count(), 1);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_forwards_to_transport() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    h.manager.publish("/typing", b"{\"state\":1}").await.unwrap();

    assert!(h.transport.calls().contains(&TransportCall::Publish {
        topic: "/typing".to_string(),
        payload: b"{\"state\":1}".to_vec(),
        qos: 0,
    }));

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_initialize_configures_transport() {
    let h = start(MockTransport::new());
    wait_for(|| h.transport.connect_count() == 1).await;

    let calls = h.transport.calls();
    assert_eq!(
        calls[0],
        TransportCall::SetTlsTrustStore(h.resources_dir.path().join("ca-certificates-fallback.crt"))
    );
    assert_eq!(
        calls[1],
        TransportCall::SetCredentials {
            user_id: "1234".to_string(),
            token: "secret".to_string(),
        }
    );
    assert_eq!(
        calls[2],
        TransportCall::Connect {
            host: "localhost".to_string(),
            port: 1883,
        }
    );

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects_and_releases_transport() {
    let h = start(MockTransport::new());
    wait_for(|| h.manager.is_connected()).await;

    h.manager.shutdown().await;

    assert!(h.manager.is_shutdown());
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(h.changes(), vec![true, false]);
    assert_eq!(h.transport.disconnect_count(), 1);
    assert!(!h.bus.has_subscribers(AUTH_CHANGED_TOPIC));
    assert!(!h.bus.has_subscribers(NETWORK_CHANGED_TOPIC));
    assert!(matches!(
        h.manager.publish("/t_ms", b"late").await,
        Err(SessionError::NotInitialized)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_backoff_wait() {
    let transport = MockTransport::new();
    transport.push_connect_outcomes(std::iter::repeat_n(MockOutcome::Code(1), 10));
    let h = start(transport);
    wait_for(|| h.transport.connect_count() == 3).await;

    let start = Instant::now();
    h.manager.shutdown().await;

    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(h.manager.is_shutdown());
    assert!(h.changes().is_empty());
}

#[rstest]
fn test_initialize_requires_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let result = ConnectionManager::initialize(
        test_config(),
        Box::new(MockTransport::new()),
        Arc::new(StaticCredentials::new(Credentials::new("1234", "secret"))),
        Arc::new(MessageBus::new()),
        &BundledResources::new(dir.path()),
    );

    assert!(result.is_err());
}

#[tokio::test]
async fn test_initialize_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        reconnect_jitter: 2.0,
        ..test_config()
    };
    let result = ConnectionManager::initialize(
        config,
        Box::new(MockTransport::new()),
        Arc::new(StaticCredentials::new(Credentials::new("1234", "secret"))),
        Arc::new(MessageBus::new()),
        &BundledResources::new(dir.path()),
    );

    assert!(result.is_err());
}
