//! Bridge worker tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use jlr2mqtt::bridge::{CommandDispatcher, StatusPoller};
use jlr2mqtt::mqtt::client::MqttMessage;
use jlr2mqtt::workers::bridge;

use crate::common::{context, quiet_options, sample_status, MockApi, MockPublisher, StalledPublisher};

fn command(payload: &str) -> MqttMessage {
    MqttMessage {
        topic: "jlr2mqtt/command".to_string(),
        payload: payload.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn test_worker_handles_commands_until_channel_closes() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let poller = Arc::new(StatusPoller::new(context(
        api.clone(),
        publisher.clone(),
        quiet_options(),
        Some("1234"),
    )));
    let dispatcher = Arc::new(CommandDispatcher::new(poller.clone(), None));

    let (tx, rx) = mpsc::channel(8);
    tx.send(command(r#"{"command":"get_status"}"#)).await.unwrap();
    tx.send(command(r#"{"command":"lock"}"#)).await.unwrap();
    drop(tx);

    let options = bridge::Options {
        poll_interval: None,
        initial_delay: Duration::ZERO,
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        bridge::run(
            &options,
            poller,
            dispatcher,
            rx,
            tokio::time::sleep,
            Box::pin(std::future::pending::<()>()),
        ),
    )
    .await
    .unwrap();

    assert_eq!(api.status_calls(), 1);
    assert_eq!(api.invocations().len(), 1);
    assert_eq!(
        publisher.payload("jlr2mqtt/ev/ev_state_of_charge").as_deref(),
        Some("80")
    );
}

#[tokio::test]
async fn test_worker_polls_on_schedule_and_stops_on_shutdown() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let poller = Arc::new(StatusPoller::new(context(
        api.clone(),
        publisher,
        quiet_options(),
        None,
    )));
    let dispatcher = Arc::new(CommandDispatcher::new(poller.clone(), None));

    // Keep the sender alive so only the shutdown signal ends the worker
    let (_tx, rx) = mpsc::channel::<MqttMessage>(1);
    let options = bridge::Options {
        poll_interval: Some(Duration::from_secs(3600)),
        initial_delay: Duration::ZERO,
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        bridge::run(
            &options,
            poller,
            dispatcher,
            rx,
            tokio::time::sleep,
            Box::pin(tokio::time::sleep(Duration::from_millis(200))),
        ),
    )
    .await
    .unwrap();

    assert_eq!(api.status_calls(), 1);
}

fn spawn_worker(
    api: Arc<MockApi>,
    publisher: Arc<MockPublisher>,
) -> (mpsc::Sender<MqttMessage>, tokio::task::JoinHandle<()>) {
    let poller = Arc::new(StatusPoller::new(context(
        api,
        publisher,
        quiet_options(),
        Some("1234"),
    )));
    let dispatcher = Arc::new(CommandDispatcher::new(poller.clone(), None));
    let (tx, rx) = mpsc::channel(8);
    let options = bridge::Options {
        poll_interval: None,
        initial_delay: Duration::ZERO,
    };
    let worker = tokio::spawn(async move {
        bridge::run(
            &options,
            poller,
            dispatcher,
            rx,
            tokio::time::sleep,
            Box::pin(std::future::pending::<()>()),
        )
        .await
    });
    (tx, worker)
}

#[tokio::test(start_paused = true)]
async fn test_refresh_fires_after_service_command() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let (tx, worker) = spawn_worker(api.clone(), Arc::new(MockPublisher::default()));

    tx.send(command(r#"{"command":"lock"}"#)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(api.status_calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(api.status_calls(), 1);

    // Queries do not schedule another refresh
    tx.send(command(r#"{"command":"get_trips","kwargs":{"count":1}}"#))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.status_calls(), 1);

    drop(tx);
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_newer_refresh_replaces_pending_one() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let (tx, worker) = spawn_worker(api.clone(), Arc::new(MockPublisher::default()));

    tx.send(command(r#"{"command":"lock"}"#)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(40)).await;
    tx.send(command(r#"{"command":"unlock"}"#)).await.unwrap();

    // The first schedule would have fired at 60s
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.status_calls(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(api.status_calls(), 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(api.status_calls(), 1);
    assert_eq!(api.invocations().len(), 2);

    drop(tx);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_interrupts_stalled_command() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let poller = Arc::new(StatusPoller::new(context(
        api,
        Arc::new(StalledPublisher),
        quiet_options(),
        None,
    )));
    let dispatcher = Arc::new(CommandDispatcher::new(poller.clone(), None));

    let (tx, rx) = mpsc::channel(1);
    tx.send(command(r#"{"command":"get_status"}"#)).await.unwrap();
    let options = bridge::Options {
        poll_interval: None,
        initial_delay: Duration::ZERO,
    };

    let stopped = tokio::time::timeout(
        Duration::from_secs(5),
        bridge::run(
            &options,
            poller,
            dispatcher,
            rx,
            tokio::time::sleep,
            Box::pin(tokio::time::sleep(Duration::from_millis(100))),
        ),
    )
    .await;

    assert!(stopped.is_ok());
    drop(tx);
}

#[tokio::test]
async fn test_shutdown_interrupts_stalled_poll() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let poller = Arc::new(StatusPoller::new(context(
        api.clone(),
        Arc::new(StalledPublisher),
        quiet_options(),
        None,
    )));
    let dispatcher = Arc::new(CommandDispatcher::new(poller.clone(), None));

    let (_tx, rx) = mpsc::channel::<MqttMessage>(1);
    let options = bridge::Options {
        poll_interval: Some(Duration::from_secs(3600)),
        initial_delay: Duration::ZERO,
    };

    let stopped = tokio::time::timeout(
        Duration::from_secs(5),
        bridge::run(
            &options,
            poller,
            dispatcher,
            rx,
            tokio::time::sleep,
            Box::pin(tokio::time::sleep(Duration::from_millis(100))),
        ),
    )
    .await;

    assert!(stopped.is_ok());
    assert_eq!(api.status_calls(), 1);
}
