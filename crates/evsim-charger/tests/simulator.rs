//! End-to-end scenarios against a loopback stub Central System.
//!
//! The stub accepts one WebSocket connection, answers every Call with a
//! canned CallResult and records everything the charger sends. Tests drive
//! the operator surface and assert on the recorded wire traffic.

use evsim_charger::{Charger, Config, TransactionId};
use evsim_ocpp::{frame, ConnectorStatus, Frame, OcppVersion};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

struct StubCsms {
    url: String,
    frames: mpsc::UnboundedReceiver<Frame>,
    inject: mpsc::UnboundedSender<String>,
}

fn default_reply(action: &str, boot_interval: u32) -> Value {
    match action {
        "BootNotification" => json!({
            "status": "Accepted",
            "currentTime": "2024-05-01T10:00:00Z",
            "interval": boot_interval,
        }),
        "StartTransaction" => json!({
            "idTagInfo": {"status": "Accepted"},
            "transactionId": 42,
        }),
        "Heartbeat" => json!({"currentTime": "2024-05-01T10:00:00Z"}),
        "DataTransfer" => json!({"status": "Accepted"}),
        _ => json!({}),
    }
}

async fn spawn_stub(boot_interval: u32) -> StubCsms {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = format!("ws://127.0.0.1:{port}/ocpp/CP-TEST");
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let (inject, mut inject_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let echo_subprotocol = |req: &Request, mut response: Response| {
            if let Some(protocol) = req.headers().get("Sec-WebSocket-Protocol") {
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", protocol.clone());
            }
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, echo_subprotocol)
            .await
            .unwrap();
        let (mut sink, mut read) = ws.split();
        loop {
            tokio::select! {
                injected = inject_rx.recv() => {
                    let Some(text) = injected else { break };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let Some(Ok(msg)) = msg else { break };
                    if let Message::Text(text) = msg {
                        let parsed = frame::parse(&text).unwrap();
                        if let Frame::Call { unique_id, action, .. } = &parsed {
                            let reply = default_reply(action, boot_interval);
                            let response =
                                frame::marshal_call_result(unique_id, &reply).unwrap();
                            if sink.send(Message::Text(response)).await.is_err() {
                                break;
                            }
                        }
                        let _ = frames_tx.send(parsed);
                    }
                }
            }
        }
    });

    StubCsms { url, frames, inject }
}

fn test_config(version: OcppVersion, url: &str, meter_interval: u64) -> Config {
    Config {
        ocpp_version: version,
        charger_id: "CP-TEST".into(),
        server_url: url.into(),
        tls: None,
        initial_status: ConnectorStatus::Available,
        max_current: 32.0,
        max_power: 22_000.0,
        min_current: 6.0,
        min_power: 1_380.0,
        voltage: 230.0,
        connector_id: 1,
        meter_values_interval: meter_interval,
        heartbeat_interval: 0,
        initial_soc: 20.0,
        battery_capacity: 60_000.0,
    }
}

/// Next Call frame, skipping client CallResults.
async fn next_call(stub: &mut StubCsms) -> (String, Value) {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), stub.frames.recv())
            .await
            .expect("timed out waiting for a call")
            .expect("stub server closed");
        if let Frame::Call {
            action, payload, ..
        } = frame
        {
            return (action, payload);
        }
    }
}

/// Next Call with the given action; other actions listed in `skip` are
/// tolerated, anything else fails the test.
async fn expect_call(stub: &mut StubCsms, expected: &str, skip: &[&str]) -> Value {
    loop {
        let (action, payload) = next_call(stub).await;
        if action == expected {
            return payload;
        }
        assert!(
            skip.contains(&action.as_str()),
            "expected {expected}, got {action}: {payload}"
        );
    }
}

/// Next TransactionEvent with the given eventType, skipping other events.
async fn expect_transaction_event(stub: &mut StubCsms, event_type: &str) -> Value {
    loop {
        let (action, payload) = next_call(stub).await;
        assert_eq!(action, "TransactionEvent", "unexpected {action}: {payload}");
        if payload["eventType"] == event_type {
            return payload;
        }
    }
}

/// Next CallResult sent by the charger (a reply to an injected Call).
async fn next_call_result(stub: &mut StubCsms) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), stub.frames.recv())
            .await
            .expect("timed out waiting for a call result")
            .expect("stub server closed");
        if let Frame::CallResult { payload, .. } = frame {
            return payload;
        }
    }
}

/// Assert that no Call with the given action shows up within the window.
async fn assert_no_call(stub: &mut StubCsms, action: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, stub.frames.recv()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(Frame::Call { action: got, payload, .. })) => {
                assert_ne!(got, action, "unexpected {got}: {payload}");
            }
            Ok(Some(_)) => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_v16_happy_path() {
    let mut stub = spawn_stub(60).await;
    let charger = Charger::new(test_config(OcppVersion::V16, &stub.url, 1)).unwrap();

    charger.connect().await.unwrap();
    expect_call(&mut stub, "BootNotification", &[]).await;
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["status"], "Available");

    charger.plugin().await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["status"], "Preparing");

    charger.start_transaction("tag1").await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["status"], "Charging");
    let start = expect_call(&mut stub, "StartTransaction", &[]).await;
    assert_eq!(start["idTag"], "tag1");
    assert_eq!(start["meterStart"], 0);
    assert_eq!(start["connectorId"], 1);
    assert_eq!(
        charger.snapshot().transaction_id,
        Some(TransactionId::Seq(42))
    );

    // the meter ticker reports cumulative energy > 0
    let meter = expect_call(&mut stub, "MeterValues", &[]).await;
    assert_eq!(meter["transactionId"], 42);
    let samples = meter["meterValue"][0]["sampledValue"].as_array().unwrap();
    assert_eq!(samples[0]["measurand"], "Energy.Active.Import.Register");
    let energy: i64 = samples[0]["value"].as_str().unwrap().parse().unwrap();
    assert!(energy > 0, "expected positive energy, got {energy}");
    assert!(samples.iter().any(|s| s["measurand"] == "SoC"));

    charger.stop_transaction("Local").await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &["MeterValues"]).await;
    assert_eq!(status["status"], "Finishing");
    let stop = expect_call(&mut stub, "StopTransaction", &["MeterValues"]).await;
    assert_eq!(stop["transactionId"], 42);
    assert_eq!(stop["reason"], "Local");
    assert!(stop["meterStop"].as_i64().unwrap() > 0);

    charger.unplug().await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &["MeterValues"]).await;
    assert_eq!(status["status"], "Available");
    assert_eq!(charger.snapshot().meter_value, 0);

    charger.disconnect().await;
    assert!(!charger.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_v201_happy_path() {
    let mut stub = spawn_stub(0).await;
    let charger = Charger::new(test_config(OcppVersion::V201, &stub.url, 1)).unwrap();

    charger.connect().await.unwrap();
    expect_call(&mut stub, "BootNotification", &[]).await;
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["connectorStatus"], "Available");

    charger.plugin().await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["connectorStatus"], "Occupied");

    charger.start_transaction("tag1").await.unwrap();
    let started = expect_transaction_event(&mut stub, "Started").await;
    assert_eq!(started["seqNo"], 0);
    assert_eq!(started["triggerReason"], "Authorized");
    assert_eq!(started["idToken"]["idToken"], "tag1");
    let tid = started["transactionInfo"]["transactionId"]
        .as_str()
        .unwrap()
        .to_owned();
    assert!(!tid.is_empty());
    assert_eq!(charger.status(), ConnectorStatus::Occupied);

    let updated = expect_transaction_event(&mut stub, "Updated").await;
    assert_eq!(updated["triggerReason"], "MeterValuePeriodic");
    assert!(updated["seqNo"].as_u64().unwrap() >= 1);
    assert_eq!(updated["transactionInfo"]["transactionId"], tid.as_str());
    let samples = updated["meterValue"][0]["sampledValue"].as_array().unwrap();
    assert!(samples[0]["value"].as_f64().unwrap() > 0.0);

    charger.stop_transaction("Local").await.unwrap();
    let ended = expect_transaction_event(&mut stub, "Ended").await;
    assert_eq!(ended["triggerReason"], "StopAuthorized");
    assert_eq!(ended["transactionInfo"]["transactionId"], tid.as_str());
    assert_eq!(ended["transactionInfo"]["stoppedReason"], "Local");
    let final_sample = &ended["meterValue"][0]["sampledValue"][0];
    assert_eq!(final_sample["measurand"], "Energy.Active.Import.Register");
    assert_eq!(final_sample["unitOfMeasure"]["unit"], "Wh");

    charger.unplug().await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["connectorStatus"], "Available");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_start_while_available_defers_until_plugin() {
    let mut stub = spawn_stub(0).await;
    let charger = Charger::new(test_config(OcppVersion::V16, &stub.url, 3600)).unwrap();

    charger.connect().await.unwrap();
    expect_call(&mut stub, "BootNotification", &[]).await;
    expect_call(&mut stub, "StatusNotification", &[]).await;

    let call =
        frame::marshal_call("srv-1", "RemoteStartTransaction", &json!({"idTag": "rfid-7"}))
            .unwrap();
    stub.inject.send(call).unwrap();

    let result = next_call_result(&mut stub).await;
    assert_eq!(result["status"], "Accepted");

    // accepted but deferred: nothing starts until the cable is plugged in
    assert_no_call(&mut stub, "StartTransaction", Duration::from_millis(600)).await;
    assert!(!charger.is_charging());

    charger.plugin().await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["status"], "Preparing");

    // about a second later the latched authorization starts the transaction
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["status"], "Charging");
    let start = expect_call(&mut stub, "StartTransaction", &[]).await;
    assert_eq!(start["idTag"], "rfid-7");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_start_v201_while_occupied() {
    let mut stub = spawn_stub(0).await;
    let charger = Charger::new(test_config(OcppVersion::V201, &stub.url, 3600)).unwrap();

    charger.connect().await.unwrap();
    expect_call(&mut stub, "BootNotification", &[]).await;
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["connectorStatus"], "Available");

    charger.plugin().await.unwrap();
    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["connectorStatus"], "Occupied");

    let call = frame::marshal_call(
        "srv-4",
        "RequestStartTransaction",
        &json!({
            "idToken": {"idToken": "rfid-7", "type": "ISO14443"},
            "remoteStartId": 1001,
        }),
    )
    .unwrap();
    stub.inject.send(call).unwrap();

    // the response already carries the locally assigned transaction id
    let result = next_call_result(&mut stub).await;
    assert_eq!(result["status"], "Accepted");
    let tid = result["transactionId"].as_str().unwrap().to_owned();
    assert!(!tid.is_empty());

    // about a second later the Started event references both ids
    let started = expect_transaction_event(&mut stub, "Started").await;
    assert_eq!(started["transactionInfo"]["transactionId"], tid.as_str());
    assert_eq!(started["transactionInfo"]["remoteStartId"], 1001);
    assert_eq!(started["idToken"]["idToken"], "rfid-7");
    assert!(charger.is_charging());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_stop_with_mismatched_id_is_rejected() {
    let mut stub = spawn_stub(0).await;
    let charger = Charger::new(test_config(OcppVersion::V16, &stub.url, 3600)).unwrap();

    charger.connect().await.unwrap();
    charger.plugin().await.unwrap();
    charger.start_transaction("tag1").await.unwrap();
    expect_call(&mut stub, "StartTransaction", &["BootNotification", "StatusNotification"])
        .await;
    assert_eq!(
        charger.snapshot().transaction_id,
        Some(TransactionId::Seq(42))
    );

    let call =
        frame::marshal_call("srv-2", "RemoteStopTransaction", &json!({"transactionId": 99}))
            .unwrap();
    stub.inject.send(call).unwrap();

    let result = next_call_result(&mut stub).await;
    assert_eq!(result["status"], "Rejected");

    assert_no_call(&mut stub, "StopTransaction", Duration::from_millis(1500)).await;
    assert!(charger.is_charging());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_stop_with_matching_id_stops() {
    let mut stub = spawn_stub(0).await;
    let charger = Charger::new(test_config(OcppVersion::V16, &stub.url, 3600)).unwrap();

    charger.connect().await.unwrap();
    charger.plugin().await.unwrap();
    charger.start_transaction("tag1").await.unwrap();
    expect_call(&mut stub, "StartTransaction", &["BootNotification", "StatusNotification"])
        .await;

    let call =
        frame::marshal_call("srv-3", "RemoteStopTransaction", &json!({"transactionId": 42}))
            .unwrap();
    stub.inject.send(call).unwrap();

    let result = next_call_result(&mut stub).await;
    assert_eq!(result["status"], "Accepted");

    let status = expect_call(&mut stub, "StatusNotification", &[]).await;
    assert_eq!(status["status"], "Finishing");
    let stop = expect_call(&mut stub, "StopTransaction", &[]).await;
    assert_eq!(stop["transactionId"], 42);
    assert_eq!(stop["reason"], "Remote");
    assert!(!charger.is_charging());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_boot_interval_overrides_heartbeat() {
    let mut stub = spawn_stub(1).await;
    let charger = Charger::new(test_config(OcppVersion::V16, &stub.url, 3600)).unwrap();

    charger.connect().await.unwrap();
    expect_call(&mut stub, "BootNotification", &[]).await;
    expect_call(&mut stub, "StatusNotification", &[]).await;

    // the server asked for a 1 s heartbeat; one shows up promptly
    expect_call(&mut stub, "Heartbeat", &[]).await;

    charger.disconnect().await;
    // once disconnected the ticker is gone; at most one heartbeat that was
    // already in flight may still arrive
    let mut stale = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(2500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stub.frames.recv()).await {
            Ok(Some(Frame::Call { action, .. })) if action == "Heartbeat" => stale += 1,
            Ok(Some(_)) => {}
            _ => break,
        }
    }
    assert!(stale <= 1, "heartbeat ticker survived disconnect");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_connect_is_rejected() {
    let mut stub = spawn_stub(0).await;
    let charger = Charger::new(test_config(OcppVersion::V16, &stub.url, 3600)).unwrap();

    charger.connect().await.unwrap();
    expect_call(&mut stub, "BootNotification", &[]).await;

    let err = charger.connect().await.unwrap_err();
    assert!(matches!(err, evsim_charger::ChargerError::AlreadyConnected));
}
