mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use call_bridge::scenario::{ScenarioPool, ScenarioResolver};
use call_bridge::session::{CallSession, SessionConfig, SessionHandle, SessionState};
use call_bridge::telephony::{OutboundMessage, PLAYBACK_COMPLETE_MARK};
use call_bridge::transcript::{Speaker, TranscriptEvent, TranscriptSink};
use call_bridge::{create_router, AppState, Config};
use common::{scenario, wait_until, Harness, MockSynthesizer};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

fn app_state(harness: &Harness) -> AppState {
    app_state_with(harness, Config::default())
}

fn app_state_with(harness: &Harness, mut config: Config) -> AppState {
    config.service.public_url = "https://bridge.example.com".to_string();
    let resolver =
        ScenarioResolver::new().then(ScenarioPool::new("general", vec![scenario()]));
    AppState::new(
        config,
        harness.services.clone(),
        resolver,
        harness.transcripts.clone(),
    )
}

async fn send(app: Router, method: &str, uri: &str) -> Result<(StatusCode, String)> {
    let response = app
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, String::from_utf8(body.to_vec())?))
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let app = create_router(app_state(&harness));

    let (status, body) = send(app, "GET", "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    Ok(())
}

#[tokio::test]
async fn test_incoming_call_returns_stream_twiml() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let app = create_router(app_state(&harness));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/incoming-call/rescheduling")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/xml"
    );

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let twiml = String::from_utf8(body.to_vec())?;
    assert!(twiml.contains("<Stream url=\"wss://bridge.example.com/media-stream/rescheduling\"/>"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_scenario_is_not_found() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let app = create_router(app_state(&harness));

    let (status, body) = send(app, "POST", "/incoming-call/no-such-scenario").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["error"], "Scenario no-such-scenario not found");
    Ok(())
}

#[tokio::test]
async fn test_missing_session_is_not_found() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let state = app_state(&harness);

    for uri in ["/sessions/call-missing/status", "/sessions/call-missing/transcript"] {
        let (status, _) = send(create_router(state.clone()), "GET", uri).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, _) = send(create_router(state), "POST", "/sessions/call-missing/stop").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_registered_session_status_and_transcript() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let state = app_state(&harness);

    let config = SessionConfig::new(scenario()).with_session_id("call-http");
    let (_session, handle) = CallSession::new(config, harness.services.clone());
    state
        .sessions
        .write()
        .await
        .insert("call-http".to_string(), handle);
    harness
        .transcripts
        .record(
            "call-http",
            &TranscriptEvent::new(Speaker::Counterpart, "Thanks for calling."),
        )
        .await?;

    let (status, body) =
        send(create_router(state.clone()), "GET", "/sessions/call-http/status").await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["session_id"], "call-http");
    assert_eq!(json["scenario_id"], "rescheduling");
    assert_eq!(json["state"], "idle");

    let (status, body) =
        send(create_router(state.clone()), "GET", "/sessions/call-http/transcript").await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json.as_array().map(Vec::len), Some(1));
    assert_eq!(json[0]["speaker"], "counterpart");
    assert_eq!(json[0]["text"], "Thanks for calling.");

    let (status, body) = send(create_router(state), "POST", "/sessions/call-http/stop").await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "stopping");
    Ok(())
}

#[tokio::test]
async fn test_stop_on_closed_session() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let state = app_state(&harness);

    let config = SessionConfig::new(scenario()).with_session_id("call-done");
    let (session, handle) = CallSession::new(config, harness.services.clone());
    state
        .sessions
        .write()
        .await
        .insert("call-done".to_string(), handle.clone());

    // Inbound closed from the start: the session closes straight away
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(1);
    let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::channel(1);
    drop(inbound_tx);
    session.run(inbound_rx, outbound_tx).await?;
    assert_eq!(handle.state(), SessionState::Closed);

    let (status, body) = send(create_router(state), "POST", "/sessions/call-done/stop").await?;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["status"], "closed");
    assert_eq!(json["stats"]["state"], "closed");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_closed_sessions_evicted_after_retention() -> Result<()> {
    let harness = Harness::new(&["unused"], MockSynthesizer::wire(160));
    let mut config = Config::default();
    config.session.closed_retention_secs = 60;
    let state = app_state_with(&harness, config);

    let (finished, finished_handle) = CallSession::new(
        SessionConfig::new(scenario()).with_session_id("call-old"),
        harness.services.clone(),
    );
    state.register(finished_handle.clone()).await;
    harness
        .transcripts
        .record("call-old", &TranscriptEvent::new(Speaker::Counterpart, "Hello?"))
        .await?;

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(1);
    let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::channel(1);
    drop(inbound_tx);
    finished.run(inbound_rx, outbound_tx).await?;
    assert_eq!(finished_handle.state(), SessionState::Closed);

    let (_running, running_handle) = CallSession::new(
        SessionConfig::new(scenario()).with_session_id("call-live"),
        harness.services.clone(),
    );
    state.register(running_handle).await;

    // Still inside the retention window
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(state.evict_closed().await, 0);
    assert!(state.session("call-old").await.is_some());

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(state.evict_closed().await, 1);
    assert!(state.session("call-old").await.is_none());
    assert!(harness.transcripts.events("call-old").await.is_empty());
    assert!(state.session("call-live").await.is_some());
    Ok(())
}

async fn only_session(state: &AppState) -> SessionHandle {
    for _ in 0..1000 {
        if let Some(handle) = state.sessions.read().await.values().next().cloned() {
            return handle;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("no session registered");
}

#[tokio::test]
async fn test_media_stream_socket_round_trip() -> Result<()> {
    let harness = Harness::new(&["Sure, Thursday works."], MockSynthesizer::wire(200));
    let state = app_state(&harness);
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/media-stream/rescheduling", addr))
            .await?;

    socket
        .send(Message::Text(
            json!({"event": "connected", "protocol": "Call", "version": "1.0.0"}).to_string(),
        ))
        .await?;
    socket
        .send(Message::Text(
            json!({
                "event": "start",
                "sequenceNumber": "1",
                "start": {
                    "streamSid": "MZ-socket",
                    "callSid": "CA-socket",
                    "tracks": ["inbound"],
                    "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
                }
            })
            .to_string(),
        ))
        .await?;
    let payload = base64::engine::general_purpose::STANDARD.encode([0xffu8; 160]);
    socket
        .send(Message::Text(
            json!({
                "event": "media",
                "sequenceNumber": "2",
                "media": {"track": "inbound", "chunk": "1", "timestamp": "20", "payload": payload}
            })
            .to_string(),
        ))
        .await?;

    let handle = only_session(&state).await;
    assert_eq!(handle.stats().scenario_id, "rescheduling");
    wait_until(|| harness.connector.connection_count() == 1).await;
    let recognizer = harness.connector.connection(0);
    wait_until(|| recognizer.sent_count() == 1).await;
    wait_until(|| handle.stats().call_sid.is_some()).await;
    assert_eq!(handle.stats().call_sid.as_deref(), Some("CA-socket"));

    recognizer.final_segment("Can you do Thursday?").await;
    recognizer.utterance_end().await;

    // 200 bytes of audio: two media frames, then the completion mark
    let mut received = Vec::new();
    while received.len() < 3 {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await?
            .expect("socket closed early")?;
        if let Message::Text(text) = message {
            received.push(serde_json::from_str::<OutboundMessage>(&text)?);
        }
    }
    let sizes: Vec<usize> = received
        .iter()
        .filter_map(OutboundMessage::audio)
        .map(|frame| frame.len())
        .collect();
    assert_eq!(sizes, vec![160, 40]);
    assert_eq!(
        received[2],
        OutboundMessage::mark("MZ-socket", PLAYBACK_COMPLETE_MARK)
    );
    assert!(received.iter().all(|message| match message {
        OutboundMessage::Media { stream_sid, .. } | OutboundMessage::Mark { stream_sid, .. } =>
            stream_sid == "MZ-socket",
    }));

    socket.close(None).await?;
    wait_until(|| handle.state() == SessionState::Closed).await;
    assert!(recognizer.is_finished());
    Ok(())
}
