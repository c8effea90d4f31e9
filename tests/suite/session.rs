//! Chat session contract: what gets committed to the conversation and when.

use std::sync::Arc;
use std::time::Duration;

use fintech_engine::{
    ChatSession, FailureKind, ReplyOutcome, SendError, SendPolicy, Turn, fallback, system_prompt,
};
use futures_util::future::join;
use serde_json::json;

use crate::common::{
    chunk, gateway_with_idle_timeout, message_contents, mount_completion_once,
    mount_delayed_stream, mount_status, mount_stream, mount_stream_body, request_bodies, session,
    sse_body, start_mock, start_stalling_server,
};

#[tokio::test]
async fn successful_stream_commits_both_turns() {
    let server = start_mock().await;
    mount_stream(&server, &["Start ", "a SIP ", "early."]).await;
    let session = session(&server, SendPolicy::Reject);

    let mut shown = String::new();
    let reply = session
        .send("How should I invest monthly?", |f| shown.push_str(f))
        .await
        .unwrap();

    assert_eq!(reply.outcome, ReplyOutcome::Completed);
    assert_eq!(reply.text, "Start a SIP early.");
    assert_eq!(shown, reply.text);
    assert_eq!(
        session.turns(),
        vec![
            Turn::user("How should I invest monthly?"),
            Turn::assistant("Start a SIP early."),
        ]
    );
    assert!(!session.is_busy());
}

#[tokio::test]
async fn history_excludes_the_turn_being_sent() {
    let server = start_mock().await;
    mount_completion_once(&server, "first answer").await;
    mount_completion_once(&server, "second answer").await;
    let session = session(&server, SendPolicy::Reject);

    session.ask("first question").await.unwrap();
    session.ask("second question").await.unwrap();

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(
        message_contents(&bodies[0]),
        vec![
            ("system".to_string(), system_prompt().to_string()),
            ("user".to_string(), "first question".to_string()),
        ]
    );
    assert_eq!(
        message_contents(&bodies[1]),
        vec![
            ("system".to_string(), system_prompt().to_string()),
            ("user".to_string(), "first question".to_string()),
            ("assistant".to_string(), "first answer".to_string()),
            ("user".to_string(), "second question".to_string()),
        ]
    );
    assert_eq!(session.turns().len(), 4);
}

#[tokio::test]
async fn ask_failures_use_kind_specific_text() {
    for (status, expected_text, expected_kind) in [
        (429, fallback::RATE_LIMITED_REPLY, FailureKind::RateLimited),
        (401, fallback::UNAUTHORIZED_REPLY, FailureKind::Unauthorized),
        (500, fallback::GENERIC_REPLY, FailureKind::Other),
    ] {
        let server = start_mock().await;
        mount_status(&server, status, "nope").await;
        let session = session(&server, SendPolicy::Reject);

        let reply = session.ask("hi").await.unwrap();
        assert_eq!(reply.text, expected_text, "status {status}");
        assert_eq!(reply.outcome, ReplyOutcome::Fallback(expected_kind));
        assert_eq!(session.turns()[1], Turn::assistant(expected_text));
    }
}

#[tokio::test]
async fn failed_stream_appends_single_apology() {
    for body in [
        None,
        Some(sse_body(&["Partial ", "thought"], false)),
    ] {
        let server = start_mock().await;
        match &body {
            Some(body) => mount_stream_body(&server, body.clone()).await,
            None => mount_status(&server, 429, "busy").await,
        }
        let session = session(&server, SendPolicy::Reject);

        let mut fragments = Vec::new();
        let reply = session
            .send("hi", |f| fragments.push(f.to_string()))
            .await
            .unwrap();

        let apologies = fragments
            .iter()
            .filter(|f| f.as_str() == fallback::STREAM_APOLOGY)
            .count();
        assert_eq!(apologies, 1);
        assert_eq!(fragments.last().map(String::as_str), Some(fallback::STREAM_APOLOGY));
        assert_eq!(reply.text, fragments.concat());
        assert!(!reply.text.trim().is_empty());
        assert!(matches!(reply.outcome, ReplyOutcome::Fallback(_)));
        assert_eq!(session.turns()[1], Turn::assistant(reply.text.clone()));
    }
}

#[tokio::test]
async fn mid_stream_failure_keeps_partial_text() {
    let server = start_mock().await;
    let mut body = format!("data: {}\n\n", chunk("Equity funds "));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "error": { "code": 429, "message": "rate limited upstream" } })
    ));
    mount_stream_body(&server, body).await;
    let session = session(&server, SendPolicy::Reject);

    let reply = session.send("funds?", |_| {}).await.unwrap();
    assert_eq!(reply.outcome, ReplyOutcome::Fallback(FailureKind::RateLimited));
    assert_eq!(
        reply.text,
        format!("Equity funds {}", fallback::STREAM_APOLOGY)
    );
}

#[tokio::test]
async fn stalled_stream_appends_apology_after_partial_text() {
    let base_url = start_stalling_server(&format!("data: {}\n\n", chunk("Hi"))).await;
    let gateway = gateway_with_idle_timeout(&base_url, Duration::from_millis(300));
    let session = ChatSession::new(Arc::new(gateway), SendPolicy::Reject);

    let mut fragments = Vec::new();
    let reply = session
        .send("hello?", |f| fragments.push(f.to_string()))
        .await
        .unwrap();

    assert_eq!(fragments, vec!["Hi", fallback::STREAM_APOLOGY]);
    assert_eq!(reply.outcome, ReplyOutcome::Fallback(FailureKind::Other));
    assert_eq!(reply.text, format!("Hi{}", fallback::STREAM_APOLOGY));
    assert_eq!(
        session.turns(),
        vec![Turn::user("hello?"), Turn::assistant(reply.text.clone())]
    );
    assert!(!session.is_busy());
}

#[tokio::test]
async fn cancelled_stream_commits_no_assistant_turn() {
    let server = start_mock().await;
    mount_delayed_stream(&server, &["never shown"], Duration::from_secs(2)).await;
    let session = session(&server, SendPolicy::Reject);

    let mut fragments = 0;
    let (reply, cancelled) = join(session.send("hi", |_| fragments += 1), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel()
    })
    .await;

    assert!(cancelled);
    let reply = reply.unwrap();
    assert_eq!(reply.outcome, ReplyOutcome::Cancelled);
    assert_eq!(fragments, 0);
    assert_eq!(session.turns(), vec![Turn::user("hi")]);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn reject_policy_refuses_concurrent_send() {
    let server = start_mock().await;
    mount_delayed_stream(&server, &["done"], Duration::from_millis(200)).await;
    let session = session(&server, SendPolicy::Reject);

    let (first, second) = join(session.send("first", |_| {}), session.send("second", |_| {})).await;

    assert_eq!(second, Err(SendError::Busy));
    assert_eq!(first.unwrap().outcome, ReplyOutcome::Completed);
    assert_eq!(
        session.turns(),
        vec![Turn::user("first"), Turn::assistant("done")]
    );
}

#[tokio::test]
async fn cancel_previous_policy_replaces_in_flight_stream() {
    let server = start_mock().await;
    mount_delayed_stream(&server, &["answer"], Duration::from_millis(300)).await;
    let session = session(&server, SendPolicy::CancelPrevious);

    let (first, second) = join(session.send("first", |_| {}), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.send("second", |_| {}).await
    })
    .await;

    assert_eq!(first.unwrap().outcome, ReplyOutcome::Cancelled);
    assert_eq!(second.unwrap().outcome, ReplyOutcome::Completed);
    assert_eq!(
        session.turns(),
        vec![
            Turn::user("first"),
            Turn::user("second"),
            Turn::assistant("answer"),
        ]
    );
}

#[tokio::test]
async fn new_conversation_starts_from_empty_history() {
    let server = start_mock().await;
    mount_completion_once(&server, "one").await;
    mount_completion_once(&server, "two").await;
    let session = session(&server, SendPolicy::Reject);

    session.ask("before").await.unwrap();
    session.new_conversation();
    assert!(session.turns().is_empty());
    session.ask("after").await.unwrap();

    let bodies = request_bodies(&server).await;
    assert_eq!(message_contents(&bodies[1]).len(), 2);
}
