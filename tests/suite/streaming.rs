//! Streaming gateway behavior: ordering, termination, failures, cancellation.

use std::time::Duration;

use fintech_engine::{AbortHandle, CompletionError, FailureKind, StreamStop};
use futures_util::future::join;
use serde_json::json;

use crate::common::{
    chunk, gateway, gateway_with_idle_timeout, mount_completion, mount_delayed_stream,
    mount_status, mount_stream, mount_stream_body, mount_stream_bytes, request_bodies, sse_body,
    start_mock, start_stalling_server,
};

fn registration() -> fintech_engine::AbortRegistration {
    AbortHandle::new_pair().1
}

#[tokio::test]
async fn fragments_arrive_in_order_and_concatenate() {
    let server = start_mock().await;
    mount_stream(&server, &["NIFTY ", "closed ", "higher", " today."]).await;

    let mut fragments = Vec::new();
    let text = gateway(&server)
        .complete_streaming(
            "How did the market do?",
            &[],
            |fragment| fragments.push(fragment.to_string()),
            registration(),
        )
        .await
        .unwrap();

    assert_eq!(fragments, vec!["NIFTY ", "closed ", "higher", " today."]);
    assert_eq!(text, fragments.concat());

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["stream"], json!(true));
}

#[tokio::test]
async fn streaming_matches_non_streaming_reply() {
    let reply = "Diversify across large caps, debt funds, and gold.";

    let streaming_server = start_mock().await;
    let pieces: Vec<&str> = reply.split_inclusive(' ').collect();
    mount_stream(&streaming_server, &pieces).await;

    let plain_server = start_mock().await;
    mount_completion(&plain_server, reply).await;

    let streamed = gateway(&streaming_server)
        .complete_streaming("q", &[], |_| {}, registration())
        .await
        .unwrap();
    let once = gateway(&plain_server).complete_once("q", &[]).await.unwrap();

    assert_eq!(streamed, once);
}

#[tokio::test]
async fn truncated_stream_is_a_failure() {
    let server = start_mock().await;
    mount_stream_body(&server, sse_body(&["partial ", "answer"], false)).await;

    let mut fragments = Vec::new();
    let stop = gateway(&server)
        .complete_streaming(
            "q",
            &[],
            |fragment| fragments.push(fragment.to_string()),
            registration(),
        )
        .await
        .unwrap_err();

    assert_eq!(fragments, vec!["partial ", "answer"]);
    match stop {
        StreamStop::Failed(error) => {
            assert!(matches!(error, CompletionError::Stream(_)));
            assert_eq!(error.kind(), FailureKind::Other);
        }
        StreamStop::Cancelled => panic!("expected failure"),
    }
}

#[tokio::test]
async fn finish_reason_without_done_sentinel_completes() {
    let server = start_mock().await;
    let mut body = String::new();
    body.push_str(&format!("data: {}\n\n", chunk("All set.")));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }] })
    ));
    mount_stream_body(&server, body).await;

    let text = gateway(&server)
        .complete_streaming("q", &[], |_| {}, registration())
        .await
        .unwrap();
    assert_eq!(text, "All set.");
}

#[tokio::test]
async fn crlf_framed_stream_is_parsed() {
    let server = start_mock().await;
    let body = format!(
        "data: {}\r\n\r\ndata: {}\r\n\r\ndata: [DONE]\r\n\r\n",
        chunk("Hello"),
        chunk(", world")
    );
    mount_stream_body(&server, body).await;

    let text = gateway(&server)
        .complete_streaming("q", &[], |_| {}, registration())
        .await
        .unwrap();
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn rate_limit_on_stream_is_classified() {
    let server = start_mock().await;
    mount_status(&server, 429, "slow down").await;

    let mut fragments = 0;
    let stop = gateway(&server)
        .complete_streaming("q", &[], |_| fragments += 1, registration())
        .await
        .unwrap_err();

    assert_eq!(fragments, 0);
    assert_eq!(
        stop,
        StreamStop::Failed(CompletionError::RateLimited {
            message: "slow down".to_string()
        })
    );
}

#[tokio::test]
async fn in_band_error_after_partial_output() {
    let server = start_mock().await;
    let mut body = format!("data: {}\n\n", chunk("Start of answer"));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "error": { "code": 502, "message": "provider disconnected" } })
    ));
    mount_stream_body(&server, body).await;

    let mut fragments = Vec::new();
    let stop = gateway(&server)
        .complete_streaming(
            "q",
            &[],
            |fragment| fragments.push(fragment.to_string()),
            registration(),
        )
        .await
        .unwrap_err();

    assert_eq!(fragments, vec!["Start of answer"]);
    assert!(matches!(
        stop,
        StreamStop::Failed(CompletionError::Api { status: 502, .. })
    ));
}

#[tokio::test]
async fn repeated_garbage_payloads_fail_the_stream() {
    let server = start_mock().await;
    let body = "data: {not json\n\ndata: still not\n\ndata: nope\n\n".to_string();
    mount_stream_body(&server, body).await;

    let stop = gateway(&server)
        .complete_streaming("q", &[], |_| {}, registration())
        .await
        .unwrap_err();
    assert!(matches!(
        stop,
        StreamStop::Failed(CompletionError::Stream(_))
    ));
}

#[tokio::test]
async fn stalled_stream_hits_idle_timeout() {
    let base_url = start_stalling_server(&format!("data: {}\n\n", chunk("Hi"))).await;
    let gateway = gateway_with_idle_timeout(&base_url, Duration::from_millis(300));

    let mut fragments = Vec::new();
    let stop = tokio::time::timeout(
        Duration::from_secs(5),
        gateway.complete_streaming(
            "q",
            &[],
            |fragment| fragments.push(fragment.to_string()),
            registration(),
        ),
    )
    .await
    .expect("idle timeout ends the call")
    .unwrap_err();

    assert_eq!(fragments, vec!["Hi"]);
    match stop {
        StreamStop::Failed(error) => {
            assert!(matches!(error, CompletionError::Transport(_)));
            assert_eq!(error.kind(), FailureKind::Other);
        }
        StreamStop::Cancelled => panic!("expected failure"),
    }
}

#[tokio::test]
async fn invalid_utf8_event_fails_the_stream() {
    let server = start_mock().await;
    let mut body = format!("data: {}\n\n", chunk("ok ")).into_bytes();
    body.extend_from_slice(b"data: \xff\xfe\n\n");
    body.extend_from_slice(b"data: [DONE]\n\n");
    mount_stream_bytes(&server, body).await;

    let mut fragments = Vec::new();
    let stop = gateway(&server)
        .complete_streaming(
            "q",
            &[],
            |fragment| fragments.push(fragment.to_string()),
            registration(),
        )
        .await
        .unwrap_err();

    assert_eq!(fragments, vec!["ok "]);
    assert!(matches!(
        stop,
        StreamStop::Failed(CompletionError::Stream(_))
    ));
}

#[tokio::test]
async fn oversized_event_fails_the_stream() {
    let server = start_mock().await;
    let mut body = b"data: ".to_vec();
    body.resize(body.len() + 4 * 1024 * 1024 + 1, b'x');
    mount_stream_bytes(&server, body).await;

    let stop = gateway(&server)
        .complete_streaming("q", &[], |_| {}, registration())
        .await
        .unwrap_err();

    match stop {
        StreamStop::Failed(error) => {
            assert!(matches!(error, CompletionError::Stream(_)));
            assert_eq!(error.kind(), FailureKind::Other);
        }
        StreamStop::Cancelled => panic!("expected failure"),
    }
}

#[tokio::test]
async fn abort_handle_cancels_stream() {
    let server = start_mock().await;
    mount_delayed_stream(&server, &["too late"], Duration::from_secs(2)).await;

    let gateway = gateway(&server);
    let (handle, registration) = AbortHandle::new_pair();
    let mut fragments = 0;

    let (result, ()) = join(
        gateway.complete_streaming("q", &[], |_| fragments += 1, registration),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abort();
        },
    )
    .await;

    assert_eq!(result, Err(StreamStop::Cancelled));
    assert_eq!(fragments, 0);
}
