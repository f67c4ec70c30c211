//! End-to-end engine tests driving scripted pipelines through the full
//! admission, streaming, permission, and cancellation lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use quay_engine::config::Config;
use quay_engine::core::engine::SessionEngine;
use quay_engine::core::error::EngineError;
use quay_engine::core::events::StreamEvent;
use quay_engine::core::pipeline::{Pipeline, PipelineContext};
use quay_types::{PermissionChoice, Role};

/// Adapts a closure into a `Pipeline` so each test can script its own run.
struct FnPipeline<F>(F);

#[async_trait]
impl<F, Fut> Pipeline for FnPipeline<F>
where
    F: Fn(PipelineContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, ctx: PipelineContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

fn engine_with<F, Fut>(f: F) -> SessionEngine
where
    F: Fn(PipelineContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    SessionEngine::new(Config::default(), Arc::new(FnPipeline(f)))
}

fn echo_engine() -> SessionEngine {
    engine_with(|ctx| async move {
        ctx.emit_text("echo: ").await?;
        ctx.emit_text(ctx.input().text().to_string()).await?;
        Ok(())
    })
}

#[tokio::test]
async fn test_message_streams_deltas_then_completes() {
    let engine = echo_engine();
    let joined = engine.join_session(None);

    let events = engine
        .send_message(&joined.session_id, "hello")
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        StreamEvent::TextDelta { text } if text == "echo: "
    ));
    assert!(matches!(
        &events[1],
        StreamEvent::TextDelta { text } if text == "hello"
    ));
    assert!(matches!(
        &events[2],
        StreamEvent::Completed { final_text } if final_text == "echo: hello"
    ));

    let history = engine.get_history(&joined.session_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text, "hello");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text, "echo: hello");
}

#[tokio::test]
async fn test_join_with_unknown_id_mints_a_fresh_session() {
    let engine = echo_engine();

    let joined = engine.join_session(Some("ghost-id"));
    assert_ne!(joined.session_id, "ghost-id");
    assert_eq!(joined.message_count, 0);

    // Only the minted id is addressable.
    assert!(engine.get_history(&joined.session_id).is_some());
    assert!(engine.get_history("ghost-id").is_none());
}

#[tokio::test]
async fn test_permission_suspends_and_resolves_exactly_once() {
    let engine = engine_with(|ctx| async move {
        ctx.emit_text("checking... ").await?;
        let choice = ctx.request_permission("delete scratch.txt?").await?;
        ctx.emit_text(format!("granted: {}", choice.is_allowed())).await?;
        Ok(())
    });
    let joined = engine.join_session(None);
    let session_id = joined.session_id;

    let mut stream = engine.send_message(&session_id, "clean up").unwrap();

    assert!(matches!(
        stream.recv().await,
        Some(StreamEvent::TextDelta { .. })
    ));
    let Some(StreamEvent::PermissionRequested {
        request_id,
        prompt,
        choices,
    }) = stream.recv().await
    else {
        panic!("expected a permission request");
    };
    assert_eq!(prompt, "delete scratch.txt?");
    assert_eq!(choices, PermissionChoice::ALL.to_vec());

    assert!(engine.respond_to_permission(&session_id, &request_id, PermissionChoice::Once));
    // Duplicate responses lose.
    assert!(!engine.respond_to_permission(&session_id, &request_id, PermissionChoice::No));

    let events = stream.collect().await;
    assert!(matches!(
        &events[0],
        StreamEvent::TextDelta { text } if text == "granted: true"
    ));
    assert!(matches!(events.last(), Some(StreamEvent::Completed { .. })));
}

#[tokio::test]
async fn test_foreign_session_cannot_resolve_a_permission() {
    let engine = engine_with(|ctx| async move {
        let choice = ctx.request_permission("run build?").await?;
        ctx.emit_text(format!("{choice:?}")).await?;
        Ok(())
    });
    let a = engine.join_session(None).session_id;
    let b = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&a, "go").unwrap();
    let Some(StreamEvent::PermissionRequested { request_id, .. }) = stream.recv().await else {
        panic!("expected a permission request");
    };

    // The wrong session neither resolves nor consumes the registration.
    assert!(!engine.respond_to_permission(&b, &request_id, PermissionChoice::Once));
    assert!(engine.respond_to_permission(&a, &request_id, PermissionChoice::No));

    let events = stream.collect().await;
    assert!(matches!(events.last(), Some(StreamEvent::Completed { .. })));
}

#[tokio::test]
async fn test_cancel_while_suspended_yields_cancelled_terminal() {
    let engine = engine_with(|ctx| async move {
        ctx.emit_text("about to ask").await?;
        let choice = ctx.request_permission("overwrite main.rs?").await?;
        ctx.emit_text(format!("unreachable: {choice:?}")).await?;
        Ok(())
    });
    let session_id = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&session_id, "edit").unwrap();
    assert!(matches!(
        stream.recv().await,
        Some(StreamEvent::TextDelta { .. })
    ));
    let Some(StreamEvent::PermissionRequested { request_id, .. }) = stream.recv().await else {
        panic!("expected a permission request");
    };

    assert!(engine.cancel_request(&session_id));

    let events = stream.collect().await;
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Cancelled { partial_content: Some(partial) })
            if partial == "about to ask"
    ));

    // The invalidated request can no longer be resolved.
    assert!(!engine.respond_to_permission(&session_id, &request_id, PermissionChoice::Once));

    // Partial assistant content survives in the log.
    let history = engine.get_history(&session_id).unwrap();
    assert_eq!(history.last().unwrap().text, "about to ask");
}

#[tokio::test]
async fn test_cancel_mid_stream_keeps_partial_content() {
    let engine = engine_with(|ctx| async move {
        ctx.emit_text("partial").await?;
        loop {
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let session_id = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&session_id, "long task").unwrap();
    assert!(matches!(
        stream.recv().await,
        Some(StreamEvent::TextDelta { text }) if text == "partial"
    ));

    assert!(engine.cancel_request(&session_id));
    let events = stream.collect().await;
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Cancelled { partial_content: Some(partial) })
            if partial == "partial"
    ));

    // Terminal observed means the session is admittable again.
    assert!(engine.send_message(&session_id, "next").is_ok());
}

#[tokio::test]
async fn test_cancel_idle_session_is_a_reported_noop() {
    let engine = echo_engine();
    let session_id = engine.join_session(None).session_id;

    assert!(!engine.cancel_request(&session_id));

    // The session still works normally afterwards.
    let events = engine
        .send_message(&session_id, "hi")
        .unwrap()
        .collect()
        .await;
    assert!(matches!(events.last(), Some(StreamEvent::Completed { .. })));
}

#[tokio::test]
async fn test_concurrent_request_is_rejected_without_side_effects() {
    let gate = Arc::new(Notify::new());
    let release = Arc::clone(&gate);
    let engine = engine_with(move |ctx| {
        let release = Arc::clone(&release);
        async move {
            ctx.emit_text("working").await?;
            release.notified().await;
            Ok(())
        }
    });
    let session_id = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&session_id, "first").unwrap();
    assert!(matches!(
        stream.recv().await,
        Some(StreamEvent::TextDelta { .. })
    ));

    assert_eq!(
        engine.send_message(&session_id, "second").unwrap_err(),
        EngineError::RequestConflict(session_id.clone())
    );

    gate.notify_one();
    let events = stream.collect().await;
    assert!(matches!(events.last(), Some(StreamEvent::Completed { .. })));

    // The rejected admission left no trace in the log.
    let history = engine.get_history(&session_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "first");
}

#[tokio::test]
async fn test_sessions_stream_independently() {
    let engine = Arc::new(echo_engine());
    let a = engine.join_session(None).session_id;
    let b = engine.join_session(None).session_id;

    let stream_a = engine.send_message(&a, "alpha").unwrap();
    let stream_b = engine.send_message(&b, "beta").unwrap();

    let (events_a, events_b) = tokio::join!(stream_a.collect(), stream_b.collect());
    assert!(matches!(
        events_a.last(),
        Some(StreamEvent::Completed { final_text }) if final_text == "echo: alpha"
    ));
    assert!(matches!(
        events_b.last(),
        Some(StreamEvent::Completed { final_text }) if final_text == "echo: beta"
    ));

    assert_eq!(engine.get_history(&a).unwrap()[0].text, "alpha");
    assert_eq!(engine.get_history(&b).unwrap()[0].text, "beta");
}

#[tokio::test]
async fn test_cancelling_one_session_leaves_the_other_streaming() {
    let engine = engine_with(|ctx| async move {
        ctx.emit_text("working").await?;
        loop {
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let a = engine.join_session(None).session_id;
    let b = engine.join_session(None).session_id;

    let mut stream_a = engine.send_message(&a, "task a").unwrap();
    let mut stream_b = engine.send_message(&b, "task b").unwrap();
    assert!(matches!(
        stream_a.recv().await,
        Some(StreamEvent::TextDelta { .. })
    ));
    assert!(matches!(
        stream_b.recv().await,
        Some(StreamEvent::TextDelta { .. })
    ));

    assert!(engine.cancel_request(&a));
    let events_a = stream_a.collect().await;
    assert!(matches!(events_a.last(), Some(StreamEvent::Cancelled { .. })));

    // B's request is still in flight and terminates on its own cancel.
    assert!(engine.cancel_request(&b));
    let events_b = stream_b.collect().await;
    assert!(matches!(events_b.last(), Some(StreamEvent::Cancelled { .. })));
}

#[tokio::test]
async fn test_always_grant_applies_across_sessions() {
    let engine = engine_with(|ctx| async move {
        let choice = ctx.request_permission("read config?").await?;
        ctx.emit_text(format!("allowed={}", choice.is_allowed())).await?;
        Ok(())
    });
    let a = engine.join_session(None).session_id;
    let b = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&a, "go").unwrap();
    let Some(StreamEvent::PermissionRequested { request_id, .. }) = stream.recv().await else {
        panic!("expected a permission request");
    };
    assert!(engine.respond_to_permission(&a, &request_id, PermissionChoice::Always));
    stream.collect().await;

    // Both sessions now auto-resolve; no further PermissionRequested events.
    for session_id in [&a, &b] {
        let events = engine
            .send_message(session_id, "again")
            .unwrap()
            .collect()
            .await;
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, StreamEvent::PermissionRequested { .. })),
            "expected auto-resolution for {session_id}"
        );
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Completed { final_text }) if final_text == "allowed=true"
        ));
    }
}

#[tokio::test]
async fn test_session_grant_is_scoped_to_its_session() {
    let engine = engine_with(|ctx| async move {
        let choice = ctx.request_permission("run tests?").await?;
        ctx.emit_text(format!("allowed={}", choice.is_allowed())).await?;
        Ok(())
    });
    let a = engine.join_session(None).session_id;
    let b = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&a, "go").unwrap();
    let Some(StreamEvent::PermissionRequested { request_id, .. }) = stream.recv().await else {
        panic!("expected a permission request");
    };
    assert!(engine.respond_to_permission(&a, &request_id, PermissionChoice::Session));
    stream.collect().await;

    // Session A auto-resolves.
    let events = engine.send_message(&a, "again").unwrap().collect().await;
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, StreamEvent::PermissionRequested { .. }))
    );

    // Session B still has to ask.
    let mut stream = engine.send_message(&b, "go").unwrap();
    let Some(StreamEvent::PermissionRequested { request_id, .. }) = stream.recv().await else {
        panic!("expected session B to be prompted");
    };
    assert!(engine.respond_to_permission(&b, &request_id, PermissionChoice::No));
    let events = stream.collect().await;
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Completed { final_text }) if final_text == "allowed=false"
    ));
}

#[tokio::test]
async fn test_clear_session_truncates_log_and_forgets_grants() {
    let engine = engine_with(|ctx| async move {
        let choice = ctx.request_permission("write notes?").await?;
        ctx.emit_text(format!("allowed={}", choice.is_allowed())).await?;
        Ok(())
    });
    let session_id = engine.join_session(None).session_id;

    let mut stream = engine.send_message(&session_id, "go").unwrap();
    let Some(StreamEvent::PermissionRequested { request_id, .. }) = stream.recv().await else {
        panic!("expected a permission request");
    };
    assert!(engine.respond_to_permission(&session_id, &request_id, PermissionChoice::Session));
    stream.collect().await;

    engine.clear_session(&session_id).unwrap();
    assert_eq!(engine.get_history(&session_id).unwrap().len(), 0);

    // Identity survives, but the session grant does not.
    let rejoined = engine.join_session(Some(&session_id));
    assert_eq!(rejoined.session_id, session_id);
    assert_eq!(rejoined.message_count, 0);

    let mut stream = engine.send_message(&session_id, "go").unwrap();
    assert!(matches!(
        stream.recv().await,
        Some(StreamEvent::PermissionRequested { .. })
    ));
    engine.cancel_request(&session_id);
    stream.collect().await;
}

#[tokio::test]
async fn test_clear_session_requires_an_idle_session() {
    let gate = Arc::new(Notify::new());
    let release = Arc::clone(&gate);
    let engine = engine_with(move |_ctx| {
        let release = Arc::clone(&release);
        async move {
            release.notified().await;
            Ok(())
        }
    });
    let session_id = engine.join_session(None).session_id;

    assert_eq!(
        engine.clear_session("ghost").unwrap_err(),
        EngineError::SessionNotFound("ghost".to_string())
    );

    let stream = engine.send_message(&session_id, "busy").unwrap();
    assert_eq!(
        engine.clear_session(&session_id).unwrap_err(),
        EngineError::RequestConflict(session_id.clone())
    );

    gate.notify_one();
    stream.collect().await;
    assert!(engine.clear_session(&session_id).is_ok());
}

#[tokio::test]
async fn test_recent_sessions_reflect_activity() {
    let engine = echo_engine();
    let first = engine.join_session(None).session_id;
    let second = engine.join_session(None).session_id;

    engine
        .send_message(&first, "make the parser faster")
        .unwrap()
        .collect()
        .await;

    let recent = engine.get_recent_sessions(None);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, first);
    assert_eq!(recent[0].title.as_deref(), Some("make the parser faster"));
    assert_eq!(recent[1].id, second);

    assert_eq!(engine.get_recent_sessions(Some(1)).len(), 1);
}
