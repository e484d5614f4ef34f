//! Demo job handlers and hook listeners.

use std::time::Duration;

use queue_core::{
    HandlerError, HandlerRegistry, Hook, HookPayload, HookRegistry, PayloadDispatcher, job_handler,
};

pub fn registry() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();

    handlers.register(
        "Echo",
        job_handler!(|args| {
            tracing::info!(?args, "Echo job");
            Ok(())
        }),
    );

    handlers.register(
        "Sleep",
        job_handler!(|args| {
            let seconds = args.get("seconds").and_then(|v| v.as_u64()).unwrap_or(5);
            tracing::info!("Sleeping for {} seconds", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(())
        }),
    );

    handlers.register(
        "Fail",
        job_handler!(|args| {
            let broken = args.get("broken").and_then(|v| v.as_bool()).unwrap_or(false);
            if broken {
                Err(HandlerError::broken("Intentional defect"))
            } else {
                Err(HandlerError::failed("Intentional failure"))
            }
        }),
    );

    handlers
}

/// Logs every hook at debug level, and failures louder.
fn log_hook(hook: Hook, payload: HookPayload) -> HookPayload {
    match (&hook, &payload) {
        (Hook::JobFailed | Hook::UnknownChildFailure, HookPayload::ChildExit(report)) => {
            tracing::warn!(
                %hook,
                worker = %report.worker.id,
                queue = %report.job.queue,
                class = %report.job.payload.class,
                status = report.status,
                "Job did not complete"
            );
        }
        (Hook::ForkFailed, HookPayload::ForkFailed(failure)) => {
            tracing::error!(
                worker = %failure.worker.id,
                queue = %failure.job.queue,
                "Could not start a child, job requeued"
            );
        }
        _ => tracing::debug!(%hook, kind = %payload.kind(), "Hook"),
    }
    payload
}

pub fn dispatcher() -> PayloadDispatcher {
    let mut hooks = HookRegistry::new();
    hooks.register_all(&Hook::ALL, log_hook);
    PayloadDispatcher::new(hooks)
}
