//! Submission tracking span helpers.

use tracing::Span;

/// Span covering one `update()` pump of a submission's log.
///
/// `log.lines` is declared empty and filled in once the pump finishes.
pub fn start_update_span(submission_id: &str) -> Span {
    tracing::info_span!(
        "submission.update",
        "submission.id" = submission_id,
        "log.lines" = tracing::field::Empty,
    )
}

/// Record a workflow status change on the given span.
pub fn record_workflow_transition(span: &Span, short_id: &str, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(short_id, from, to, "workflow_transition");
    });
}
