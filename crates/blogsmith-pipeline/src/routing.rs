use tracing::debug;

use blogsmith_core::workflow::{Route, WorkflowState};

/// Decide whether the post goes back for another write pass.
///
/// A missing `quality_score` counts as `default_score`. Scores strictly below
/// `threshold` route to [`Route::Write`].
pub fn should_revise(state: &WorkflowState, threshold: u8, default_score: u8) -> Route {
    let score = state.quality_score.unwrap_or(default_score);
    let route = if score < threshold {
        Route::Write
    } else {
        Route::Stop
    };
    debug!(
        score,
        threshold,
        defaulted = state.quality_score.is_none(),
        route = %route,
        "Assessed quality"
    );
    route
}
