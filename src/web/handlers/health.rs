use salvo::prelude::*;
use serde_json::json;

use crate::web::web_state;

#[handler]
pub async fn health_check(res: &mut Response) {
    let state = web_state();

    res.render(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "reconciled": state.voice.is_ready(),
        "tracked_channels": state.voice.tracked_channels(),
        "pending_deletions": state.voice.pending_deletions(),
    })));
}
