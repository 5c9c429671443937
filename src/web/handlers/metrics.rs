use salvo::prelude::*;

use crate::web::metrics::format_prometheus;
use crate::web::web_state;

#[handler]
pub async fn metrics(res: &mut Response) {
    let state = web_state();
    let uptime_seconds = state.started_at.elapsed().as_secs();

    res.render(Text::Plain(format_prometheus(
        uptime_seconds,
        state.voice.tracked_channels(),
    )));
}
