use salvo::prelude::*;
use secrecy::ExposeSecret;
use serde_json::json;

use crate::web::handlers::{
    health::health_check,
    join_to_create::{disable_join_to_create, get_join_to_create, put_join_to_create},
    metrics::metrics,
};
use crate::web::web_state;

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("metrics").get(metrics))
        .push(
            Router::with_path("guilds")
                .hoop(require_admin_token)
                .push(
                    Router::with_path("{guild_id}/join-to-create")
                        .get(get_join_to_create)
                        .put(put_join_to_create)
                        .push(Router::with_path("disable").post(disable_join_to_create)),
                ),
        )
}

/// Rejects requests without the configured bearer token. Without a token in
/// the configuration every request passes.
#[handler]
pub async fn require_admin_token(req: &mut Request, res: &mut Response, ctrl: &mut FlowCtrl) {
    let Some(expected) = web_state().admin_token.as_ref() else {
        return;
    };

    let header = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok());

    if !bearer_matches(header, expected.expose_secret()) {
        res.status_code(StatusCode::UNAUTHORIZED);
        res.render(Json(json!({ "error": "missing or invalid bearer token" })));
        ctrl.skip_rest();
    }
}

fn bearer_matches(header: Option<&str>, expected: &str) -> bool {
    let Some(token) = header.and_then(|value| value.strip_prefix("Bearer ")) else {
        return false;
    };
    let token = token.trim().as_bytes();
    let expected = expected.as_bytes();
    token.len() == expected.len()
        && token
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
