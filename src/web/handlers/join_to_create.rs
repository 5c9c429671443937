use salvo::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use serenity::all::{ChannelId, GuildId, RoleId};

use crate::voice::admin::{DEFAULT_DELETE_DELAY_SECONDS, DEFAULT_USER_COOLDOWN_SECONDS};
use crate::voice::config_store::parse_snowflake;
use crate::voice::{GuildConfig, JoinToCreateSettings, VoiceError};
use crate::web::web_state;

fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}

fn render_voice_error(res: &mut Response, err: &VoiceError) {
    let status = match err {
        VoiceError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        VoiceError::MissingChannel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VoiceError::Platform(_) => StatusCode::BAD_GATEWAY,
        VoiceError::ConfigUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        VoiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    render_error(res, status, &err.to_string());
}

fn guild_param(req: &mut Request) -> Result<GuildId, VoiceError> {
    let raw = req.param::<String>("guild_id").unwrap_or_default();
    parse_snowflake("guild_id", &raw).map(GuildId::new)
}

/// Body of `PUT /guilds/{guild_id}/join-to-create`. Ids are strings, as
/// Discord renders snowflakes in JSON.
#[derive(Debug, Deserialize)]
pub struct SetupBody {
    pub trigger_channel_id: String,
    pub category_id: String,
    #[serde(default = "default_delete_delay_seconds")]
    pub delete_delay_seconds: u32,
    #[serde(default = "default_user_cooldown_seconds")]
    pub user_cooldown_seconds: u32,
    #[serde(default)]
    pub private_vc_role_id: Option<String>,
    #[serde(default)]
    pub force_private: bool,
    #[serde(default)]
    pub min_session_minutes: u32,
}

fn default_delete_delay_seconds() -> u32 {
    DEFAULT_DELETE_DELAY_SECONDS
}

fn default_user_cooldown_seconds() -> u32 {
    DEFAULT_USER_COOLDOWN_SECONDS
}

impl SetupBody {
    pub fn into_settings(self) -> Result<JoinToCreateSettings, VoiceError> {
        let private_vc_role_id = match self.private_vc_role_id.as_deref() {
            Some(role) if !role.is_empty() => Some(RoleId::new(parse_snowflake(
                "private_vc_role_id",
                role,
            )?)),
            _ => None,
        };

        Ok(JoinToCreateSettings {
            trigger_channel_id: ChannelId::new(parse_snowflake(
                "trigger_channel_id",
                &self.trigger_channel_id,
            )?),
            category_id: ChannelId::new(parse_snowflake("category_id", &self.category_id)?),
            delete_delay_seconds: self.delete_delay_seconds,
            user_cooldown_seconds: self.user_cooldown_seconds,
            private_vc_role_id,
            force_private: self.force_private,
            min_session_minutes: self.min_session_minutes,
        })
    }
}

fn config_json(config: &GuildConfig) -> Value {
    json!({
        "trigger_channel_id": config.trigger_channel_id.to_string(),
        "category_id": config.category_id.to_string(),
        "enabled": config.enabled,
        "delete_delay_seconds": config.delete_delay_seconds,
        "user_cooldown_seconds": config.user_cooldown_seconds,
        "private_vc_role_id": config.private_vc_role_id.map(|role| role.to_string()),
        "force_private": config.force_private,
        "min_session_minutes": config.min_session_minutes,
    })
}

#[handler]
pub async fn get_join_to_create(req: &mut Request, res: &mut Response) {
    let guild_id = match guild_param(req) {
        Ok(guild_id) => guild_id,
        Err(err) => return render_voice_error(res, &err),
    };

    match web_state().voice.status(guild_id).await {
        Ok(status) => {
            res.render(Json(json!({
                "guild_id": guild_id.to_string(),
                "configured": status.config.is_some(),
                "config": status.config.as_ref().map(config_json),
                "stats": {
                    "total_channels": status.stats.total_channels,
                    "active_channels": status.stats.active_channels,
                    "average_lifetime_minutes": status.stats.average_lifetime_minutes(),
                },
            })));
        }
        Err(err) => render_voice_error(res, &err),
    }
}

#[handler]
pub async fn put_join_to_create(req: &mut Request, res: &mut Response) {
    let guild_id = match guild_param(req) {
        Ok(guild_id) => guild_id,
        Err(err) => return render_voice_error(res, &err),
    };

    let body = match req.parse_json::<SetupBody>().await {
        Ok(body) => body,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {}", err),
            );
            return;
        }
    };

    let settings = match body.into_settings() {
        Ok(settings) => settings,
        Err(err) => return render_voice_error(res, &err),
    };

    match web_state().voice.setup(guild_id, settings).await {
        Ok(config) => {
            res.render(Json(json!({
                "ok": true,
                "guild_id": guild_id.to_string(),
                "config": config_json(&config),
            })));
        }
        Err(err) => render_voice_error(res, &err),
    }
}

#[handler]
pub async fn disable_join_to_create(req: &mut Request, res: &mut Response) {
    let guild_id = match guild_param(req) {
        Ok(guild_id) => guild_id,
        Err(err) => return render_voice_error(res, &err),
    };

    match web_state().voice.disable(guild_id).await {
        Ok(true) => {
            res.render(Json(json!({ "ok": true, "guild_id": guild_id.to_string() })));
        }
        Ok(false) => {
            render_error(
                res,
                StatusCode::NOT_FOUND,
                "join-to-create is not configured for this guild",
            );
        }
        Err(err) => render_voice_error(res, &err),
    }
}
