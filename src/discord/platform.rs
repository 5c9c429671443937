use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    ButtonStyle, Cache, ChannelId, ChannelType, CreateActionRow, CreateButton, CreateChannel,
    CreateEmbed, CreateMessage, GuildId, Http, PermissionOverwrite, PermissionOverwriteType,
    Permissions, RoleId, UserId,
};
use serenity::http::HttpError;
use tokio::sync::RwLock;
use tracing::debug;

use super::control_panel::PanelAction;
use crate::voice::{ChannelShape, CreateTempChannel, PlatformError, VoicePlatform};

const PANEL_COLOR: u32 = 0x5865F2;

/// Gateway handles captured on `Ready`. Platform calls made before that fail
/// with [`PlatformError::Unavailable`].
#[derive(Clone)]
pub struct DiscordSession {
    pub http: Arc<Http>,
    pub cache: Arc<Cache>,
}

#[derive(Clone)]
pub struct SerenityPlatform {
    session: Arc<RwLock<Option<DiscordSession>>>,
}

impl SerenityPlatform {
    pub fn new(session: Arc<RwLock<Option<DiscordSession>>>) -> Self {
        Self { session }
    }

    async fn session(&self) -> Result<DiscordSession, PlatformError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| PlatformError::Unavailable("discord gateway is not ready".to_string()))
    }

    async fn channel_kind(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelType>, PlatformError> {
        let session = self.session().await?;
        let guild = session
            .cache
            .guild(guild_id)
            .ok_or_else(|| PlatformError::Unavailable(format!("guild {} is not cached", guild_id)))?;
        Ok(guild.channels.get(&channel_id).map(|channel| channel.kind))
    }
}

/// @everyone shares its id with the guild.
pub fn everyone_role(guild_id: GuildId) -> RoleId {
    RoleId::new(guild_id.get())
}

/// Overwrites applied when a temporary channel is created. The bot always
/// keeps enough access to move members in and delete the channel later.
pub fn build_overwrites(
    guild_id: GuildId,
    bot_id: UserId,
    owner_id: UserId,
    shape: ChannelShape,
) -> Vec<PermissionOverwrite> {
    let mut overwrites = Vec::with_capacity(3);

    match shape {
        ChannelShape::Public => overwrites.push(PermissionOverwrite {
            allow: Permissions::CONNECT | Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Role(everyone_role(guild_id)),
        }),
        ChannelShape::Private => {
            overwrites.push(PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL,
                deny: Permissions::CONNECT,
                kind: PermissionOverwriteType::Role(everyone_role(guild_id)),
            });
            overwrites.push(PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL
                    | Permissions::CONNECT
                    | Permissions::SPEAK
                    | Permissions::MOVE_MEMBERS
                    | Permissions::MUTE_MEMBERS,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(owner_id),
            });
        }
    }

    overwrites.push(PermissionOverwrite {
        allow: Permissions::VIEW_CHANNEL
            | Permissions::CONNECT
            | Permissions::MANAGE_CHANNELS
            | Permissions::MOVE_MEMBERS,
        deny: Permissions::empty(),
        kind: PermissionOverwriteType::Member(bot_id),
    });

    overwrites
}

pub(crate) fn classify_error(err: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
        let message = response.error.message.clone();
        match response.status_code.as_u16() {
            404 => return PlatformError::NotFound(message),
            403 => return PlatformError::Forbidden(message),
            429 | 500..=599 => return PlatformError::Unavailable(message),
            _ => {}
        }
    }
    PlatformError::Request(err.to_string())
}

fn panel_components() -> Vec<CreateActionRow> {
    let buttons = PanelAction::ALL
        .iter()
        .map(|action| {
            CreateButton::new(action.custom_id())
                .label(action.label())
                .style(ButtonStyle::Secondary)
        })
        .collect();
    vec![CreateActionRow::Buttons(buttons)]
}

#[async_trait]
impl VoicePlatform for SerenityPlatform {
    async fn guild_available(&self, guild_id: GuildId) -> bool {
        match self.session().await {
            Ok(session) => session.cache.guild(guild_id).is_some(),
            Err(_) => false,
        }
    }

    async fn voice_channel_exists(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<bool, PlatformError> {
        Ok(matches!(
            self.channel_kind(guild_id, channel_id).await?,
            Some(ChannelType::Voice | ChannelType::Stage)
        ))
    }

    async fn category_exists(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
    ) -> Result<bool, PlatformError> {
        Ok(matches!(
            self.channel_kind(guild_id, category_id).await?,
            Some(ChannelType::Category)
        ))
    }

    async fn occupancy(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<usize>, PlatformError> {
        let session = self.session().await?;
        let guild = session
            .cache
            .guild(guild_id)
            .ok_or_else(|| PlatformError::Unavailable(format!("guild {} is not cached", guild_id)))?;

        if !guild.channels.contains_key(&channel_id) {
            return Ok(None);
        }

        let connected = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .count();
        Ok(Some(connected))
    }

    async fn create_voice_channel(
        &self,
        request: &CreateTempChannel,
    ) -> Result<ChannelId, PlatformError> {
        let session = self.session().await?;
        let bot_id = session.cache.current_user().id;
        let overwrites =
            build_overwrites(request.guild_id, bot_id, request.owner_id, request.shape);

        let builder = CreateChannel::new(request.name.clone())
            .kind(ChannelType::Voice)
            .category(request.category_id)
            .permissions(overwrites)
            .audit_log_reason(&request.reason);

        let channel = request
            .guild_id
            .create_channel(session.http.as_ref(), builder)
            .await
            .map_err(classify_error)?;
        Ok(channel.id)
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        let session = self.session().await?;
        guild_id
            .move_member(session.http.as_ref(), user_id, channel_id)
            .await
            .map_err(classify_error)?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError> {
        let session = self.session().await?;
        match channel_id.delete(session.http.as_ref()).await {
            Ok(_) => Ok(()),
            Err(err) => match classify_error(err) {
                PlatformError::NotFound(_) => {
                    debug!(channel_id = %channel_id, "channel was already deleted");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    async fn send_control_panel(
        &self,
        channel_id: ChannelId,
        owner_id: UserId,
    ) -> Result<(), PlatformError> {
        let session = self.session().await?;
        let embed = CreateEmbed::new()
            .title("🔒 Private Voice Channel")
            .description(format!(
                "Welcome <@{}>! You own this channel.\nUse the buttons below to control who can join or see it.",
                owner_id
            ))
            .color(PANEL_COLOR);

        channel_id
            .send_message(
                session.http.as_ref(),
                CreateMessage::new()
                    .embed(embed)
                    .components(panel_components()),
            )
            .await
            .map_err(classify_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serenity::all::{
        GuildId, PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, UserId,
    };

    use super::{build_overwrites, everyone_role};
    use crate::voice::ChannelShape;

    const GUILD: GuildId = GuildId::new(100);
    const BOT: UserId = UserId::new(9);
    const OWNER: UserId = UserId::new(42);

    fn find(
        overwrites: &[PermissionOverwrite],
        kind: PermissionOverwriteType,
    ) -> &PermissionOverwrite {
        overwrites
            .iter()
            .find(|overwrite| overwrite.kind == kind)
            .expect("overwrite present")
    }

    #[test]
    fn everyone_role_shares_the_guild_id() {
        assert_eq!(everyone_role(GUILD), RoleId::new(100));
    }

    #[test]
    fn public_channels_are_open_to_everyone() {
        let overwrites = build_overwrites(GUILD, BOT, OWNER, ChannelShape::Public);

        assert_eq!(overwrites.len(), 2);
        let everyone = find(&overwrites, PermissionOverwriteType::Role(RoleId::new(100)));
        assert!(everyone.allow.contains(Permissions::CONNECT | Permissions::VIEW_CHANNEL));
        assert!(everyone.deny.is_empty());
        assert!(
            !overwrites
                .iter()
                .any(|overwrite| overwrite.kind == PermissionOverwriteType::Member(OWNER))
        );
    }

    #[test]
    fn private_channels_are_visible_but_locked() {
        let overwrites = build_overwrites(GUILD, BOT, OWNER, ChannelShape::Private);

        assert_eq!(overwrites.len(), 3);
        let everyone = find(&overwrites, PermissionOverwriteType::Role(RoleId::new(100)));
        assert!(everyone.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(everyone.deny.contains(Permissions::CONNECT));

        let owner = find(&overwrites, PermissionOverwriteType::Member(OWNER));
        assert!(owner.allow.contains(
            Permissions::CONNECT
                | Permissions::SPEAK
                | Permissions::MOVE_MEMBERS
                | Permissions::MUTE_MEMBERS
        ));
    }

    #[test]
    fn bot_keeps_management_access() {
        for shape in [ChannelShape::Public, ChannelShape::Private] {
            let overwrites = build_overwrites(GUILD, BOT, OWNER, shape);
            let bot = find(&overwrites, PermissionOverwriteType::Member(BOT));
            assert!(bot.allow.contains(
                Permissions::CONNECT | Permissions::MANAGE_CHANNELS | Permissions::MOVE_MEMBERS
            ));
        }
    }
}
