//! Buttons posted in private temporary channels so the owner can lock, hide
//! and reopen the channel without moderator help.

use serenity::all::{
    ChannelId, ComponentInteraction, Context as SerenityContext, CreateInteractionResponse,
    CreateInteractionResponseMessage, GuildId, PermissionOverwrite, PermissionOverwriteType,
    Permissions, UserId,
};
use tracing::{info, warn};

use super::platform::{classify_error, everyone_role};
use crate::voice::VoiceCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    Lock,
    Unlock,
    Hide,
    Unhide,
}

impl PanelAction {
    pub const ALL: [PanelAction; 4] = [
        PanelAction::Lock,
        PanelAction::Unlock,
        PanelAction::Hide,
        PanelAction::Unhide,
    ];

    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            "vc_lock" => Some(PanelAction::Lock),
            "vc_unlock" => Some(PanelAction::Unlock),
            "vc_hide" => Some(PanelAction::Hide),
            "vc_unhide" => Some(PanelAction::Unhide),
            _ => None,
        }
    }

    pub fn custom_id(self) -> &'static str {
        match self {
            PanelAction::Lock => "vc_lock",
            PanelAction::Unlock => "vc_unlock",
            PanelAction::Hide => "vc_hide",
            PanelAction::Unhide => "vc_unhide",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PanelAction::Lock => "🔒 Lock",
            PanelAction::Unlock => "🔓 Unlock",
            PanelAction::Hide => "👻 Hide",
            PanelAction::Unhide => "👁️ Unhide",
        }
    }

    fn confirmation(self) -> &'static str {
        match self {
            PanelAction::Lock => "🔒 Channel locked.",
            PanelAction::Unlock => "🔓 Channel unlocked.",
            PanelAction::Hide => "👻 Channel hidden.",
            PanelAction::Unhide => "👁️ Channel visible.",
        }
    }
}

/// New @everyone overwrite for `action`. Bits the action does not touch are
/// carried over from `existing`.
pub fn everyone_overwrite(
    existing: Option<&PermissionOverwrite>,
    guild_id: GuildId,
    action: PanelAction,
) -> PermissionOverwrite {
    let (mut allow, mut deny) = existing
        .map(|overwrite| (overwrite.allow, overwrite.deny))
        .unwrap_or((Permissions::empty(), Permissions::empty()));

    match action {
        PanelAction::Lock => {
            allow.remove(Permissions::CONNECT);
            deny.insert(Permissions::CONNECT);
        }
        PanelAction::Unlock => {
            deny.remove(Permissions::CONNECT);
            allow.insert(Permissions::CONNECT);
        }
        PanelAction::Hide => {
            allow.remove(Permissions::VIEW_CHANNEL | Permissions::CONNECT);
            deny.insert(Permissions::VIEW_CHANNEL | Permissions::CONNECT);
        }
        // Unhiding does not reopen a locked channel.
        PanelAction::Unhide => {
            deny.remove(Permissions::VIEW_CHANNEL);
            allow.insert(Permissions::VIEW_CHANNEL);
        }
    }

    PermissionOverwrite {
        allow,
        deny,
        kind: PermissionOverwriteType::Role(everyone_role(guild_id)),
    }
}

/// Owner overwrite that keeps the owner able to join a locked or hidden
/// channel.
pub fn owner_overwrite(
    existing: Option<&PermissionOverwrite>,
    owner_id: UserId,
) -> PermissionOverwrite {
    let (mut allow, mut deny) = existing
        .map(|overwrite| (overwrite.allow, overwrite.deny))
        .unwrap_or((Permissions::empty(), Permissions::empty()));
    deny.remove(Permissions::VIEW_CHANNEL | Permissions::CONNECT);
    allow.insert(Permissions::VIEW_CHANNEL | Permissions::CONNECT);

    PermissionOverwrite {
        allow,
        deny,
        kind: PermissionOverwriteType::Member(owner_id),
    }
}

pub fn may_use_panel(user_id: UserId, owner_id: Option<UserId>, is_admin: bool) -> bool {
    is_admin || owner_id == Some(user_id)
}

fn cached_overwrites(
    ctx: &SerenityContext,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Vec<PermissionOverwrite> {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| {
            guild
                .channels
                .get(&channel_id)
                .map(|channel| channel.permission_overwrites.clone())
        })
        .unwrap_or_default()
}

async fn apply_action(
    ctx: &SerenityContext,
    core: &VoiceCore,
    component: &ComponentInteraction,
    action: PanelAction,
) -> &'static str {
    let Some(guild_id) = component.guild_id else {
        return "These controls only work inside a server.";
    };
    let channel_id = component.channel_id;

    let owner_id = match core.channel_owner(channel_id).await {
        Ok(Some(owner_id)) => owner_id,
        Ok(None) => return "This is not a private temporary channel.",
        Err(err) => {
            warn!(channel_id = %channel_id, "failed to look up channel owner: {}", err);
            return "Could not verify channel ownership, try again shortly.";
        }
    };

    let is_admin = component
        .member
        .as_ref()
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| permissions.administrator());
    if !may_use_panel(component.user.id, Some(owner_id), is_admin) {
        return "Only the channel owner can use these controls.";
    }

    let overwrites = cached_overwrites(ctx, guild_id, channel_id);
    let everyone_kind = PermissionOverwriteType::Role(everyone_role(guild_id));
    let owner_kind = PermissionOverwriteType::Member(owner_id);
    let existing_everyone = overwrites.iter().find(|overwrite| overwrite.kind == everyone_kind);
    let existing_owner = overwrites.iter().find(|overwrite| overwrite.kind == owner_kind);

    let mut updates = vec![everyone_overwrite(existing_everyone, guild_id, action)];
    if matches!(action, PanelAction::Lock | PanelAction::Hide) {
        updates.push(owner_overwrite(existing_owner, owner_id));
    }

    for overwrite in updates {
        if let Err(err) = channel_id.create_permission(&ctx.http, overwrite).await {
            warn!(
                channel_id = %channel_id,
                action = action.custom_id(),
                "failed to update channel permissions: {}",
                classify_error(err)
            );
            return "I could not update this channel's permissions.";
        }
    }

    info!(
        guild_id = %guild_id,
        channel_id = %channel_id,
        user_id = %component.user.id,
        action = action.custom_id(),
        "control panel action applied"
    );
    action.confirmation()
}

pub async fn handle_interaction(
    ctx: &SerenityContext,
    core: &VoiceCore,
    component: &ComponentInteraction,
    action: PanelAction,
) {
    let reply = apply_action(ctx, core, component, action).await;
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(reply)
            .ephemeral(true),
    );
    if let Err(err) = component.create_response(&ctx.http, response).await {
        warn!(
            channel_id = %component.channel_id,
            "failed to answer control panel interaction: {}",
            err
        );
    }
}
