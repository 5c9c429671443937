use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{
    Client as SerenityClient, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayIntents, Guild, GuildChannel, GuildId,
    Interaction, Message as SerenityMessage, Ready, ShardManager, UnavailableGuild, VoiceState,
};
use tokio::sync::{Mutex, Notify, RwLock, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::voice::{VoiceCore, VoiceMember, VoiceStateChange};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const READY_TIMEOUT: Duration = Duration::from_secs(30);

pub mod control_panel;
pub mod platform;

pub use self::control_panel::PanelAction;
pub use self::platform::{DiscordSession, SerenityPlatform};

pub fn gateway_intents(use_privileged_intents: bool) -> GatewayIntents {
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    if use_privileged_intents {
        intents | GatewayIntents::GUILD_MEMBERS
    } else {
        intents
    }
}

#[derive(Clone)]
pub struct DiscordClient {
    config: Arc<Config>,
    token: Arc<SecretString>,
    login_state: Arc<Mutex<DiscordLoginState>>,
    voice: Arc<RwLock<Option<Arc<VoiceCore>>>>,
    session: Arc<RwLock<Option<DiscordSession>>>,
    gateway_closed: Arc<Notify>,
}

#[derive(Default)]
struct DiscordLoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
    shard_manager: Option<Arc<ShardManager>>,
}

struct GatewayHandler {
    ready_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    voice: Arc<RwLock<Option<Arc<VoiceCore>>>>,
    session: Arc<RwLock<Option<DiscordSession>>>,
}

impl GatewayHandler {
    async fn voice(&self) -> Option<Arc<VoiceCore>> {
        let voice = self.voice.read().await.clone();
        if voice.is_none() {
            debug!("ignoring discord event before voice core binding");
        }
        voice
    }

    async fn reconcile(&self) {
        let Some(voice) = self.voice().await else {
            warn!("gateway is ready but the voice core is not bound, skipping reconciliation");
            return;
        };
        if let Some(report) = voice.reconcile().await {
            info!(
                finalized = report.finalized,
                deleted = report.deleted,
                resumed = report.resumed,
                failed = report.failed,
                "startup reconciliation complete"
            );
        }
    }
}

fn voice_state_change(old: Option<&VoiceState>, new: &VoiceState) -> Option<VoiceStateChange> {
    let guild_id = new.guild_id?;
    let member = new.member.as_ref()?;

    Some(VoiceStateChange {
        guild_id,
        member: VoiceMember {
            user_id: new.user_id,
            username: member.user.name.clone(),
            display_name: member.display_name().to_string(),
            role_ids: member.roles.clone(),
            bot: member.user.bot,
        },
        before: old.and_then(|state| state.channel_id),
        after: new.channel_id,
    })
}

#[serenity::async_trait]
impl SerenityEventHandler for GatewayHandler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({}) in {} guilds",
            ready.user.name,
            ready.user.id,
            ready.guilds.len()
        );
        *self.session.write().await = Some(DiscordSession {
            http: ctx.http.clone(),
            cache: ctx.cache.clone(),
        });
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }

        // cache_ready never fires for a bot without guilds.
        if ready.guilds.is_empty() {
            self.reconcile().await;
        }
    }

    async fn cache_ready(&self, _ctx: SerenityContext, guilds: Vec<GuildId>) {
        debug!("discord cache ready for {} guilds", guilds.len());
        self.reconcile().await;
    }

    async fn voice_state_update(
        &self,
        _ctx: SerenityContext,
        old: Option<VoiceState>,
        new: VoiceState,
    ) {
        let Some(change) = voice_state_change(old.as_ref(), &new) else {
            debug!(
                user_id = %new.user_id,
                "ignoring voice state update without guild member data"
            );
            return;
        };
        if let Some(voice) = self.voice().await {
            voice.handle_voice_state(change).await;
        }
    }

    async fn channel_delete(
        &self,
        _ctx: SerenityContext,
        channel: GuildChannel,
        _messages: Option<Vec<SerenityMessage>>,
    ) {
        if let Some(voice) = self.voice().await {
            voice.handle_channel_deleted(channel.id).await;
        }
    }

    async fn guild_delete(
        &self,
        _ctx: SerenityContext,
        incomplete: UnavailableGuild,
        _full: Option<Guild>,
    ) {
        if incomplete.unavailable {
            warn!(guild_id = %incomplete.id, "guild became unavailable, keeping its state");
            return;
        }
        if let Some(voice) = self.voice().await {
            voice.handle_guild_removed(incomplete.id).await;
        }
    }

    async fn interaction_create(&self, ctx: SerenityContext, interaction: Interaction) {
        let Interaction::Component(component) = interaction else {
            return;
        };
        let Some(action) = PanelAction::from_custom_id(&component.data.custom_id) else {
            return;
        };
        if let Some(voice) = self.voice().await {
            control_panel::handle_interaction(&ctx, &voice, &component, action).await;
        }
    }
}

impl DiscordClient {
    pub fn new(config: Arc<Config>) -> Self {
        let token = Arc::new(SecretString::from(config.auth.bot_token.clone()));
        Self {
            config,
            token,
            login_state: Arc::new(Mutex::new(DiscordLoginState::default())),
            voice: Arc::new(RwLock::new(None)),
            session: Arc::new(RwLock::new(None)),
            gateway_closed: Arc::new(Notify::new()),
        }
    }

    /// Platform adapter sharing this client's gateway session.
    pub fn platform(&self) -> SerenityPlatform {
        SerenityPlatform::new(self.session.clone())
    }

    pub async fn set_voice(&self, voice: Arc<VoiceCore>) {
        *self.voice.write().await = Some(voice);
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let intents = gateway_intents(self.config.auth.use_privileged_intents);
        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = GatewayHandler {
            ready_sender: Arc::new(Mutex::new(Some(ready_tx))),
            voice: self.voice.clone(),
            session: self.session.clone(),
        };

        let mut gateway_client = SerenityClient::builder(self.token.expose_secret(), intents)
            .event_handler(event_handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;
        let shard_manager = gateway_client.shard_manager.clone();

        let connected = Arc::new(AtomicBool::new(false));
        let gateway_connected = connected.clone();
        let gateway_closed = self.gateway_closed.clone();
        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
            // A gateway that never became ready is retried by `start`.
            if gateway_connected.load(Ordering::SeqCst) {
                gateway_closed.notify_one();
            }
        });

        match tokio::time::timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {
                connected.store(true, Ordering::SeqCst);
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                state.shard_manager = Some(shard_manager);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!("discord gateway exited before receiving Ready event"))
            }
            Err(_) => {
                shard_manager.shutdown_all().await;
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    /// Resolves once the gateway task has exited after a successful login.
    pub async fn closed(&self) {
        self.gateway_closed.notified().await;
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(shard_manager) = state.shard_manager.take() {
            shard_manager.shutdown_all().await;
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        *self.session.write().await = None;
        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }
}
