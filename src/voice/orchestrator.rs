use std::sync::Arc;

use chrono::Utc;
use serenity::all::ChannelId;
use tracing::{error, info, warn};

use crate::db::{TempChannelRecord, TempChannelStore};
use crate::web::metrics::Metrics;

use super::abuse_guard::AbuseGuard;
use super::config_store::GuildConfig;
use super::index::{LifecycleIndex, TrackedChannel};
use super::platform::{ChannelShape, CreateTempChannel, VoiceMember, VoicePlatform};
use super::scheduler::DeletionScheduler;

const MAX_CHANNEL_NAME_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationOutcome {
    Created {
        channel_id: ChannelId,
        shape: ChannelShape,
    },
    OnCooldown,
    RateLimited,
    Failed,
}

/// Turns a join on the trigger channel into a fresh temp channel with the
/// member moved into it, or into nothing at all.
pub struct ChannelOrchestrator {
    platform: Arc<dyn VoicePlatform>,
    records: Arc<dyn TempChannelStore>,
    guard: Arc<AbuseGuard>,
    index: Arc<LifecycleIndex>,
    scheduler: Arc<DeletionScheduler>,
}

impl ChannelOrchestrator {
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        records: Arc<dyn TempChannelStore>,
        guard: Arc<AbuseGuard>,
        index: Arc<LifecycleIndex>,
        scheduler: Arc<DeletionScheduler>,
    ) -> Self {
        Self {
            platform,
            records,
            guard,
            index,
            scheduler,
        }
    }

    pub async fn handle_trigger_join(
        &self,
        config: &GuildConfig,
        member: &VoiceMember,
    ) -> CreationOutcome {
        let guild_id = config.guild_id;

        if !self
            .guard
            .try_consume_user_slot(guild_id, member.user_id, config.user_cooldown())
        {
            info!(guild_id = %guild_id, user_id = %member.user_id, "user on join-to-create cooldown");
            Metrics::creation_rejected_cooldown();
            return CreationOutcome::OnCooldown;
        }

        if !self.guard.try_consume_guild_slot(guild_id) {
            warn!(
                guild_id = %guild_id,
                max_per_minute = self.guard.max_per_minute(),
                "guild exceeded temp channel creation rate limit"
            );
            Metrics::creation_rejected_rate_limit();
            return CreationOutcome::RateLimited;
        }

        let shape = config.shape_for(&member.role_ids);

        match self
            .platform
            .category_exists(guild_id, config.category_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                error!(guild_id = %guild_id, category_id = %config.category_id, "join-to-create category not found");
                Metrics::creation_failed();
                return CreationOutcome::Failed;
            }
            Err(err) => {
                error!(guild_id = %guild_id, "failed to look up join-to-create category: {err}");
                Metrics::creation_failed();
                return CreationOutcome::Failed;
            }
        }

        let request = CreateTempChannel {
            guild_id,
            category_id: config.category_id,
            name: channel_name(&member.display_name, shape),
            shape,
            owner_id: member.user_id,
            reason: format!(
                "Join-to-Create: {} joined trigger channel ({shape})",
                member.username
            ),
        };

        let channel_id = match self.platform.create_voice_channel(&request).await {
            Ok(channel_id) => channel_id,
            Err(err) => {
                error!(guild_id = %guild_id, user_id = %member.user_id, "failed to create temp channel: {err}");
                Metrics::creation_failed();
                return CreationOutcome::Failed;
            }
        };

        let created_at = Utc::now();
        let record = TempChannelRecord {
            id: 0,
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            trigger_channel_id: config.trigger_channel_id.to_string(),
            category_id: config.category_id.to_string(),
            creator_user_id: member.user_id.to_string(),
            creator_username: member.username.clone(),
            is_private: shape.is_private(),
            owner_user_id: shape.is_private().then(|| member.user_id.to_string()),
            owner_username: shape.is_private().then(|| member.username.clone()),
            max_concurrent_users: 0,
            created_at,
            deleted_at: None,
            total_lifetime_seconds: None,
        };

        let tracked = TrackedChannel {
            guild_id,
            created_at,
        };

        if let Err(err) = self.records.insert_temp_channel(&record).await {
            error!(guild_id = %guild_id, channel_id = %channel_id, "failed to persist temp channel record: {err}");
            self.roll_back(config, channel_id, tracked, false).await;
            Metrics::creation_failed();
            return CreationOutcome::Failed;
        }
        self.index.track(channel_id, tracked);

        if let Err(err) = self
            .platform
            .move_member(guild_id, member.user_id, channel_id)
            .await
        {
            error!(
                guild_id = %guild_id,
                channel_id = %channel_id,
                user_id = %member.user_id,
                "failed to move member into temp channel: {err}"
            );
            self.roll_back(config, channel_id, tracked, true).await;
            Metrics::creation_failed();
            return CreationOutcome::Failed;
        }

        Metrics::channel_created();
        info!(
            guild_id = %guild_id,
            channel_id = %channel_id,
            user_id = %member.user_id,
            shape = %shape,
            "created temp channel '{}'",
            request.name
        );

        if shape.is_private() {
            if let Err(err) = self
                .platform
                .send_control_panel(channel_id, member.user_id)
                .await
            {
                warn!(channel_id = %channel_id, "failed to send private channel control panel: {err}");
            }
        }

        CreationOutcome::Created { channel_id, shape }
    }

    /// Removes a channel nobody could be moved into. If the platform refuses
    /// the delete, the channel is left to the deletion timer instead.
    async fn roll_back(
        &self,
        config: &GuildConfig,
        channel_id: ChannelId,
        tracked: TrackedChannel,
        persisted: bool,
    ) {
        // Untracked first so a delete event arriving mid-call is not
        // finalized twice.
        self.index.untrack(channel_id);
        match self.platform.delete_channel(channel_id).await {
            Ok(()) => {
                if persisted {
                    self.scheduler
                        .finalize(channel_id, Some(tracked.created_at))
                        .await;
                }
                info!(channel_id = %channel_id, "rolled back unreachable temp channel");
            }
            Err(err) => {
                error!(channel_id = %channel_id, "failed to roll back temp channel: {err}");
                self.index.track(channel_id, tracked);
                self.scheduler
                    .schedule(config.guild_id, channel_id, config.delete_delay());
            }
        }
    }
}

pub fn channel_name(display_name: &str, shape: ChannelShape) -> String {
    let (prefix, suffix) = match shape {
        ChannelShape::Public => ("", "'s Channel"),
        ChannelShape::Private => ("🔒 ", "'s Private"),
    };
    let budget = MAX_CHANNEL_NAME_CHARS - prefix.chars().count() - suffix.chars().count();
    let display: String = display_name.chars().take(budget).collect();
    format!("{prefix}{display}{suffix}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serenity::all::{ChannelId, GuildId, RoleId};

    use super::{ChannelOrchestrator, CreationOutcome, channel_name};
    use crate::voice::abuse_guard::AbuseGuard;
    use crate::voice::index::LifecycleIndex;
    use crate::voice::platform::ChannelShape;
    use crate::voice::scheduler::DeletionScheduler;
    use crate::voice::testing::{FakePlatform, MemoryTempChannelStore, guild_config, member};

    const GUILD: GuildId = GuildId::new(100);

    struct Harness {
        platform: Arc<FakePlatform>,
        records: Arc<MemoryTempChannelStore>,
        index: Arc<LifecycleIndex>,
        scheduler: Arc<DeletionScheduler>,
        orchestrator: ChannelOrchestrator,
    }

    fn harness(max_per_minute: usize) -> Harness {
        let platform = Arc::new(FakePlatform::new(GUILD));
        platform.add_category(guild_config(GUILD).category_id);
        let records = Arc::new(MemoryTempChannelStore::default());
        let index = Arc::new(LifecycleIndex::new());
        let scheduler = Arc::new(DeletionScheduler::new(
            platform.clone(),
            records.clone(),
            index.clone(),
        ));
        let orchestrator = ChannelOrchestrator::new(
            platform.clone(),
            records.clone(),
            Arc::new(AbuseGuard::new(max_per_minute)),
            index.clone(),
            scheduler.clone(),
        );
        Harness {
            platform,
            records,
            index,
            scheduler,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn public_creation_persists_tracks_and_moves() {
        let h = harness(5);
        let config = guild_config(GUILD);
        let alice = member(1, "alice");

        let outcome = h.orchestrator.handle_trigger_join(&config, &alice).await;

        let CreationOutcome::Created { channel_id, shape } = outcome else {
            panic!("expected creation, got {outcome:?}");
        };
        assert_eq!(shape, ChannelShape::Public);
        assert!(h.index.contains(channel_id));
        assert_eq!(h.platform.moves(), vec![(alice.user_id, channel_id)]);
        assert!(h.platform.panels().is_empty());

        let created = h.platform.created();
        assert_eq!(created[0].name, "alice's Channel");
        assert_eq!(created[0].category_id, config.category_id);

        let record = h.records.record(channel_id).expect("record");
        assert!(record.deleted_at.is_none());
        assert!(!record.is_private);
        assert_eq!(record.owner_user_id, None);
        assert_eq!(record.creator_username, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn private_role_holder_gets_private_channel_and_panel() {
        let h = harness(5);
        let mut config = guild_config(GUILD);
        config.private_vc_role_id = Some(RoleId::new(77));
        let mut bob = member(2, "bob");
        bob.role_ids = vec![RoleId::new(77)];

        let outcome = h.orchestrator.handle_trigger_join(&config, &bob).await;

        let CreationOutcome::Created { channel_id, shape } = outcome else {
            panic!("expected creation, got {outcome:?}");
        };
        assert_eq!(shape, ChannelShape::Private);
        assert_eq!(h.platform.created()[0].name, "🔒 bob's Private");
        assert_eq!(h.platform.panels(), vec![(channel_id, bob.user_id)]);

        let record = h.records.record(channel_id).expect("record");
        assert!(record.is_private);
        assert_eq!(record.owner_user_id.as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_rejection_is_silent_and_side_effect_free() {
        let h = harness(5);
        let config = guild_config(GUILD);
        let alice = member(1, "alice");

        assert!(matches!(
            h.orchestrator.handle_trigger_join(&config, &alice).await,
            CreationOutcome::Created { .. }
        ));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(
            h.orchestrator.handle_trigger_join(&config, &alice).await,
            CreationOutcome::OnCooldown
        );
        assert_eq!(h.platform.created().len(), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(matches!(
            h.orchestrator.handle_trigger_join(&config, &alice).await,
            CreationOutcome::Created { .. }
        ));
        assert_eq!(h.records.live_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn guild_rate_limit_caps_creations() {
        let h = harness(2);
        let config = guild_config(GUILD);

        for user in 1..=2 {
            assert!(matches!(
                h.orchestrator
                    .handle_trigger_join(&config, &member(user, "user"))
                    .await,
                CreationOutcome::Created { .. }
            ));
        }
        assert_eq!(
            h.orchestrator
                .handle_trigger_join(&config, &member(3, "carol"))
                .await,
            CreationOutcome::RateLimited
        );
        assert_eq!(h.platform.created().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_category_aborts_before_creation() {
        let h = harness(5);
        let mut config = guild_config(GUILD);
        config.category_id = ChannelId::new(4040);

        let outcome = h
            .orchestrator
            .handle_trigger_join(&config, &member(1, "alice"))
            .await;

        assert_eq!(outcome, CreationOutcome::Failed);
        assert!(h.platform.created().is_empty());
        assert_eq!(h.records.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_move_rolls_back_channel_and_record() {
        let h = harness(5);
        h.platform.fail_moves(true);
        let config = guild_config(GUILD);

        let outcome = h
            .orchestrator
            .handle_trigger_join(&config, &member(1, "alice"))
            .await;

        assert_eq!(outcome, CreationOutcome::Failed);
        let created = h.platform.created_ids();
        assert_eq!(h.platform.deleted(), created);
        assert!(h.index.is_empty());
        assert_eq!(h.records.live_count(), 0);
        let record = h.records.record(created[0]).expect("history kept");
        assert_eq!(record.total_lifetime_seconds, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_event_during_rollback_is_left_to_the_rollback() {
        let h = harness(5);
        h.platform.fail_moves(true);
        let gate = h.platform.gate_delete();
        let config = guild_config(GUILD);
        let alice = member(1, "alice");

        let (outcome, handled_by_event) = tokio::join!(
            h.orchestrator.handle_trigger_join(&config, &alice),
            async {
                gate.wait_entered().await;
                let channel_id = h.platform.created_ids()[0];
                let finalized = h.scheduler.finalize_manual_deletion(channel_id).await;
                gate.release();
                finalized
            }
        );

        assert_eq!(outcome, CreationOutcome::Failed);
        assert!(!handled_by_event);
        let channel_id = h.platform.created_ids()[0];
        assert_eq!(h.records.finalize_calls(channel_id), 1);
        assert_eq!(h.records.live_count(), 0);
        assert!(h.index.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rollback_leaves_channel_to_the_timer() {
        let h = harness(5);
        h.platform.fail_moves(true);
        h.platform.fail_deletes(true);
        let config = guild_config(GUILD);

        h.orchestrator
            .handle_trigger_join(&config, &member(1, "alice"))
            .await;

        let channel_id = h.platform.created_ids()[0];
        assert!(h.index.contains(channel_id));
        assert!(h.scheduler.is_pending(channel_id));

        h.platform.fail_deletes(false);
        tokio::time::sleep(config.delete_delay() + Duration::from_secs(1)).await;
        assert_eq!(h.platform.deleted(), vec![channel_id]);
        assert_eq!(h.records.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_insert_deletes_the_new_channel() {
        let h = harness(5);
        h.records.fail_inserts(true);

        let outcome = h
            .orchestrator
            .handle_trigger_join(&guild_config(GUILD), &member(1, "alice"))
            .await;

        assert_eq!(outcome, CreationOutcome::Failed);
        assert_eq!(h.platform.deleted(), h.platform.created_ids());
        assert!(h.index.is_empty());
    }

    #[test]
    fn long_display_names_are_truncated() {
        let name = channel_name(&"x".repeat(300), ChannelShape::Private);

        assert_eq!(name.chars().count(), 100);
        assert!(name.starts_with("🔒 x"));
        assert!(name.ends_with("'s Private"));
    }
}
