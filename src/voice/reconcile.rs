use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serenity::all::{ChannelId, GuildId};
use tracing::{info, warn};

use crate::db::{TempChannelRecord, TempChannelStore};
use crate::web::metrics::Metrics;

use super::VoiceError;
use super::config_store::parse_snowflake;
use super::index::{LifecycleIndex, TrackedChannel};
use super::platform::VoicePlatform;
use super::scheduler::{DeletionOutcome, DeletionScheduler, lifetime_seconds};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Records closed because the guild or channel no longer exists.
    pub finalized: usize,
    /// Channels found empty and deleted.
    pub deleted: usize,
    /// Occupied channels tracked again.
    pub resumed: usize,
    pub failed: usize,
}

/// Startup pass that squares persisted live records with what the platform
/// actually has. Works from records alone, so guilds that disabled the
/// feature are still cleaned up.
pub struct ReconciliationService {
    platform: Arc<dyn VoicePlatform>,
    records: Arc<dyn TempChannelStore>,
    index: Arc<LifecycleIndex>,
    scheduler: Arc<DeletionScheduler>,
}

impl ReconciliationService {
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        records: Arc<dyn TempChannelStore>,
        index: Arc<LifecycleIndex>,
        scheduler: Arc<DeletionScheduler>,
    ) -> Self {
        Self {
            platform,
            records,
            index,
            scheduler,
        }
    }

    pub async fn run(&self) -> Result<ReconciliationReport, VoiceError> {
        let candidates = self.records.list_live_channels().await?;
        info!(candidates = candidates.len(), "reconciling temp channels");

        let mut report = ReconciliationReport::default();
        for record in candidates {
            self.reconcile_record(&record, &mut report).await;
        }

        Metrics::record_reconciliation(
            report.finalized as u64,
            report.deleted as u64,
            report.resumed as u64,
            report.failed as u64,
        );
        info!(
            finalized = report.finalized,
            deleted = report.deleted,
            resumed = report.resumed,
            failed = report.failed,
            "temp channel reconciliation complete"
        );
        Ok(report)
    }

    async fn reconcile_record(&self, record: &TempChannelRecord, report: &mut ReconciliationReport) {
        let ids = parse_snowflake("guild_id", &record.guild_id).and_then(|guild| {
            parse_snowflake("channel_id", &record.channel_id)
                .map(|channel| (GuildId::new(guild), ChannelId::new(channel)))
        });
        let (guild_id, channel_id) = match ids {
            Ok(ids) => ids,
            Err(err) => {
                warn!(record_id = record.id, "closing temp channel record with bad ids: {err}");
                self.close_record(record, report).await;
                return;
            }
        };

        if !self.platform.guild_available(guild_id).await {
            info!(guild_id = %guild_id, channel_id = %channel_id, "guild gone, closing orphaned record");
            self.close_record(record, report).await;
            return;
        }

        let tracked = TrackedChannel {
            guild_id,
            created_at: record.created_at,
        };

        match self.platform.occupancy(guild_id, channel_id).await {
            Ok(None) => {
                info!(guild_id = %guild_id, channel_id = %channel_id, "channel gone, closing orphaned record");
                self.close_record(record, report).await;
            }
            Ok(Some(0)) => {
                self.index.track(channel_id, tracked);
                match self.scheduler.delete_now(guild_id, channel_id).await {
                    DeletionOutcome::Deleted | DeletionOutcome::AlreadyGone => report.deleted += 1,
                    DeletionOutcome::Occupied | DeletionOutcome::Failed => report.failed += 1,
                }
            }
            Ok(Some(occupants)) => {
                self.index.track(channel_id, tracked);
                info!(guild_id = %guild_id, channel_id = %channel_id, occupants, "resumed tracking temp channel");
                report.resumed += 1;
            }
            Err(err) => {
                warn!(guild_id = %guild_id, channel_id = %channel_id, "could not check temp channel: {err}");
                report.failed += 1;
            }
        }
    }

    async fn close_record(&self, record: &TempChannelRecord, report: &mut ReconciliationReport) {
        let now = Utc::now();
        let lifetime = lifetime_seconds(Some(record.created_at), now);
        match self
            .records
            .finalize_channel(&record.channel_id, now, lifetime)
            .await
        {
            Ok(_) => report.finalized += 1,
            Err(err) => {
                warn!(channel_id = %record.channel_id, "failed to close orphaned record: {err}");
                report.failed += 1;
            }
        }
    }
}
