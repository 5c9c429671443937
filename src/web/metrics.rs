use std::sync::atomic::{AtomicU64, Ordering};

static CHANNELS_CREATED: AtomicU64 = AtomicU64::new(0);
static CHANNELS_DELETED_BY_TIMER: AtomicU64 = AtomicU64::new(0);
static CHANNELS_DELETED_MANUALLY: AtomicU64 = AtomicU64::new(0);
static CREATIONS_REJECTED_COOLDOWN: AtomicU64 = AtomicU64::new(0);
static CREATIONS_REJECTED_RATE_LIMIT: AtomicU64 = AtomicU64::new(0);
static CREATIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static RECONCILE_FINALIZED: AtomicU64 = AtomicU64::new(0);
static RECONCILE_DELETED: AtomicU64 = AtomicU64::new(0);
static RECONCILE_RESUMED: AtomicU64 = AtomicU64::new(0);
static RECONCILE_FAILED: AtomicU64 = AtomicU64::new(0);
static CONFIG_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CONFIG_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static PENDING_DELETIONS: AtomicU64 = AtomicU64::new(0);

pub struct Metrics;

impl Metrics {
    pub fn channel_created() {
        CHANNELS_CREATED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_deleted_by_timer() {
        CHANNELS_DELETED_BY_TIMER.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_deleted_manually() {
        CHANNELS_DELETED_MANUALLY.fetch_add(1, Ordering::Relaxed);
    }

    pub fn creation_rejected_cooldown() {
        CREATIONS_REJECTED_COOLDOWN.fetch_add(1, Ordering::Relaxed);
    }

    pub fn creation_rejected_rate_limit() {
        CREATIONS_REJECTED_RATE_LIMIT.fetch_add(1, Ordering::Relaxed);
    }

    pub fn creation_failed() {
        CREATIONS_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciliation(finalized: u64, deleted: u64, resumed: u64, failed: u64) {
        RECONCILE_FINALIZED.fetch_add(finalized, Ordering::Relaxed);
        RECONCILE_DELETED.fetch_add(deleted, Ordering::Relaxed);
        RECONCILE_RESUMED.fetch_add(resumed, Ordering::Relaxed);
        RECONCILE_FAILED.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn config_cache_hit() {
        CONFIG_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn config_cache_miss() {
        CONFIG_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending_deletions(count: u64) {
        PENDING_DELETIONS.store(count, Ordering::Relaxed);
    }
}

pub fn format_prometheus(uptime_seconds: u64, tracked_channels: usize) -> String {
    let cache_hits = CONFIG_CACHE_HITS.load(Ordering::Relaxed);
    let cache_misses = CONFIG_CACHE_MISSES.load(Ordering::Relaxed);
    let total_cache = cache_hits + cache_misses;
    let cache_hit_rate = if total_cache > 0 {
        (cache_hits as f64 / total_cache as f64) * 100.0
    } else {
        0.0
    };

    format!(
        r#"# HELP jtc_uptime_seconds Number of seconds the bot has been running
# TYPE jtc_uptime_seconds gauge
jtc_uptime_seconds {}

# HELP jtc_channels_created_total Temp channels created with the member moved in
# TYPE jtc_channels_created_total counter
jtc_channels_created_total {}

# HELP jtc_channels_deleted_total Temp channels deleted, by cause
# TYPE jtc_channels_deleted_total counter
jtc_channels_deleted_total{{cause="timer"}} {}
jtc_channels_deleted_total{{cause="manual"}} {}

# HELP jtc_creations_rejected_total Trigger joins rejected by abuse limits
# TYPE jtc_creations_rejected_total counter
jtc_creations_rejected_total{{reason="cooldown"}} {}
jtc_creations_rejected_total{{reason="rate_limit"}} {}

# HELP jtc_creations_failed_total Trigger joins that failed on the platform or store
# TYPE jtc_creations_failed_total counter
jtc_creations_failed_total {}

# HELP jtc_reconciled_channels_total Startup reconciliation outcomes
# TYPE jtc_reconciled_channels_total counter
jtc_reconciled_channels_total{{outcome="finalized"}} {}
jtc_reconciled_channels_total{{outcome="deleted"}} {}
jtc_reconciled_channels_total{{outcome="resumed"}} {}
jtc_reconciled_channels_total{{outcome="failed"}} {}

# HELP jtc_config_cache_hits_total Number of config cache hits
# TYPE jtc_config_cache_hits_total counter
jtc_config_cache_hits_total {}

# HELP jtc_config_cache_misses_total Number of config cache misses
# TYPE jtc_config_cache_misses_total counter
jtc_config_cache_misses_total {}

# HELP jtc_config_cache_hit_rate_percent Config cache hit rate as percentage
# TYPE jtc_config_cache_hit_rate_percent gauge
jtc_config_cache_hit_rate_percent {}

# HELP jtc_pending_deletions Deletion timers currently pending
# TYPE jtc_pending_deletions gauge
jtc_pending_deletions {}

# HELP jtc_tracked_channels Live temp channels tracked in memory
# TYPE jtc_tracked_channels gauge
jtc_tracked_channels {}
"#,
        uptime_seconds,
        CHANNELS_CREATED.load(Ordering::Relaxed),
        CHANNELS_DELETED_BY_TIMER.load(Ordering::Relaxed),
        CHANNELS_DELETED_MANUALLY.load(Ordering::Relaxed),
        CREATIONS_REJECTED_COOLDOWN.load(Ordering::Relaxed),
        CREATIONS_REJECTED_RATE_LIMIT.load(Ordering::Relaxed),
        CREATIONS_FAILED.load(Ordering::Relaxed),
        RECONCILE_FINALIZED.load(Ordering::Relaxed),
        RECONCILE_DELETED.load(Ordering::Relaxed),
        RECONCILE_RESUMED.load(Ordering::Relaxed),
        RECONCILE_FAILED.load(Ordering::Relaxed),
        cache_hits,
        cache_misses,
        cache_hit_rate,
        PENDING_DELETIONS.load(Ordering::Relaxed),
        tracked_channels,
    )
}
