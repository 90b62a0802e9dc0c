//! The per-domain collection catalog.
//!
//! Each domain hook of the app collapses to one of these specs: a collection
//! name, its natural display order, an optional natural uniqueness key, and
//! its freshness windows. Everything else is shared machinery.

use std::time::Duration;
use vita_remote::OrderBy;

/// Configuration for one synced collection.
#[derive(Debug, Clone)]
pub struct DomainSpec {
    /// Remote collection (table) name.
    pub collection: &'static str,
    /// The domain's natural order, re-applied after every mutation and merge.
    pub order: OrderBy,
    /// Payload pointers identifying a row uniquely within one owner scope.
    /// Domains with a natural key insert through upsert, making writes safe
    /// to retry.
    pub natural_key: Option<Vec<&'static str>>,
    /// How long a fetched list stays trustworthy.
    pub cache_ttl: Duration,
    /// Minimum spacing between logically identical fetches.
    pub cooldown: Duration,
}

impl DomainSpec {
    fn new(collection: &'static str, order: OrderBy) -> Self {
        Self {
            collection,
            order,
            natural_key: None,
            cache_ttl: Duration::from_secs(120),
            cooldown: Duration::from_secs(2),
        }
    }

    fn natural_key(mut self, pointers: &[&'static str]) -> Self {
        self.natural_key = Some(pointers.to_vec());
        self
    }

    fn ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Scheduled activities, ordered by date then start time.
    #[must_use]
    pub fn activities() -> Self {
        Self::new("activities", OrderBy::asc("/date").then_asc("/time"))
    }

    /// Logged meals, ordered by date then time eaten.
    #[must_use]
    pub fn meals() -> Self {
        Self::new("meals", OrderBy::asc("/date").then_asc("/time"))
    }

    /// Daily water intake, one row per date.
    #[must_use]
    pub fn water_intake() -> Self {
        Self::new("water_intake", OrderBy::asc("/date")).natural_key(&["/date"])
    }

    /// Daily mood logs, one row per date; a re-submit replaces the entry.
    #[must_use]
    pub fn mood_logs() -> Self {
        Self::new("mood_logs", OrderBy::asc("/log_date"))
            .natural_key(&["/log_date"])
            .ttl(Duration::from_secs(60))
    }

    /// Coach-client chat messages, oldest first. Scoped to a user pair.
    #[must_use]
    pub fn messages() -> Self {
        let mut spec = Self::new("messages", OrderBy::asc("/sent_at"));
        spec.cache_ttl = Duration::from_secs(60);
        spec.cooldown = Duration::from_secs(1);
        spec
    }

    /// In-app notifications, newest first.
    #[must_use]
    pub fn notifications() -> Self {
        Self::new("notifications", OrderBy::desc("/sent_at")).ttl(Duration::from_secs(60))
    }

    /// Tracked health metrics (weight, heart rate, ...), one row per metric
    /// per day.
    #[must_use]
    pub fn health_metrics() -> Self {
        Self::new("health_metrics", OrderBy::asc("/recorded_on"))
            .natural_key(&["/metric_type", "/recorded_on"])
            .ttl(Duration::from_secs(300))
    }

    /// Weekly goals, one row per week and goal type.
    #[must_use]
    pub fn weekly_goals() -> Self {
        Self::new("weekly_goals", OrderBy::asc("/week_start"))
            .natural_key(&["/week_start", "/goal_type"])
            .ttl(Duration::from_secs(300))
    }

    /// Browsable coach directory.
    #[must_use]
    pub fn coaches() -> Self {
        Self::new("coaches", OrderBy::asc("/name")).ttl(Duration::from_secs(300))
    }

    /// Pending coach requests, oldest first.
    #[must_use]
    pub fn coach_requests() -> Self {
        Self::new("coach_requests", OrderBy::asc("/requested_at"))
    }

    /// Active coach-client assignments.
    #[must_use]
    pub fn coach_client_assignments() -> Self {
        Self::new("coach_client_assignments", OrderBy::asc("/assigned_at"))
            .ttl(Duration::from_secs(300))
    }

    /// Workout plans, ordered by the week they start.
    #[must_use]
    pub fn workout_plans() -> Self {
        Self::new("workout_plans", OrderBy::asc("/starts_on")).ttl(Duration::from_secs(300))
    }
}
