//! User tracking and admin bookkeeping.
//!
//! [`UserStore`] is implemented by [`MemoryStore`] and, with the `postgres`
//! feature, by [`PgStore`](pg_store::PgStore).

pub mod memory_store;
pub mod pg_store;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::StoreError;

pub use memory_store::MemoryStore;

/// Activity types written by the handlers.
pub mod activity {
    pub const START: &str = "start";
    pub const MESSAGE: &str = "message";
    pub const PHOTO: &str = "photo";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_pinned_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub activity_time: DateTime<Utc>,
    pub activity_type: String,
}

/// A user with the number of activity rows in some window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityCount {
    pub user_id: i64,
    pub username: Option<String>,
    pub activity_count: i64,
}

/// Figures shown on the admin statistics screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserStats {
    pub total_users: i64,
    pub most_active_30_days: Option<ActivityCount>,
    pub most_active_today: Option<ActivityCount>,
    pub newest_user: Option<UserRecord>,
}

/// Persistent user store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create tables, seed the configured admin and super-admin.
    async fn migrate(&self, admin_id: Option<i64>, superadmin_id: Option<i64>) -> Result<(), StoreError>;

    /// Insert or refresh a user: updates username and `last_seen`,
    /// reactivates a deactivated user.
    async fn save_user(&self, user_id: i64, username: Option<&str>) -> Result<(), StoreError>;

    async fn log_activity(&self, user_id: i64, username: Option<&str>, activity_type: &str) -> Result<(), StoreError>;

    async fn active_user_ids(&self) -> Result<Vec<i64>, StoreError>;

    async fn deactivate_user(&self, user_id: i64) -> Result<(), StoreError>;

    async fn active_users_count(&self) -> Result<i64, StoreError>;

    /// Lookup by username, without the leading `@`.
    async fn user_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError>;

    async fn add_admin(&self, user_id: i64) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    async fn remove_admin(&self, user_id: i64) -> Result<bool, StoreError>;

    async fn list_admins(&self) -> Result<Vec<i64>, StoreError>;

    async fn is_admin(&self, user_id: i64) -> Result<bool, StoreError>;

    async fn is_superadmin(&self, user_id: i64) -> Result<bool, StoreError>;

    /// Most active non-admin users over the last `days` days.
    async fn top_users(&self, days: i64, limit: i64) -> Result<Vec<ActivityCount>, StoreError>;

    /// Statistics, leaving `exclude` out of every figure.
    async fn stats(&self, exclude: Option<i64>) -> Result<UserStats, StoreError>;

    /// Active users whose `last_seen` is older than `idle_days`.
    async fn inactive_users(&self, idle_days: i64) -> Result<Vec<i64>, StoreError>;

    async fn touch_last_seen(&self, user_id: i64) -> Result<(), StoreError>;

    async fn last_pinned_date(&self, user_id: i64) -> Result<Option<NaiveDate>, StoreError>;

    async fn set_last_pinned_date(&self, user_id: i64, date: NaiveDate) -> Result<(), StoreError>;

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Newest activity rows first.
    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityRecord>, StoreError>;
}

/// Start of the current UTC day.
pub(crate) fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}
