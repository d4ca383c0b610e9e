//! In-memory [`UserStore`], used when no database is configured.
//!
//! Nothing survives a restart. Activity rows older than the longest report
//! window are pruned once the row limit is reached.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;

use super::{utc_day_start, ActivityCount, ActivityRecord, UserRecord, UserStats, UserStore};
use crate::error::StoreError;

/// Longest window any report looks at.
const ACTIVITY_RETENTION_DAYS: i64 = 30;
const DEFAULT_ACTIVITY_LIMIT: usize = 100_000;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<i64, UserRecord>,
    admins: BTreeSet<i64>,
    super_admins: BTreeSet<i64>,
    activity: Vec<ActivityRecord>,
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    activity_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_activity_limit(DEFAULT_ACTIVITY_LIMIT)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `limit` activity rows.
    pub fn with_activity_limit(limit: usize) -> Self {
        Self {
            inner: RwLock::default(),
            activity_limit: limit.max(1),
        }
    }

    /// Record activity at an explicit time.
    pub fn log_activity_at(&self, user_id: i64, username: Option<&str>, activity_type: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.write();
        inner.activity.push(ActivityRecord {
            user_id,
            username: username.map(str::to_string),
            activity_time: at,
            activity_type: activity_type.to_string(),
        });
        if inner.activity.len() > self.activity_limit {
            prune_activity(&mut inner.activity, self.activity_limit, Utc::now());
        }
    }

    /// Overwrite `last_seen` of a known user.
    pub fn set_last_seen(&self, user_id: i64, at: DateTime<Utc>) {
        if let Some(user) = self.inner.write().users.get_mut(&user_id) {
            user.last_seen = Some(at);
        }
    }

    /// Counts per user since `since`, highest first.
    fn counts_since(inner: &Inner, since: DateTime<Utc>, skip: impl Fn(i64) -> bool) -> Vec<ActivityCount> {
        let mut counts: HashMap<i64, ActivityCount> = HashMap::new();
        for row in inner.activity.iter().filter(|a| a.activity_time >= since && !skip(a.user_id)) {
            let entry = counts.entry(row.user_id).or_insert_with(|| ActivityCount {
                user_id: row.user_id,
                username: None,
                activity_count: 0,
            });
            entry.activity_count += 1;
            if row.username.is_some() {
                entry.username = row.username.clone();
            }
        }
        let mut counts: Vec<_> = counts.into_values().collect();
        counts.sort_by(|a, b| b.activity_count.cmp(&a.activity_count).then(a.user_id.cmp(&b.user_id)));
        counts
    }
}

/// Drop rows past retention, then the oldest rows beyond `limit`.
fn prune_activity(rows: &mut Vec<ActivityRecord>, limit: usize, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(ACTIVITY_RETENTION_DAYS);
    rows.retain(|row| row.activity_time >= cutoff);
    if rows.len() > limit {
        rows.sort_by_key(|row| row.activity_time);
        let excess = rows.len() - limit;
        rows.drain(..excess);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn migrate(&self, admin_id: Option<i64>, superadmin_id: Option<i64>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.admins.extend(admin_id.filter(|id| *id != 0));
        inner.super_admins.extend(superadmin_id.filter(|id| *id != 0));
        Ok(())
    }

    async fn save_user(&self, user_id: i64, username: Option<&str>) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let user = inner.users.entry(user_id).or_insert_with(|| UserRecord {
            user_id,
            username: None,
            created_at: now,
            last_seen: None,
            is_active: true,
            last_pinned_date: None,
        });
        user.username = username.map(str::to_string);
        user.last_seen = Some(now);
        user.is_active = true;
        Ok(())
    }

    async fn log_activity(&self, user_id: i64, username: Option<&str>, activity_type: &str) -> Result<(), StoreError> {
        self.log_activity_at(user_id, username, activity_type, Utc::now());
        Ok(())
    }

    async fn active_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.read();
        let mut ids: Vec<i64> = inner.users.values().filter(|u| u.is_active).map(|u| u.user_id).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn deactivate_user(&self, user_id: i64) -> Result<(), StoreError> {
        if let Some(user) = self.inner.write().users.get_mut(&user_id) {
            user.is_active = false;
        }
        Ok(())
    }

    async fn active_users_count(&self) -> Result<i64, StoreError> {
        Ok(self.inner.read().users.values().filter(|u| u.is_active).count() as i64)
    }

    async fn user_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .map(|u| u.user_id))
    }

    async fn add_admin(&self, user_id: i64) -> Result<(), StoreError> {
        self.inner.write().admins.insert(user_id);
        Ok(())
    }

    async fn remove_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.write().admins.remove(&user_id))
    }

    async fn list_admins(&self) -> Result<Vec<i64>, StoreError> {
        Ok(self.inner.read().admins.iter().copied().collect())
    }

    async fn is_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.read().admins.contains(&user_id))
    }

    async fn is_superadmin(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.read().super_admins.contains(&user_id))
    }

    async fn top_users(&self, days: i64, limit: i64) -> Result<Vec<ActivityCount>, StoreError> {
        let inner = self.inner.read();
        let since = Utc::now() - Duration::days(days);
        let mut counts = Self::counts_since(&inner, since, |id| inner.admins.contains(&id));
        counts.truncate(limit.max(0) as usize);
        Ok(counts)
    }

    async fn stats(&self, exclude: Option<i64>) -> Result<UserStats, StoreError> {
        let inner = self.inner.read();
        let now = Utc::now();
        let skip = |id: i64| Some(id) == exclude;

        let total_users = inner.users.keys().filter(|id| !skip(**id)).count() as i64;
        let most_active_30_days = Self::counts_since(&inner, now - Duration::days(30), skip).into_iter().next();
        let most_active_today = Self::counts_since(&inner, utc_day_start(now), skip).into_iter().next();
        let newest_user = inner
            .users
            .values()
            .filter(|u| !skip(u.user_id))
            .max_by_key(|u| (u.created_at, u.user_id))
            .cloned();

        Ok(UserStats {
            total_users,
            most_active_30_days,
            most_active_today,
            newest_user,
        })
    }

    async fn inactive_users(&self, idle_days: i64) -> Result<Vec<i64>, StoreError> {
        let cutoff = Utc::now() - Duration::days(idle_days);
        let inner = self.inner.read();
        let mut ids: Vec<i64> = inner
            .users
            .values()
            .filter(|u| u.is_active && u.last_seen.is_some_and(|seen| seen < cutoff))
            .map(|u| u.user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn touch_last_seen(&self, user_id: i64) -> Result<(), StoreError> {
        self.set_last_seen(user_id, Utc::now());
        Ok(())
    }

    async fn last_pinned_date(&self, user_id: i64) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.inner.read().users.get(&user_id).and_then(|u| u.last_pinned_date))
    }

    async fn set_last_pinned_date(&self, user_id: i64, date: NaiveDate) -> Result<(), StoreError> {
        if let Some(user) = self.inner.write().users.get_mut(&user_id) {
            user.last_pinned_date = Some(date);
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users: Vec<UserRecord> = self.inner.read().users.values().cloned().collect();
        users.sort_by_key(|u| u.user_id);
        Ok(users)
    }

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityRecord>, StoreError> {
        let inner = self.inner.read();
        let mut rows = inner.activity.clone();
        rows.sort_by(|a, b| b.activity_time.cmp(&a.activity_time));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}
