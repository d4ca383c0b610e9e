//! PostgreSQL [`UserStore`](super::UserStore).
//!
//! Requires the `postgres` feature flag (enabled by default):
//! ```toml
//! [dependencies]
//! yordamchi = { features = ["postgres"] }
//! ```

#[cfg(feature = "postgres")]
mod inner {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;

    use crate::error::StoreError;
    use crate::storage::{utc_day_start, ActivityCount, ActivityRecord, UserRecord, UserStats, UserStore};

    type CountRow = (i64, Option<String>, i64);
    type UserRow = (i64, Option<String>, DateTime<Utc>, Option<DateTime<Utc>>, bool, Option<NaiveDate>);

    fn count_from_row((user_id, username, activity_count): CountRow) -> ActivityCount {
        ActivityCount {
            user_id,
            username,
            activity_count,
        }
    }

    fn user_from_row(row: UserRow) -> UserRecord {
        let (user_id, username, created_at, last_seen, is_active, last_pinned_date) = row;
        UserRecord {
            user_id,
            username,
            created_at,
            last_seen,
            is_active,
            last_pinned_date,
        }
    }

    /// PostgreSQL store for users, admins and activity.
    #[derive(Clone)]
    pub struct PgStore {
        pool: PgPool,
    }

    impl PgStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        /// Connect with a small pool.
        pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
            let pool = PgPoolOptions::new().max_connections(5).connect(database_url).await?;
            Ok(Self::new(pool))
        }

        pub async fn close(&self) {
            self.pool.close().await;
        }

        async fn most_active_since(&self, since: DateTime<Utc>, exclude: i64) -> Result<Option<ActivityCount>, StoreError> {
            let row: Option<CountRow> = sqlx::query_as(
                r#"
                SELECT user_id, username, COUNT(*) AS activity_count
                FROM user_activity
                WHERE activity_time >= $1
                  AND user_id != $2
                GROUP BY user_id, username
                ORDER BY activity_count DESC, user_id
                LIMIT 1
                "#,
            )
            .bind(since)
            .bind(exclude)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(count_from_row))
        }
    }

    #[async_trait]
    impl UserStore for PgStore {
        async fn migrate(&self, admin_id: Option<i64>, superadmin_id: Option<i64>) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id BIGINT PRIMARY KEY,
                    username VARCHAR(100),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    last_seen TIMESTAMPTZ,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    last_pinned_date DATE
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS admins (
                    user_id BIGINT PRIMARY KEY,
                    created_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query("CREATE TABLE IF NOT EXISTS super_admins (user_id BIGINT PRIMARY KEY)")
                .execute(&self.pool)
                .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS user_activity (
                    id SERIAL PRIMARY KEY,
                    user_id BIGINT REFERENCES users(user_id),
                    username VARCHAR(100),
                    activity_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    activity_type VARCHAR(50)
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            // Additive migrations for databases created by older versions.
            for statement in [
                "ALTER TABLE users ADD COLUMN IF NOT EXISTS last_pinned_date DATE",
                "ALTER TABLE admins ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ DEFAULT NOW()",
                "UPDATE admins SET created_at = NOW() - INTERVAL '30 days' WHERE created_at IS NULL",
            ] {
                sqlx::query(statement).execute(&self.pool).await?;
            }

            if let Some(id) = admin_id.filter(|id| *id != 0) {
                self.add_admin(id).await?;
            }
            if let Some(id) = superadmin_id.filter(|id| *id != 0) {
                sqlx::query("INSERT INTO super_admins (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }

            tracing::debug!("user tables migrated");
            Ok(())
        }

        async fn save_user(&self, user_id: i64, username: Option<&str>) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO users (user_id, username, last_seen)
                VALUES ($1, $2, NOW())
                ON CONFLICT (user_id) DO UPDATE SET
                    username = EXCLUDED.username,
                    last_seen = NOW(),
                    is_active = TRUE
                "#,
            )
            .bind(user_id)
            .bind(username)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn log_activity(&self, user_id: i64, username: Option<&str>, activity_type: &str) -> Result<(), StoreError> {
            sqlx::query("INSERT INTO user_activity (user_id, username, activity_type) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(username)
                .bind(activity_type)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn active_user_ids(&self) -> Result<Vec<i64>, StoreError> {
            let ids: Vec<i64> = sqlx::query_scalar("SELECT user_id FROM users WHERE is_active = TRUE ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
            Ok(ids)
        }

        async fn deactivate_user(&self, user_id: i64) -> Result<(), StoreError> {
            sqlx::query("UPDATE users SET is_active = FALSE WHERE user_id = $1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn active_users_count(&self) -> Result<i64, StoreError> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
                .fetch_one(&self.pool)
                .await?;
            Ok(count)
        }

        async fn user_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError> {
            let id: Option<i64> = sqlx::query_scalar("SELECT user_id FROM users WHERE username = $1 LIMIT 1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
            Ok(id)
        }

        async fn add_admin(&self, user_id: i64) -> Result<(), StoreError> {
            sqlx::query("INSERT INTO admins (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn remove_admin(&self, user_id: i64) -> Result<bool, StoreError> {
            let result = sqlx::query("DELETE FROM admins WHERE user_id = $1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_admins(&self) -> Result<Vec<i64>, StoreError> {
            let ids: Vec<i64> = sqlx::query_scalar("SELECT user_id FROM admins ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
            Ok(ids)
        }

        async fn is_admin(&self, user_id: i64) -> Result<bool, StoreError> {
            let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM admins WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(found)
        }

        async fn is_superadmin(&self, user_id: i64) -> Result<bool, StoreError> {
            let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM super_admins WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(found)
        }

        async fn top_users(&self, days: i64, limit: i64) -> Result<Vec<ActivityCount>, StoreError> {
            let rows: Vec<CountRow> = sqlx::query_as(
                r#"
                SELECT user_id, username, COUNT(*) AS activity_count
                FROM user_activity
                WHERE activity_time >= $1
                  AND user_id NOT IN (SELECT user_id FROM admins)
                GROUP BY user_id, username
                ORDER BY activity_count DESC, user_id
                LIMIT $2
                "#,
            )
            .bind(Utc::now() - Duration::days(days))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(count_from_row).collect())
        }

        async fn stats(&self, exclude: Option<i64>) -> Result<UserStats, StoreError> {
            // 0 is never a Telegram user id.
            let exclude = exclude.unwrap_or(0);
            let now = Utc::now();

            let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE user_id != $1")
                .bind(exclude)
                .fetch_one(&self.pool)
                .await?;

            let most_active_30_days = self.most_active_since(now - Duration::days(30), exclude).await?;
            let most_active_today = self.most_active_since(utc_day_start(now), exclude).await?;

            let newest: Option<UserRow> = sqlx::query_as(
                r#"
                SELECT user_id, username, created_at, last_seen, is_active, last_pinned_date
                FROM users
                WHERE user_id != $1
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(exclude)
            .fetch_optional(&self.pool)
            .await?;

            Ok(UserStats {
                total_users,
                most_active_30_days,
                most_active_today,
                newest_user: newest.map(user_from_row),
            })
        }

        async fn inactive_users(&self, idle_days: i64) -> Result<Vec<i64>, StoreError> {
            let ids: Vec<i64> = sqlx::query_scalar(
                "SELECT user_id FROM users WHERE last_seen < $1 AND is_active = TRUE ORDER BY user_id",
            )
            .bind(Utc::now() - Duration::days(idle_days))
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }

        async fn touch_last_seen(&self, user_id: i64) -> Result<(), StoreError> {
            sqlx::query("UPDATE users SET last_seen = NOW() WHERE user_id = $1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn last_pinned_date(&self, user_id: i64) -> Result<Option<NaiveDate>, StoreError> {
            let date: Option<Option<NaiveDate>> =
                sqlx::query_scalar("SELECT last_pinned_date FROM users WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(date.flatten())
        }

        async fn set_last_pinned_date(&self, user_id: i64, date: NaiveDate) -> Result<(), StoreError> {
            sqlx::query("UPDATE users SET last_pinned_date = $1 WHERE user_id = $2")
                .bind(date)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
            let rows: Vec<UserRow> = sqlx::query_as(
                r#"
                SELECT user_id, username, created_at, last_seen, is_active, last_pinned_date
                FROM users
                ORDER BY user_id
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(user_from_row).collect())
        }

        async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityRecord>, StoreError> {
            let rows: Vec<(i64, Option<String>, DateTime<Utc>, Option<String>)> = sqlx::query_as(
                r#"
                SELECT user_id, username, activity_time, activity_type
                FROM user_activity
                ORDER BY activity_time DESC, id DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|(user_id, username, activity_time, activity_type)| ActivityRecord {
                    user_id,
                    username,
                    activity_time,
                    activity_type: activity_type.unwrap_or_default(),
                })
                .collect())
        }
    }

}

#[cfg(feature = "postgres")]
pub use inner::*;
