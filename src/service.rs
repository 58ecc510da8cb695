//! Dashboard queries: fetch rows from the data source and turn them into
//! view models.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::db::{DataSource, DataSourceError, Query, Table};
use crate::models::{
    AggregatedBucket, DashboardSnapshot, RecentComment, Row, Statistics, TimeSeriesPoint, UserStat,
};
use crate::processing::{self, group_key, DEFAULT_RANKING_LIMIT};
use crate::timeline::{self, TimeRange};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECENT_COMMENTS: usize = 20;
pub const DEFAULT_FLAG_REASON: &str = "不当内容";
pub const UNCATEGORIZED: &str = "未分类";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Source(#[from] DataSourceError),

    #[error("request timeout after {0:?}")]
    Timeout(Duration),
}

/// Flag state for comments. The backing table has no column for it, so
/// flags live only as long as this value does.
#[derive(Debug, Default)]
pub struct CommentFlags {
    reasons: Mutex<HashMap<String, String>>,
}

impl CommentFlags {
    fn key(id: &Value) -> String {
        group_key(id).unwrap_or_default()
    }

    pub fn flag(&self, id: &Value, reason: &str) {
        self.reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key(id), reason.to_string());
    }

    pub fn unflag(&self, id: &Value) {
        self.reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(id));
    }

    pub fn reason(&self, id: &Value) -> Option<String> {
        self.reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(id))
            .cloned()
    }
}

pub struct DashboardService<S> {
    source: S,
    timeout: Duration,
    flags: CommentFlags,
}

fn str_field(row: &Row, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_string)
}

impl<S: DataSource> DashboardService<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            timeout: DEFAULT_TIMEOUT,
            flags: CommentFlags::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn flags(&self) -> &CommentFlags {
        &self.flags
    }

    /// Races `call` against the timeout and logs any failure before handing
    /// it back. A timed-out call is dropped, not retried.
    async fn guarded<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ServiceError::Timeout(self.timeout)),
        };

        if let Err(err) = &result {
            tracing::error!(operation, "data service error: {err}");
        }
        result
    }

    async fn column(&self, table: Table, column: &str) -> Result<Vec<Row>, DataSourceError> {
        self.source
            .select(&Query::from(table).select(&[column]))
            .await
    }

    pub async fn statistics(&self) -> Result<Statistics, ServiceError> {
        self.guarded("statistics", async {
            let authors = self.column(Table::UserDishes, "user_name").await?;
            let total_users = authors
                .iter()
                .filter_map(|row| row.get("user_name").and_then(group_key))
                .filter(|name| !name.is_empty())
                .collect::<HashSet<_>>()
                .len() as u64;

            Ok::<_, DataSourceError>(Statistics {
                total_users,
                total_dishes: self.source.count(Table::UserDishes).await?,
                total_comments: self.source.count(Table::UserComments).await?,
                total_foods: self.source.count(Table::Foods).await?,
            })
        })
        .await
    }

    pub async fn cuisine_distribution(&self) -> Result<Vec<AggregatedBucket>, ServiceError> {
        self.guarded("cuisine_distribution", async {
            let mut dishes = self.column(Table::UserDishes, "cuisine").await?;
            dishes.retain(|row| row.get("cuisine").and_then(Value::as_str) != Some(""));
            Ok::<_, DataSourceError>(processing::aggregate_by_field(&dishes, "cuisine"))
        })
        .await
    }

    async fn trend(&self, table: Table, range: TimeRange) -> Result<Vec<TimeSeriesPoint>, DataSourceError> {
        let rows = self
            .source
            .select(
                &Query::from(table)
                    .select(&["created_at"])
                    .order("created_at", false),
            )
            .await?;
        Ok(timeline::bucket_by_day(&rows, "created_at", range))
    }

    pub async fn dish_trend(&self, range: TimeRange) -> Result<Vec<TimeSeriesPoint>, ServiceError> {
        self.guarded("dish_trend", self.trend(Table::UserDishes, range))
            .await
    }

    pub async fn comment_timeline(&self, range: TimeRange) -> Result<Vec<TimeSeriesPoint>, ServiceError> {
        self.guarded("comment_timeline", self.trend(Table::UserComments, range))
            .await
    }

    pub async fn user_ranking(&self, limit: usize) -> Result<Vec<UserStat>, ServiceError> {
        self.guarded("user_ranking", async {
            let dishes = self.column(Table::UserDishes, "user_name").await?;
            let comments = self.column(Table::UserComments, "user_name").await?;
            Ok::<_, DataSourceError>(processing::build_user_stats(
                &dishes,
                &comments,
                "user_name",
                limit,
            ))
        })
        .await
    }

    pub async fn expiring_foods(&self) -> Result<Vec<Row>, ServiceError> {
        self.guarded(
            "expiring_foods",
            self.source.select(&Query::from(Table::ExpiringFoods)),
        )
        .await
    }

    pub async fn difficulty_distribution(&self) -> Result<Vec<AggregatedBucket>, ServiceError> {
        self.guarded("difficulty_distribution", async {
            let dishes = self.column(Table::UserDishes, "difficulty").await?;
            Ok::<_, DataSourceError>(processing::aggregate_with_default(
                &dishes,
                "difficulty",
                UNCATEGORIZED,
            ))
        })
        .await
    }

    pub async fn recent_comments(&self, limit: usize) -> Result<Vec<RecentComment>, ServiceError> {
        self.guarded("recent_comments", async {
            let rows = self
                .source
                .select(
                    &Query::from(Table::UserComments)
                        .select(&["id", "user_name", "comment_text", "created_at"])
                        .order("created_at", false)
                        .limit(limit),
                )
                .await?;

            Ok::<_, DataSourceError>(
                rows.iter()
                    .map(|row| {
                        let id = row.get("id").cloned().unwrap_or(Value::Null);
                        let flag_reason = self.flags.reason(&id);
                        RecentComment {
                            user_name: str_field(row, "user_name"),
                            content: str_field(row, "comment_text"),
                            created_at: str_field(row, "created_at"),
                            flagged: flag_reason.is_some(),
                            flag_reason,
                            id,
                        }
                    })
                    .collect(),
            )
        })
        .await
    }

    pub async fn delete_comment(&self, id: &Value) -> Result<bool, ServiceError> {
        self.guarded(
            "delete_comment",
            self.source.delete_by_id(Table::UserComments, id),
        )
        .await?;
        self.flags.unflag(id);
        Ok(true)
    }

    /// Marks a comment locally. Nothing is written to the backend and the
    /// flag is gone after a restart.
    pub fn flag_comment(&self, id: &Value, reason: Option<&str>) {
        let reason = reason.unwrap_or(DEFAULT_FLAG_REASON);
        tracing::warn!(
            comment_id = %id,
            reason,
            "comment flags are not stored in the database; keeping flag locally"
        );
        self.flags.flag(id, reason);
    }

    pub fn unflag_comment(&self, id: &Value) {
        tracing::warn!(
            comment_id = %id,
            "comment flags are not stored in the database; clearing local flag"
        );
        self.flags.unflag(id);
    }

    /// Runs every dashboard query at once. Any failure fails the whole
    /// export.
    pub async fn export_all(&self) -> Result<DashboardSnapshot, ServiceError> {
        self.guarded("export_all", async {
            let (
                statistics,
                cuisine_distribution,
                dish_trend,
                user_ranking,
                expiring_foods,
                comment_timeline,
                difficulty_distribution,
            ) = tokio::try_join!(
                self.statistics(),
                self.cuisine_distribution(),
                self.dish_trend(TimeRange::Month),
                self.user_ranking(DEFAULT_RANKING_LIMIT),
                self.expiring_foods(),
                self.comment_timeline(TimeRange::Month),
                self.difficulty_distribution(),
            )?;

            Ok::<_, ServiceError>(DashboardSnapshot {
                statistics,
                cuisine_distribution,
                dish_trend,
                user_ranking,
                expiring_foods,
                comment_timeline,
                difficulty_distribution,
                exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            })
        })
        .await
    }
}
