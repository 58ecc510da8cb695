use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A row as returned by the data source: field name to JSON scalar, in
/// column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// One group produced by the aggregator.
///
/// Serializes with the group key under the grouped field's name, so a
/// cuisine bucket renders as `{"cuisine": "川菜", "count": 2}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedBucket {
    pub field: String,
    pub group_key: String,
    pub count: u64,
}

impl Serialize for AggregatedBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.field, &self.group_key)?;
        map.serialize_entry("count", &self.count)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PercentedBucket {
    pub bucket: AggregatedBucket,
    pub percentage: f64,
}

impl Serialize for PercentedBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(&self.bucket.field, &self.bucket.group_key)?;
        map.serialize_entry("count", &self.bucket.count)?;
        map.serialize_entry("percentage", &self.percentage)?;
        map.end()
    }
}

/// Per-user activity. `rank` stays `None` until the presentation ranker
/// assigns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStat {
    pub user_name: String,
    #[serde(default)]
    pub dish_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub activity_score: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

impl UserStat {
    pub fn new(user_name: impl Into<String>, dish_count: u64, comment_count: u64) -> Self {
        Self {
            user_name: user_name.into(),
            dish_count,
            comment_count,
            activity_score: dish_count + comment_count,
            rank: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    High,
    Medium,
    Low,
}

impl UrgencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyLevel::High => "high",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headline counters shown on the dashboard cards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_users: u64,
    pub total_dishes: u64,
    pub total_comments: u64,
    pub total_foods: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentComment {
    pub id: serde_json::Value,
    pub user_name: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<String>,
    pub flagged: bool,
    pub flag_reason: Option<String>,
}

/// Everything the dashboard shows at once; also the body of a full export.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub statistics: Statistics,
    pub cuisine_distribution: Vec<AggregatedBucket>,
    pub dish_trend: Vec<TimeSeriesPoint>,
    pub user_ranking: Vec<UserStat>,
    pub expiring_foods: Vec<Row>,
    pub comment_timeline: Vec<TimeSeriesPoint>,
    pub difficulty_distribution: Vec<AggregatedBucket>,
    pub exported_at: String,
}
