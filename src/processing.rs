//! Pure transformations from fetched rows to chart-ready view models.
//!
//! Nothing here touches the data source or the clock; every function takes
//! its input by reference and returns fresh values.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{AggregatedBucket, PercentedBucket, Row, UrgencyLevel, UserStat};

/// Leaderboard length used by [`calculate_user_ranking`].
pub const RANKING_CUTOFF: usize = 10;
pub const DEFAULT_RANKING_LIMIT: usize = 10;

/// Counter that remembers the order in which keys were first seen.
#[derive(Debug, Default)]
struct OrderedCounts {
    index: HashMap<String, usize>,
    entries: Vec<(String, u64)>,
}

impl OrderedCounts {
    fn increment(&mut self, key: String) {
        match self.index.get(&key) {
            Some(&position) => self.entries[position].1 += 1,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    fn into_buckets(self, field: &str) -> Vec<AggregatedBucket> {
        self.entries
            .into_iter()
            .map(|(group_key, count)| AggregatedBucket {
                field: field.to_string(),
                group_key,
                count,
            })
            .collect()
    }
}

/// Largest float that still converts to an integer exactly.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Textual form used as a group key. Strings are taken as-is and other
/// scalars by their JSON text, so `1` and `"1"` share a bucket. Integral
/// floats drop the fraction: `numeric` columns arrive as `1.0`.
pub fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => match number.as_f64() {
            Some(float)
                if number.is_f64() && float.fract() == 0.0 && float.abs() < MAX_EXACT_FLOAT =>
            {
                Some((float as i64).to_string())
            }
            _ => Some(number.to_string()),
        },
        other => Some(other.to_string()),
    }
}

/// Counts rows per distinct value of `field`, skipping missing and null
/// values. Buckets come back by count descending; ties keep first-seen
/// order.
pub fn aggregate_by_field(rows: &[Row], field: &str) -> Vec<AggregatedBucket> {
    let mut counts = OrderedCounts::default();

    for row in rows {
        if let Some(key) = row.get(field).and_then(group_key) {
            counts.increment(key);
        }
    }

    let mut buckets = counts.into_buckets(field);
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets
}

/// Counts rows per value of `field`, filing missing, null and empty values
/// under `fallback`. Buckets stay in first-seen order.
pub fn aggregate_with_default(rows: &[Row], field: &str, fallback: &str) -> Vec<AggregatedBucket> {
    let mut counts = OrderedCounts::default();

    for row in rows {
        let key = row
            .get(field)
            .and_then(group_key)
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| fallback.to_string());
        counts.increment(key);
    }

    counts.into_buckets(field)
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn calculate_percentages(buckets: &[AggregatedBucket]) -> Vec<PercentedBucket> {
    let total: u64 = buckets.iter().map(|bucket| bucket.count).sum();

    buckets
        .iter()
        .map(|bucket| PercentedBucket {
            bucket: bucket.clone(),
            percentage: if total == 0 {
                0.0
            } else {
                round_to_hundredths(bucket.count as f64 / total as f64 * 100.0)
            },
        })
        .collect()
}

/// Presentation ranker: scores, keeps the top ten and numbers them from 1.
pub fn calculate_user_ranking(users: &[UserStat]) -> Vec<UserStat> {
    let mut ranked: Vec<UserStat> = users
        .iter()
        .map(|user| UserStat {
            activity_score: user.dish_count + user.comment_count,
            ..user.clone()
        })
        .collect();

    ranked.sort_by(|a, b| b.activity_score.cmp(&a.activity_score));
    ranked.truncate(RANKING_CUTOFF);

    for (index, user) in ranked.iter_mut().enumerate() {
        user.rank = Some(index as u32 + 1);
    }

    ranked
}

fn user_name(row: &Row, user_field: &str) -> Option<String> {
    row.get(user_field)
        .and_then(group_key)
        .filter(|name| !name.is_empty())
}

/// Builds combined per-user stats from dish and comment rows and returns the
/// top `limit` by activity score. Ranks are left unassigned.
pub fn build_user_stats(
    dish_rows: &[Row],
    comment_rows: &[Row],
    user_field: &str,
    limit: usize,
) -> Vec<UserStat> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut stats: Vec<UserStat> = Vec::new();

    fn slot(index: &mut HashMap<String, usize>, stats: &mut Vec<UserStat>, name: String) -> usize {
        if let Some(&position) = index.get(&name) {
            return position;
        }
        index.insert(name.clone(), stats.len());
        stats.push(UserStat::new(name, 0, 0));
        stats.len() - 1
    }

    for name in dish_rows.iter().filter_map(|row| user_name(row, user_field)) {
        let position = slot(&mut index, &mut stats, name);
        stats[position].dish_count += 1;
    }
    for name in comment_rows.iter().filter_map(|row| user_name(row, user_field)) {
        let position = slot(&mut index, &mut stats, name);
        stats[position].comment_count += 1;
    }

    for stat in &mut stats {
        stat.activity_score = stat.dish_count + stat.comment_count;
    }

    stats.sort_by(|a, b| b.activity_score.cmp(&a.activity_score));
    stats.truncate(limit);
    stats
}

impl UrgencyLevel {
    /// Bounds are inclusive on the more urgent side: 3 is high, 7 is medium.
    pub fn from_days(days_remaining: f64) -> Self {
        if days_remaining <= 3.0 {
            UrgencyLevel::High
        } else if days_remaining <= 7.0 {
            UrgencyLevel::Medium
        } else {
            UrgencyLevel::Low
        }
    }
}

/// Non-numeric input is never urgent.
pub fn classify_urgency(days_remaining: &Value) -> UrgencyLevel {
    days_remaining
        .as_f64()
        .map_or(UrgencyLevel::Low, UrgencyLevel::from_days)
}
