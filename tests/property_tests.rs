use proptest::prelude::*;
use serde_json::{json, Value};

use food_dashboard::export::{render_csv, CSV_BOM};
use food_dashboard::format::{truncate_text, ELLIPSIS};
use food_dashboard::models::{AggregatedBucket, Row, UserStat};
use food_dashboard::processing::{
    aggregate_by_field, calculate_percentages, calculate_user_ranking, RANKING_CUTOFF,
};
use food_dashboard::timeline::bucket_by_day_at;

use chrono::{Duration, TimeZone, Utc};

fn cuisine_row(value: Option<&str>) -> Row {
    let mut row = Row::new();
    match value {
        Some(cuisine) => {
            row.insert("cuisine".to_string(), Value::String(cuisine.to_string()));
        }
        None => {
            row.insert("cuisine".to_string(), Value::Null);
        }
    }
    row
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

proptest! {
    /// Bucket counts add up to the number of rows with a value.
    #[test]
    fn aggregation_preserves_row_count(
        values in prop::collection::vec(
            prop::option::of(prop_oneof![Just("川菜"), Just("粤菜"), Just("湘菜"), Just("鲁菜")]),
            0..40,
        )
    ) {
        let rows: Vec<Row> = values.iter().map(|value| cuisine_row(*value)).collect();
        let buckets = aggregate_by_field(&rows, "cuisine");

        let total: u64 = buckets.iter().map(|bucket| bucket.count).sum();
        let non_null = values.iter().filter(|value| value.is_some()).count() as u64;
        prop_assert_eq!(total, non_null);

        prop_assert!(buckets.windows(2).all(|pair| pair[0].count >= pair[1].count));
        let mut keys: Vec<_> = buckets.iter().map(|bucket| bucket.group_key.clone()).collect();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), buckets.len());
    }

    /// Percentages sum to roughly 100, or are all zero when nothing was counted.
    #[test]
    fn percentages_sum_to_about_one_hundred(counts in prop::collection::vec(0u64..500, 1..12)) {
        let buckets: Vec<AggregatedBucket> = counts
            .iter()
            .enumerate()
            .map(|(i, count)| AggregatedBucket {
                field: "cuisine".to_string(),
                group_key: format!("c{i}"),
                count: *count,
            })
            .collect();

        let percented = calculate_percentages(&buckets);
        prop_assert_eq!(percented.len(), buckets.len());

        if counts.iter().sum::<u64>() == 0 {
            prop_assert!(percented.iter().all(|bucket| bucket.percentage == 0.0));
        } else {
            let sum: f64 = percented.iter().map(|bucket| bucket.percentage).sum();
            prop_assert!((sum - 100.0).abs() <= 0.1, "sum was {}", sum);
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

proptest! {
    /// The leaderboard is at most ten long, non-increasing, and numbered 1..n.
    #[test]
    fn ranking_is_bounded_sorted_and_numbered(
        users in prop::collection::vec((0u64..50, 0u64..50), 0..30)
    ) {
        let stats: Vec<UserStat> = users
            .iter()
            .enumerate()
            .map(|(i, (dishes, comments))| UserStat::new(format!("user{i}"), *dishes, *comments))
            .collect();

        let ranked = calculate_user_ranking(&stats);
        prop_assert_eq!(ranked.len(), stats.len().min(RANKING_CUTOFF));
        prop_assert!(ranked
            .windows(2)
            .all(|pair| pair[0].activity_score >= pair[1].activity_score));
        for (index, user) in ranked.iter().enumerate() {
            prop_assert_eq!(user.rank, Some(index as u32 + 1));
            prop_assert_eq!(user.activity_score, user.dish_count + user.comment_count);
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting and export
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn truncation_length_is_bounded(text in "\\PC{0,120}", max in 1usize..80) {
        let truncated = truncate_text(&text, max);
        let length = text.chars().count();
        if length <= max {
            prop_assert_eq!(truncated, text);
        } else {
            prop_assert_eq!(truncated.chars().count(), max + ELLIPSIS.chars().count());
            prop_assert!(truncated.ends_with(ELLIPSIS));
        }
    }

    /// Whatever goes into a cell comes back out of a CSV reader unchanged.
    #[test]
    fn csv_cells_survive_a_reader(value in "[a-z,\"\n 菜]{0,20}") {
        let mut row = Row::new();
        row.insert("v".to_string(), Value::String(value.clone()));
        row.insert("n".to_string(), json!(1));

        let text = render_csv(&[row], None).unwrap();
        prop_assert!(text.starts_with(CSV_BOM));

        let mut reader = csv::Reader::from_reader(text.trim_start_matches(CSV_BOM).as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        prop_assert_eq!(&record[0], value.as_str());
        prop_assert_eq!(&record[1], "1");
    }
}

// ---------------------------------------------------------------------------
// Time buckets
// ---------------------------------------------------------------------------

proptest! {
    /// Rows older than the window never show up; rows inside are all counted.
    #[test]
    fn window_filters_old_rows(offsets in prop::collection::vec(0i64..(60 * 24), 0..30)) {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let rows: Vec<Row> = offsets
            .iter()
            .map(|hours| {
                let mut row = Row::new();
                let at = now - Duration::hours(*hours);
                row.insert("created_at".to_string(), Value::String(at.to_rfc3339()));
                row
            })
            .collect();

        let points = bucket_by_day_at(&rows, "created_at", 7, &now);
        let cutoff = (now - Duration::days(7)).date_naive().format("%Y-%m-%d").to_string();

        prop_assert!(points.iter().all(|point| point.date >= cutoff));
        prop_assert!(points.windows(2).all(|pair| pair[0].date < pair[1].date));
        let inside = offsets.iter().filter(|hours| **hours <= 7 * 24).count() as u64;
        prop_assert_eq!(points.iter().map(|point| point.count).sum::<u64>(), inside);
    }
}

#[test]
fn csv_escapes_comma_and_quote() {
    let mut row = Row::new();
    row.insert("v".to_string(), json!("a,\"b"));
    let text = render_csv(&[row], None).unwrap();
    assert!(text.contains("\"a,\"\"b\""));
}
