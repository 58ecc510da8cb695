use std::fmt::{Display, Write};

use chrono::TimeZone;
use serde_json::Value;

use crate::format::{self, DateFormat, DEFAULT_TRUNCATE_LENGTH};
use crate::models::{AggregatedBucket, DashboardSnapshot, RecentComment, Row, TimeSeriesPoint};
use crate::processing;

fn write_mix(output: &mut String, title: &str, unit: &str, buckets: &[AggregatedBucket]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    if buckets.is_empty() {
        let _ = writeln!(output, "No dishes recorded yet.");
        return;
    }

    for bucket in processing::calculate_percentages(buckets) {
        let _ = writeln!(
            output,
            "- {}: {} {unit} ({:.2}%)",
            bucket.bucket.group_key, bucket.bucket.count, bucket.percentage
        );
    }
}

fn write_series(output: &mut String, title: &str, points: &[TimeSeriesPoint]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    if points.is_empty() {
        let _ = writeln!(output, "No activity in this window.");
        return;
    }

    for point in points {
        let _ = writeln!(output, "- {}: {}", point.date, point.count);
    }
}

fn food_label(food: &Row) -> String {
    ["name", "food_name"]
        .iter()
        .find_map(|field| food.get(*field).and_then(Value::as_str))
        .unwrap_or("unnamed food")
        .to_string()
}

fn write_expiring(output: &mut String, foods: &[Row]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Expiring Soon");

    if foods.is_empty() {
        let _ = writeln!(output, "Nothing is about to expire.");
        return;
    }

    for food in foods {
        let days = food.get("days_remaining").unwrap_or(&Value::Null);
        let urgency = processing::classify_urgency(days);
        let remaining = match days.as_f64() {
            Some(days) => format!("{days} days left"),
            None => "unknown shelf life".to_string(),
        };
        let _ = writeln!(output, "- {}: {remaining} ({urgency})", food_label(food));
    }
}

fn write_comments<Tz>(output: &mut String, comments: &[RecentComment], tz: &Tz)
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Comments");

    if comments.is_empty() {
        let _ = writeln!(output, "No comments yet.");
        return;
    }

    for comment in comments {
        let created_at = comment
            .created_at
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null);
        let when = format::format_date_in(&created_at, DateFormat::DateTime, tz);
        let text = format::truncate_text(
            comment.content.as_deref().unwrap_or_default(),
            DEFAULT_TRUNCATE_LENGTH,
        );
        let author = comment.user_name.as_deref().unwrap_or("anonymous");
        let flag = match &comment.flag_reason {
            Some(reason) if comment.flagged => format!(" [flagged: {reason}]"),
            _ => String::new(),
        };
        let _ = writeln!(output, "- [{when}] {author}: {text}{flag}");
    }
}

/// Renders the dashboard as markdown, with dates shown in `tz`.
pub fn build_report<Tz>(snapshot: &DashboardSnapshot, comments: &[RecentComment], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut output = String::new();
    let stats = &snapshot.statistics;

    let _ = writeln!(output, "# Food Dashboard Report");
    let _ = writeln!(output, "Generated at {}", snapshot.exported_at);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Users: {}", stats.total_users);
    let _ = writeln!(output, "- Dishes: {}", stats.total_dishes);
    let _ = writeln!(output, "- Comments: {}", stats.total_comments);
    let _ = writeln!(output, "- Foods: {}", stats.total_foods);

    write_mix(&mut output, "Cuisine Mix", "dishes", &snapshot.cuisine_distribution);
    write_mix(&mut output, "Difficulty Mix", "dishes", &snapshot.difficulty_distribution);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Active Users");
    let leaderboard = processing::calculate_user_ranking(&snapshot.user_ranking);
    if leaderboard.is_empty() {
        let _ = writeln!(output, "No user activity yet.");
    } else {
        for user in &leaderboard {
            let _ = writeln!(
                output,
                "{}. {}: score {} ({} dishes, {} comments)",
                user.rank.unwrap_or_default(),
                user.user_name,
                user.activity_score,
                user.dish_count,
                user.comment_count
            );
        }
    }

    write_series(&mut output, "Dish Trend", &snapshot.dish_trend);
    write_series(&mut output, "Comment Activity", &snapshot.comment_timeline);
    write_expiring(&mut output, &snapshot.expiring_foods);
    write_comments(&mut output, comments, tz);

    output
}
