//! Human-readable notification messages.
//!
//! Messages use the Telegram HTML subset. Device names and error text are
//! escaped before interpolation.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Weekday};

use crate::clock::display_stamp;
use crate::config::ScheduleSettings;
use crate::fleet::{FleetRunSummary, FleetStatus};
use crate::notify::Message;

/// Escapes `&`, `<` and `>` for Telegram HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Formats a duration as `H:MM:SS`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total.div_euclid(3600);
    let minutes = total.rem_euclid(3600).div_euclid(60);
    let seconds = total.rem_euclid(60);
    format!("{hours}:{minutes:02}:{seconds:02}")
}

const fn status_heading(status: FleetStatus) -> (&'static str, &'static str) {
    match status {
        FleetStatus::AllSuccess => ("✅", "Success"),
        FleetStatus::AllFailed => ("❌", "Total failure"),
        FleetStatus::Partial => ("⚠️", "Partial"),
    }
}

/// Summary sent after every fleet run.
#[must_use]
pub fn fleet_summary(summary: &FleetRunSummary, at: &DateTime<FixedOffset>) -> Message {
    let (marker, title) = status_heading(summary.status());
    let mut text = format!(
        "{marker} <b>Network backup - {title}</b>\n\n\
         📊 <b>Summary:</b>\n\
         • Succeeded: {}\n\
         • Failed: {}\n\
         • Duration: {}\n\
         • Date: {}\n",
        summary.succeeded(),
        summary.failed(),
        format_duration(summary.duration),
        display_stamp(at)
    );

    if summary.succeeded() > 0 {
        text.push_str("\n✅ <b>Successful devices:</b>\n");
        for result in summary.successes() {
            text.push_str(&format!(
                "• {} ({} files)\n",
                escape_html(&result.device),
                result.artifacts.len()
            ));
        }
    }
    if summary.failed() > 0 {
        text.push_str("\n❌ <b>Failed devices:</b>\n");
        for result in summary.failures() {
            let reason = result
                .error
                .as_ref()
                .map_or_else(|| String::from("unknown error"), ToString::to_string);
            text.push_str(&format!(
                "• {}: {}\n",
                escape_html(&result.device),
                escape_html(&reason)
            ));
        }
    }
    Message::html(text.trim_end())
}

/// Message sent after a sweep that removed files.
#[must_use]
pub fn cleanup_message(removed: usize, retention_days: u32, at: &DateTime<FixedOffset>) -> Message {
    Message::html(format!(
        "🧹 <b>Backup cleanup</b>\n\n📁 Files removed: {removed}\n📅 Older than: {retention_days} days\n🕐 {}",
        display_stamp(at)
    ))
}

/// Message sent when the scheduler starts.
#[must_use]
pub fn startup_message(
    device_count: usize,
    schedule: &ScheduleSettings,
    retention_days: u32,
    at: &DateTime<FixedOffset>,
) -> Message {
    Message::html(format!(
        "🚀 <b>Network backup service started</b>\n\n\
         📱 Devices configured: {device_count}\n\
         ⏰ Daily backup: {}\n\
         📅 Weekly backup: {} {}\n\
         🧹 Cleanup: {} {}\n\
         📁 Retention: {retention_days} days\n\
         🕐 {}",
        schedule.daily_backup_at.format("%H:%M"),
        weekday_name(schedule.weekly_backup_day),
        schedule.weekly_backup_at.format("%H:%M"),
        weekday_name(schedule.cleanup_day),
        schedule.cleanup_at.format("%H:%M"),
        display_stamp(at)
    ))
}

/// English weekday name, e.g. `Sunday`.
#[must_use]
pub const fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupFailure, BackupResult};
    use crate::notify::ParseMode;
    use chrono::{NaiveTime, TimeZone};
    use rstest::rstest;

    fn at() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(3 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2024, 6, 2, 2, 0, 5)
            .single()
            .expect("time")
    }

    fn result(name: &str, failure: Option<BackupFailure>, artifacts: usize) -> BackupResult {
        BackupResult {
            device: name.to_owned(),
            success: failure.is_none(),
            artifacts: (0..artifacts).map(|index| format!("{name}_{index}.txt")).collect(),
            error: failure,
            started_at: at(),
            finished_at: at(),
        }
    }

    #[rstest]
    #[case(Duration::from_secs(0), "0:00:00")]
    #[case(Duration::from_secs(75), "0:01:15")]
    #[case(Duration::from_secs(3600 + 62), "1:01:02")]
    #[case(Duration::from_millis(36_000_999), "10:00:00")]
    fn durations_render_as_hours_minutes_seconds(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }

    #[test]
    fn escape_html_handles_markup_characters() {
        assert_eq!(escape_html("a<b>&c"), "a&lt;b&gt;&amp;c");
    }

    #[test]
    fn partial_summary_lists_both_groups() {
        let summary = FleetRunSummary {
            results: vec![
                result("core<1>", None, 2),
                result(
                    "edge",
                    Some(BackupFailure::ConnectionFailed {
                        reason: String::from("auth <denied>"),
                    }),
                    0,
                ),
            ],
            started_at: at(),
            finished_at: at(),
            duration: Duration::from_secs(61),
        };

        let message = fleet_summary(&summary, &at());

        assert_eq!(message.mode, ParseMode::Html);
        assert_eq!(
            message.text,
            "⚠️ <b>Network backup - Partial</b>\n\n\
             📊 <b>Summary:</b>\n\
             • Succeeded: 1\n\
             • Failed: 1\n\
             • Duration: 0:01:01\n\
             • Date: 02/06/2024 02:00:05\n\n\
             ✅ <b>Successful devices:</b>\n\
             • core&lt;1&gt; (2 files)\n\n\
             ❌ <b>Failed devices:</b>\n\
             • edge: connection failed: auth &lt;denied&gt;"
        );
    }

    #[rstest]
    #[case(vec![result("a", None, 1)], "✅ <b>Network backup - Success</b>")]
    #[case(vec![result("a", Some(BackupFailure::EmptyConfig), 0)], "❌ <b>Network backup - Total failure</b>")]
    fn summary_title_tracks_status(#[case] results: Vec<BackupResult>, #[case] heading: &str) {
        let summary = FleetRunSummary {
            results,
            started_at: at(),
            finished_at: at(),
            duration: Duration::ZERO,
        };

        let message = fleet_summary(&summary, &at());

        assert!(message.text.starts_with(heading), "{}", message.text);
    }

    #[test]
    fn cleanup_message_reports_count_and_window() {
        let message = cleanup_message(4, 30, &at());
        assert!(message.text.contains("Files removed: 4"));
        assert!(message.text.contains("Older than: 30 days"));
        assert!(message.text.ends_with("02/06/2024 02:00:05"));
    }

    #[test]
    fn startup_message_lists_schedules() {
        let schedule = ScheduleSettings {
            daily_backup_at: NaiveTime::from_hms_opt(2, 0, 0).expect("time"),
            weekly_backup_day: Weekday::Sun,
            weekly_backup_at: NaiveTime::from_hms_opt(1, 0, 0).expect("time"),
            cleanup_day: Weekday::Mon,
            cleanup_at: NaiveTime::from_hms_opt(3, 0, 0).expect("time"),
            poll_interval: Duration::from_secs(60),
        };

        let message = startup_message(12, &schedule, 30, &at());

        assert!(message.text.contains("Devices configured: 12"));
        assert!(message.text.contains("Daily backup: 02:00"));
        assert!(message.text.contains("Weekly backup: Sunday 01:00"));
        assert!(message.text.contains("Cleanup: Monday 03:00"));
        assert!(message.text.contains("Retention: 30 days"));
    }
}
