//! Read-only views over the shared file. Nothing here writes; the daemon owns all mutation.

use std::{fmt::Display, fmt::Write, sync::Arc};

use ansi_term::{Colour, Style};
use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::{
    config::SyncSettings,
    sync::{
        identity::read_device_id, local::LocalCache, model::DailyCount, model::SyncData,
        store::SharedStore,
    },
    utils::{
        clock::{Clock, DefaultClock},
        time::days_before,
    },
};

use super::{
    output::{bar, format_count, format_count_full, format_date_short, percentage},
    Args, LocationArgs,
};

const UNTRACKED: &str = "untracked";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct DateArgs {
    #[arg(
        long,
        short,
        help = "Day to report on. Examples are \"yesterday\", \"3 days ago\", \"15/03/2025\". Defaults to today"
    )]
    date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

#[derive(Debug, Parser)]
pub struct StatsCommand {
    #[command(flatten)]
    location: LocationArgs,
    #[command(flatten)]
    date: DateArgs,
}

#[derive(Debug, Parser)]
pub struct HistoryCommand {
    #[command(flatten)]
    location: LocationArgs,
    #[arg(long, default_value_t = 14, value_parser = clap::value_parser!(u32).range(1..), help = "Number of days to show")]
    days: u32,
}

#[derive(Debug, Parser)]
pub struct AppsCommand {
    #[command(flatten)]
    location: LocationArgs,
    #[command(flatten)]
    date: DateArgs,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..), help = "Number of days ending at --date to combine")]
    days: u32,
}

#[derive(Debug, Parser)]
pub struct DevicesCommand {
    #[command(flatten)]
    location: LocationArgs,
    #[command(flatten)]
    date: DateArgs,
}

pub async fn process_stats_command(StatsCommand { location, date }: StatsCommand) -> Result<()> {
    let date = parse_date(&date, Local::now())?;
    let view = load_view(&location.settings()?).await?;
    print!("{}", render_stats(&view.data, date, view.today));
    Ok(())
}

pub async fn process_history_command(
    HistoryCommand { location, days }: HistoryCommand,
) -> Result<()> {
    let view = load_view(&location.settings()?).await?;
    print!("{}", render_history(&view.data, days, view.today));
    Ok(())
}

pub async fn process_apps_command(
    AppsCommand {
        location,
        date,
        days,
    }: AppsCommand,
) -> Result<()> {
    let date = parse_date(&date, Local::now())?;
    let view = load_view(&location.settings()?).await?;
    print!("{}", render_apps(&view.data, days, date));
    Ok(())
}

pub async fn process_devices_command(
    DevicesCommand { location, date }: DevicesCommand,
) -> Result<()> {
    let date = parse_date(&date, Local::now())?;
    let view = load_view(&location.settings()?).await?;
    print!(
        "{}",
        render_devices(&view.data, date, view.device_id.as_deref())
    );
    Ok(())
}

fn parse_date(args: &DateArgs, now: DateTime<Local>) -> Result<NaiveDate> {
    let Some(input) = &args.date else {
        return Ok(now.date_naive());
    };
    match parse_date_string(input, now, args.date_style.into()) {
        Ok(v) => Ok(v.date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate date {input:?}: {e}"),
            )
            .into()),
    }
}

struct View {
    data: SyncData,
    device_id: Option<Arc<str>>,
    today: NaiveDate,
}

/// Shared file contents, with this device's slot for today raised to the local snapshot. The
/// daemon publishes in batches, so the snapshot is usually a little ahead of the file.
async fn load_view(settings: &SyncSettings) -> Result<View> {
    let clock = DefaultClock;
    let today = clock.today();
    let mut data = SharedStore::new(settings.shared_file.clone(), settings.retention_days)
        .load()
        .await?;
    let device_id = read_device_id(&settings.device_id_path()).await?;

    if let Some(device_id) = &device_id {
        let local = LocalCache::load_or_reset(settings.local_snapshot_path(), today).await;
        if local.count() > data.device_count(device_id, today) {
            data.device_mut(device_id).raise(
                today,
                DailyCount::new(local.count(), clock.time()).with_apps(local.app_counts().clone()),
            );
        }
    }

    Ok(View {
        data,
        device_id,
        today,
    })
}

fn label(text: &str) -> String {
    Style::new().bold().paint(format!("{text:<12}")).to_string()
}

fn render_stats(data: &SyncData, date: NaiveDate, today: NaiveDate) -> String {
    let previous = days_before(date, 1);
    let (day_label, previous_label) = if date == today {
        ("Today".to_owned(), "Yesterday".to_owned())
    } else {
        (date.to_string(), previous.to_string())
    };
    let total = data.total_count(date);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        Colour::Cyan.bold().paint(format!("{} keystrokes", format_count(total)))
    );
    let _ = writeln!(out, "{}{}", label(&day_label), format_count_full(total));
    let _ = writeln!(
        out,
        "{}{}",
        label(&previous_label),
        format_count_full(data.total_count(previous))
    );
    for days in [7, 30] {
        let _ = writeln!(
            out,
            "{}{}",
            label(&format!("{days}-day avg")),
            format_count_full(data.average_count(days, date) as u64)
        );
    }
    if let Some(record) = data.record_day() {
        let _ = writeln!(
            out,
            "{}{} ({})",
            label("Record"),
            format_count_full(record.total),
            format_date_short(record.date)
        );
    }
    out
}

fn render_history(data: &SyncData, days: u32, from: NaiveDate) -> String {
    let history = data.history(days, from);
    let max = history.iter().map(|v| v.total).max().unwrap_or(0);

    let mut out = String::new();
    for day in history {
        let _ = writeln!(
            out,
            "{}\t{:>10}\t{}",
            day.date,
            format_count_full(day.total),
            Colour::Green.paint(bar(day.total, max))
        );
    }
    out
}

fn render_apps(data: &SyncData, days: u32, from: NaiveDate) -> String {
    let total: u64 = data.history(days, from).iter().map(|v| v.total).sum();
    let mut apps = data
        .total_app_counts_for_days(days, from)
        .into_iter()
        .collect::<Vec<_>>();
    let tagged: u64 = apps.iter().map(|(_, count)| count).sum();
    apps.sort_by(|(a_name, a), (b_name, b)| b.cmp(a).then_with(|| a_name.cmp(b_name)));

    let untracked = total.saturating_sub(tagged);
    if untracked > 0 {
        apps.push((UNTRACKED.into(), untracked));
    }

    let mut out = String::new();
    for (app, count) in apps {
        let _ = writeln!(
            out,
            "{:>5.1}%\t{:>10}\t{}",
            percentage(count, total),
            format_count_full(count),
            app
        );
    }
    out
}

fn render_devices(data: &SyncData, date: NaiveDate, this_device: Option<&str>) -> String {
    let mut out = String::new();
    for (device, count) in data.device_counts(date) {
        let name = if Some(device) == this_device {
            Colour::Green.paint(format!("{device} (this device)")).to_string()
        } else {
            device.to_owned()
        };
        let _ = writeln!(out, "{:>10}\t{}", format_count_full(count), name);
    }
    out
}
