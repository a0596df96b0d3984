//! 処理対象の日付範囲
//!
//! `date_from` / `date_to` が両方あればその範囲を1つ、なければ
//! `weeks_to_process` 週分 (日曜〜土曜、新しい週から) の範囲を作る。

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::ScraperError;
use crate::settings::ScenarioSettings;

/// 範囲フォルダ名の区切り (`2026-10-18_do_2026-10-24`)
pub const FOLDER_SEPARATOR: &str = "_do_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    Absolute { from: NaiveDate, to: NaiveDate },
    Rolling { weeks: u32 },
}

impl DateWindow {
    pub fn from_settings(settings: &ScenarioSettings) -> Result<Self, ScraperError> {
        let from = non_empty(settings.date_from.as_deref());
        let to = non_empty(settings.date_to.as_deref());

        match (from, to) {
            (Some(from), Some(to)) => {
                let from = parse_iso_date(from)?;
                let to = parse_iso_date(to)?;
                if from > to {
                    return Err(ScraperError::Config(format!(
                        "date_from ({}) が date_to ({}) より後です",
                        from, to
                    )));
                }
                Ok(DateWindow::Absolute { from, to })
            }
            (None, None) => Ok(DateWindow::Rolling {
                weeks: settings.weeks_to_process,
            }),
            _ => Err(ScraperError::Config(
                "date_from と date_to は両方指定するか、両方省略してください".into(),
            )),
        }
    }

    /// `today` を基準に具体的な範囲へ展開
    pub fn ranges(&self, today: NaiveDate) -> Vec<DateRange> {
        match *self {
            DateWindow::Absolute { from, to } => vec![DateRange::new(from, to)],
            DateWindow::Rolling { weeks } => week_ranges(today, weeks),
        }
    }
}

/// 日曜始まりの週を `weeks` 個、新しい順に返す
///
/// 第k週の開始日は today から (月曜起点の曜日番号 + 1 + 7k) 日前。
pub fn week_ranges(today: NaiveDate, weeks: u32) -> Vec<DateRange> {
    let back = i64::from(today.weekday().num_days_from_monday()) + 1;
    (0..i64::from(weeks))
        .map(|k| {
            let start = today - Duration::days(back + 7 * k);
            DateRange::new(start, start + Duration::days(6))
        })
        .collect()
}

/// 両端を含む日付範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn folder_name(&self) -> String {
        format!(
            "{}{}{}",
            self.start.format("%Y-%m-%d"),
            FOLDER_SEPARATOR,
            self.end.format("%Y-%m-%d")
        )
    }

    /// `folder_name` の逆変換。形式が違えば None
    pub fn parse_folder_name(name: &str) -> Option<Self> {
        let (start, end) = name.split_once(FOLDER_SEPARATOR)?;
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
        Some(Self::new(start, end))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%d.%m.%Y"),
            self.end.format("%d.%m.%Y")
        )
    }
}

pub fn parse_iso_date(value: &str) -> Result<NaiveDate, ScraperError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| ScraperError::InvalidDate(format!("{}: {}", value, e)))
}

/// ポータル表示形式 (DD.MM.YYYY) の日付
pub fn parse_portal_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%d.%m.%Y").ok()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
