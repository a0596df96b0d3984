//! 古い請求書フォルダとプロジェクト生成物の削除
//!
//! どちらも「計画 → 確認 → 実行」の順で、確認が取れなければ何も消さない。

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::ScraperError;
use crate::window::DateRange;

/// プロジェクト掃除で削除する生成物 (ルート直下)
pub const GENERATED_ARTIFACTS: &[&str] = &[
    "target",
    "logs",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
];

/// 絶対に削除しないパス (ルート直下)
pub const PROTECTED_PATHS: &[&str] = &[
    "app",
    "config",
    "src",
    "requirements.txt",
    "README.md",
    "Cargo.toml",
    "run.sh",
    "run.ps1",
];

/// 表のスクリーンショットのファイル名接頭辞
const TABLE_SCREENSHOT_PREFIX: &str = "zamowienia_tabela_";

/// 削除予定の一覧
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    pub targets: Vec<PathBuf>,
}

impl CleanupPlan {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl fmt::Display for CleanupPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.targets.is_empty() {
            return write!(f, "Nothing to delete");
        }
        writeln!(f, "{} item(s) will be deleted:", self.targets.len())?;
        for target in &self.targets {
            writeln!(f, "  {}", target.display())?;
        }
        Ok(())
    }
}

/// 実行結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub planned: usize,
    pub deleted: usize,
}

pub fn is_protected(name: &str) -> bool {
    PROTECTED_PATHS.contains(&name)
}

/// `keep_weeks` 週より古い請求書フォルダと表スクリーンショットを列挙
pub fn plan_prune(base: &Path, keep_weeks: u32, today: NaiveDate) -> Result<CleanupPlan, ScraperError> {
    let cutoff = today - Duration::weeks(i64::from(keep_weeks));
    debug!("Prune cutoff: {}", cutoff);

    if !base.exists() {
        return Ok(CleanupPlan::default());
    }

    let mut targets = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if path.is_dir() {
            if let Some(range) = DateRange::parse_folder_name(&name) {
                if range.end < cutoff {
                    targets.push(path);
                }
            }
        } else if name.starts_with(TABLE_SCREENSHOT_PREFIX) && modified_before(&path, cutoff) {
            targets.push(path);
        }
    }

    targets.sort();
    Ok(CleanupPlan { targets })
}

fn modified_before(path: &Path, cutoff: NaiveDate) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| DateTime::<Local>::from(modified).date_naive() < cutoff)
        .unwrap_or(false)
}

/// プロジェクトルートの生成物を列挙 (保護パスは含めない)
pub fn plan_clean(root: &Path) -> Result<CleanupPlan, ScraperError> {
    let mut targets: Vec<PathBuf> = GENERATED_ARTIFACTS
        .iter()
        .map(|name| root.join(name))
        .filter(|path| path.exists())
        .collect();

    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let is_log = path.is_file()
            && path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("log"))
                .unwrap_or(false);
        if is_log {
            targets.push(path);
        }
    }

    targets.retain(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        !is_protected(&name)
    });
    targets.sort();
    Ok(CleanupPlan { targets })
}

/// 計画を実行し、削除できた数を返す。失敗した項目は警告して続行
pub fn execute_plan(plan: &CleanupPlan) -> usize {
    let mut deleted = 0;
    for target in &plan.targets {
        let result = if target.is_dir() {
            std::fs::remove_dir_all(target)
        } else {
            std::fs::remove_file(target)
        };
        match result {
            Ok(()) => {
                info!("Deleted {}", target.display());
                deleted += 1;
            }
            Err(e) => warn!("Could not delete {}: {}", target.display(), e),
        }
    }
    deleted
}

fn confirm_and_execute<F>(plan: CleanupPlan, confirm: F) -> CleanupOutcome
where
    F: FnOnce(&CleanupPlan) -> bool,
{
    let planned = plan.targets.len();
    if plan.is_empty() {
        info!("Nothing to delete");
        return CleanupOutcome::default();
    }
    if !confirm(&plan) {
        info!("Deletion cancelled");
        return CleanupOutcome { planned, deleted: 0 };
    }
    CleanupOutcome {
        planned,
        deleted: execute_plan(&plan),
    }
}

/// 古い請求書フォルダを削除
pub fn prune_invoices<F>(
    base: &Path,
    keep_weeks: u32,
    today: NaiveDate,
    confirm: F,
) -> Result<CleanupOutcome, ScraperError>
where
    F: FnOnce(&CleanupPlan) -> bool,
{
    let plan = plan_prune(base, keep_weeks, today)?;
    info!(
        "Prune {}: {} item(s) older than {} week(s)",
        base.display(),
        plan.targets.len(),
        keep_weeks
    );
    Ok(confirm_and_execute(plan, confirm))
}

/// プロジェクトの生成物を削除
pub fn clean_project<F>(root: &Path, confirm: F) -> Result<CleanupOutcome, ScraperError>
where
    F: FnOnce(&CleanupPlan) -> bool,
{
    let plan = plan_clean(root)?;
    info!("Clean {}: {} item(s)", root.display(), plan.targets.len());
    Ok(confirm_and_execute(plan, confirm))
}
