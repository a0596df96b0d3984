use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use async_trait::async_trait;
use chrono::Local;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info, warn};

use fakturator::cleanup::{self, CleanupPlan};
use fakturator::menu::{self, MenuAction, MenuHandler, SharedInput};
use fakturator::settings::GeneralConfig;
use fakturator::{
    run_scenarios, RunOptions, ScenarioKind, ScenarioService, ScraperError, Selection, Settings,
    SmtpMailer,
};

#[derive(Parser)]
#[command(name = "fakturator", version, about = "e-urtica 請求書ダウンローダー")]
struct Cli {
    /// 設定ファイル (省略時は config/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// ログを詳細にする (-v: debug, -vv: trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 有効なシナリオ (または指定したシナリオ) を実行
    Run {
        #[arg(long)]
        scenario: Option<String>,
        #[arg(long, conflicts_with = "headed")]
        headless: bool,
        #[arg(long)]
        headed: bool,
    },
    /// シナリオ一覧
    List,
    /// 設定ファイルの検証
    Validate,
    /// 古い請求書フォルダを削除
    Prune {
        #[arg(long)]
        scenario: Option<String>,
        #[arg(long)]
        keep_weeks: Option<u32>,
        /// 確認なしで削除
        #[arg(long)]
        yes: bool,
    },
    /// ログ・ビルド生成物を削除
    Clean {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        yes: bool,
    },
    /// 対話メニュー
    Menu,
}

struct App {
    settings_path: PathBuf,
    settings: Settings,
    /// メニューと確認プロンプトで共有する標準入力
    input: SharedInput,
}

impl App {
    async fn run(&self, options: RunOptions) -> Result<bool, ScraperError> {
        for issue in self.settings.validate() {
            warn!("Configuration issue: {}", issue);
        }

        let mut service = ScenarioService::new();
        let summary = run_scenarios(&self.settings, &options, &mut service, &SmtpMailer).await?;

        println!();
        for report in &summary.reports {
            println!("{}", report);
        }
        println!(
            "{} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        );
        Ok(summary.all_ok())
    }

    fn list(&self) {
        println!("Settings: {}", self.settings_path.display());
        for scenario in &self.settings.scenarios {
            println!(
                "  [{}] {:<12} {:<10} {}",
                if scenario.active { "x" } else { " " },
                scenario.id,
                format!("{:?}", scenario.kind()).to_lowercase(),
                scenario.name
            );
        }
    }

    fn validate(&self) -> bool {
        let issues = self.settings.validate();
        if issues.is_empty() {
            println!(
                "{}: OK ({} scenarios)",
                self.settings_path.display(),
                self.settings.scenarios.len()
            );
            return true;
        }
        println!("{}: {} issue(s)", self.settings_path.display(), issues.len());
        for issue in issues {
            println!("  - {}", issue);
        }
        false
    }

    fn prune(&self, scenario: Option<&str>, keep_weeks: Option<u32>, yes: bool) -> Result<(), ScraperError> {
        let scenarios: Vec<_> = match scenario {
            Some(id) => vec![self
                .settings
                .scenario(id)
                .ok_or_else(|| ScraperError::Config(format!("シナリオ '{}' が見つかりません", id)))?],
            None => self
                .settings
                .scenarios
                .iter()
                .filter(|s| s.kind() == ScenarioKind::Invoices)
                .collect(),
        };

        let today = Local::now().date_naive();
        for scenario in scenarios {
            let weeks = keep_weeks.unwrap_or(scenario.settings.keep_weeks);
            let outcome = cleanup::prune_invoices(
                &scenario.settings.download_path,
                weeks,
                today,
                |plan| yes || self.ask(plan, "Delete these invoice folders?"),
            )?;
            println!(
                "[{}] {} planned, {} deleted",
                scenario.id, outcome.planned, outcome.deleted
            );
        }
        Ok(())
    }

    fn clean(&self, root: &std::path::Path, yes: bool) -> Result<(), ScraperError> {
        let outcome = cleanup::clean_project(root, |plan| {
            yes || self.ask(plan, "Delete these generated files?")
        })?;
        println!("{} planned, {} deleted", outcome.planned, outcome.deleted);
        Ok(())
    }

    /// 計画を表示して確認を取る
    fn ask(&self, plan: &CleanupPlan, question: &str) -> bool {
        print!("{}", plan);
        let mut output = std::io::stdout();
        menu::confirm(&self.input, &mut output, question)
    }
}

#[async_trait]
impl MenuHandler for App {
    async fn handle(&mut self, action: MenuAction) -> Result<(), ScraperError> {
        match action {
            MenuAction::RunScenarios => {
                self.run(RunOptions::default()).await?;
            }
            MenuAction::Validate => {
                self.validate();
            }
            MenuAction::Prune => self.prune(None, None, false)?,
            MenuAction::Clean => self.clean(std::path::Path::new("."), false)?,
            MenuAction::Exit => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(Settings::locate);
    let loaded = Settings::load_or_create(&settings_path);

    let general = loaded
        .as_ref()
        .map(|s| s.general.clone())
        .unwrap_or_else(|_| GeneralConfig::default());
    let _log_guard = fakturator::logging::init(&general, cli.verbose);

    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            error!("Could not load settings: {}", e);
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Using settings {}", settings_path.display());

    let mut app = App {
        settings_path,
        settings,
        input: SharedInput::stdin(),
    };

    let result = match cli.command.unwrap_or(Command::Menu) {
        Command::Run {
            scenario,
            headless,
            headed,
        } => {
            let options = RunOptions {
                selection: scenario.map(Selection::Only).unwrap_or_default(),
                headless: match (headless, headed) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            app.run(options).await
        }
        Command::List => {
            app.list();
            Ok(true)
        }
        Command::Validate => Ok(app.validate()),
        Command::Prune {
            scenario,
            keep_weeks,
            yes,
        } => app.prune(scenario.as_deref(), keep_weeks, yes).map(|_| true),
        Command::Clean { root, yes } => app.clean(&root, yes).map(|_| true),
        Command::Menu => {
            let input = app.input.clone();
            let mut output = std::io::stdout();
            let result = menu::run_menu(&mut app, &input, &mut output).await;
            let _ = output.flush();
            result.map(|_| true)
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
