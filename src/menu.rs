//! 対話メニュー (番号 → アクションの対応表)

use std::io::{self, BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::error;

use crate::error::ScraperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    RunScenarios,
    Validate,
    Prune,
    Clean,
    Exit,
}

pub struct MenuEntry {
    pub key: &'static str,
    pub label: &'static str,
    pub action: MenuAction,
}

pub const MENU: &[MenuEntry] = &[
    MenuEntry {
        key: "1",
        label: "Run active scenarios",
        action: MenuAction::RunScenarios,
    },
    MenuEntry {
        key: "2",
        label: "Validate configuration",
        action: MenuAction::Validate,
    },
    MenuEntry {
        key: "3",
        label: "Delete old invoice folders",
        action: MenuAction::Prune,
    },
    MenuEntry {
        key: "4",
        label: "Clean project (logs, build artefacts)",
        action: MenuAction::Clean,
    },
    MenuEntry {
        key: "5",
        label: "Exit",
        action: MenuAction::Exit,
    },
];

pub fn parse_selection(input: &str) -> Option<MenuAction> {
    let input = input.trim();
    MENU.iter()
        .find(|entry| entry.key == input)
        .map(|entry| entry.action)
}

pub fn render() -> String {
    let mut out = String::from("\n=== Fakturator ===\n");
    for entry in MENU {
        out.push_str(&format!("  {}. {}\n", entry.key, entry.label));
    }
    out.push_str("Choice: ");
    out
}

/// y / yes / t / tak を肯定とみなす
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "t" | "tak"
    )
}

/// メニューと確認プロンプトで共有する入力
///
/// 読み取りバッファを1つにまとめ、先読みされた行を取りこぼさない。
#[derive(Clone)]
pub struct SharedInput(Arc<Mutex<Box<dyn BufRead + Send>>>);

impl SharedInput {
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(reader))))
    }

    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
    }

    pub fn read_line(&self, buf: &mut String) -> io::Result<usize> {
        let mut reader = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "入力がロックできません"))?;
        reader.read_line(buf)
    }
}

/// 質問を表示して1行読み、肯定かどうかを返す
pub fn confirm<W: Write>(input: &SharedInput, output: &mut W, question: &str) -> bool {
    if write!(output, "{} [y/N]: ", question)
        .and_then(|_| output.flush())
        .is_err()
    {
        return false;
    }
    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => is_affirmative(&answer),
        Err(_) => false,
    }
}

/// メニューから呼ばれる処理
#[async_trait]
pub trait MenuHandler: Send {
    async fn handle(&mut self, action: MenuAction) -> Result<(), ScraperError>;
}

/// 入力が尽きるか「終了」が選ばれるまでメニューを繰り返す
pub async fn run_menu<H, W>(handler: &mut H, input: &SharedInput, output: &mut W) -> Result<(), ScraperError>
where
    H: MenuHandler + ?Sized,
    W: Write,
{
    loop {
        write!(output, "{}", render())?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }

        match parse_selection(&line) {
            Some(MenuAction::Exit) => return Ok(()),
            Some(action) => {
                // 1つの処理の失敗でメニューは終わらせない
                if let Err(e) = handler.handle(action).await {
                    error!("{:?} failed: {}", action, e);
                    writeln!(output, "Error: {}", e)?;
                }
            }
            None => writeln!(output, "Unknown choice: '{}'", line.trim())?,
        }
    }
}
