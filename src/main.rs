//! Parley 命令行
//!
//! 用法：`parley "<prompt>"`。加载配置、初始化日志，把回答以流式方式写到标准输出。

use std::io::Write;

use anyhow::Context;
use futures_util::StreamExt;
use parley::config::load_config;
use parley::tools::FunctionRegistry;
use parley::{AskRequest, Assistant};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley::observability::init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("usage: parley \"<prompt>\"");
    }

    let cfg = load_config(None).context("Failed to load config")?;
    let assistant =
        Assistant::from_config(&cfg, FunctionRegistry::new()).context("Failed to create assistant")?;

    let mut answer = assistant.ask_stream(AskRequest::new(prompt));
    let mut stdout = std::io::stdout();
    while let Some(chunk) = answer.next().await {
        let text = chunk.context("Request failed")?;
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
