//! ProjectMind 命令行入口
//!
//! 事件以 JSON 行输出到 stdout，日志输出到 stderr。

use anyhow::Context;
use clap::Parser;
use projectmind::{cli::Cli, core::create_agent, observability, EventSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init();

    let agent = create_agent(cli.config.clone())
        .await
        .context("Failed to create agent")?;

    let (events, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "event serialize failed"),
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = agent
        .run_request(&cli.session, &cli.request_text(), events, Some(cancel))
        .await;
    let _ = printer.await;
    result.context("Request failed")?;
    Ok(())
}
