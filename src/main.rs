//! Millwright 命令行入口
//!
//! 用法：millwright [--config <path>] <request.json | 自由文本>...
//! 每个参数是一份请求：以 .json 结尾的已存在文件按 WorkflowRequest 解析，其余视为自由文本。
//! 所有请求并发提交，每个 Run 以 JSON 打印到 stdout。

use std::path::PathBuf;

use anyhow::{bail, Context};
use futures_util::future::join_all;
use millwright::{create_orchestrator_builder, observability, WorkflowOptions, WorkflowRequest};

fn parse_request(arg: &str) -> anyhow::Result<WorkflowRequest> {
    let path = PathBuf::from(arg);
    if arg.ends_with(".json") && path.is_file() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("Invalid request JSON in {}", path.display()));
    }
    Ok(WorkflowRequest::from_text(arg))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut config_path = None;
    let mut inputs = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("usage: millwright [--config <path>] <request.json | free text>...");
                return Ok(());
            }
            _ => inputs.push(arg),
        }
    }
    if inputs.is_empty() {
        bail!("no request given; usage: millwright [--config <path>] <request.json | free text>...");
    }

    let requests = inputs
        .iter()
        .map(|arg| parse_request(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let orchestrator = create_orchestrator_builder(config_path).build();
    let runs = join_all(
        requests
            .into_iter()
            .map(|request| orchestrator.execute_workflow(request, WorkflowOptions::default())),
    )
    .await;

    for run in &runs {
        let json = serde_json::to_string_pretty(run.as_ref()).context("Failed to serialize run")?;
        println!("{json}");
    }

    if let Some(confidence) = orchestrator.last_confidence().await {
        tracing::info!(overall = confidence.overall, "last run confidence");
    }
    Ok(())
}
