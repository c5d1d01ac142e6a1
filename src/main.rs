// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/main.rs - 命令行主程序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod args;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};

use biaozhu::{
  FromUrl,
  config::Params,
  input::InputWrapper,
  output::OutputWrapper,
  registry,
  server::{ModelServer, StartupReport},
  task::{OneShotTask, RepeatShotTask, StdioTask, Task},
};

use args::{Args, Command};

fn start(args: &Args) -> Result<(ModelServer, StartupReport)> {
  let registry = registry::global()?;
  info!(
    "已注册 {} 个模型实现: {:?}",
    registry.len(),
    registry.identifiers()
  );
  let (server, report) = ModelServer::start(registry, &args.config_dir)
    .with_context(|| format!("无法启动, 配置目录: {}", args.config_dir.display()))?;
  for failure in &report.failures {
    error!("模型 [{}] 不可用: {}", failure.model_id, failure.error);
  }
  Ok((server, report))
}

fn parse_params(text: Option<&str>) -> Result<Params> {
  let Some(text) = text else {
    return Ok(Params::new());
  };
  match serde_json::from_str::<serde_json::Value>(text).context("--params 不是合法的 JSON")? {
    serde_json::Value::Object(params) => Ok(params),
    other => bail!("--params 必须是 JSON 对象, 实际为 {}", other),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let (server, report) = start(&args)?;

  match &args.command {
    Command::Check => {
      println!("{}", serde_json::to_string_pretty(&server.models_info())?);
      if !report.is_complete() {
        bail!(
          "{}/{} 个模型加载失败",
          report.failures.len(),
          report.enabled.len()
        );
      }
    }
    Command::Predict {
      model,
      input,
      params,
      output,
      repeat,
    } => {
      let params = parse_params(params.as_deref())?;
      let model = server.get(model)?;
      let input = InputWrapper::from_url(input)?;
      let output = match output {
        Some(url) => OutputWrapper::from_url(url)?,
        None => OutputWrapper::default(),
      };

      if *repeat > 1 {
        RepeatShotTask::new(*repeat)
          .with_params(params)
          .run_task(input, &*model, output)?;
      } else {
        OneShotTask::default()
          .with_params(params)
          .run_task(input, &*model, output)?;
      }
    }
    Command::ServeStdio { timeout } => {
      if server.is_empty() {
        warn!("没有可用的模型, 所有请求都将失败");
      }
      let timeout = timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--timeout 必须是非负数")?;
      let stdin = std::io::stdin().lock();
      let stdout = std::io::stdout().lock();
      StdioTask::default()
        .with_timeout(timeout)
        .run_task(stdin, &server, stdout)?;
    }
  }

  Ok(())
}
