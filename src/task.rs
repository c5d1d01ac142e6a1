// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/task.rs - 命令行任务驱动
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

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
  config::Params,
  frame::BgrFrame,
  lifecycle::ManagedModel,
  output::Render,
  request::PredictRequest,
  server::ModelServer,
  shape::PredictionResult,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 对第一帧推理一次
#[derive(Debug, Default)]
pub struct OneShotTask {
  params: Params,
}

impl OneShotTask {
  pub fn with_params(mut self, params: Params) -> Self {
    self.params = params;
    self
  }
}

impl<RE, I, O> Task<I, &ManagedModel, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = BgrFrame>,
  O: Render<BgrFrame, PredictionResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &ManagedModel, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功 ({}x{})，开始推理...", frame.width(), frame.height());
    let now = Instant::now();
    let result = model.infer(&frame, &self.params)?;
    info!("推理完成，耗时: {:.2?}, 共 {} 个形状", now.elapsed(), result.shapes.len());
    output.render_result(&frame, &result)?;

    Ok(())
  }
}

/// 对同一帧重复推理并统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  params: Params,
  times: usize,
}

impl RepeatShotTask {
  /// 前两次作为预热，不计入平均值
  const WARMUP: usize = 2;

  pub fn new(times: usize) -> Self {
    Self {
      params: Params::new(),
      times: times.max(1),
    }
  }

  pub fn with_params(mut self, params: Params) -> Self {
    self.params = params;
    self
  }
}

impl<RE, I, O> Task<I, &ManagedModel, O> for RepeatShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = BgrFrame>,
  O: Render<BgrFrame, PredictionResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &ManagedModel, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame, &self.params)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    let skip = if times.len() > Self::WARMUP { Self::WARMUP } else { 0 };
    let counted = &times[skip..];
    warn!(
      "平均推理时间: {:.2?} ({} 次)",
      counted.iter().sum::<Duration>() / counted.len() as u32,
      counted.len()
    );

    Ok(())
  }
}

/// 按行读取推理请求，每个请求输出一行 `{"ok": ...}` 或 `{"error": ...}`
///
/// 单个请求失败不会中断循环，读写错误会。
#[derive(Debug, Default)]
pub struct StdioTask {
  timeout: Option<Duration>,
}

impl StdioTask {
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  fn handle(&self, server: &ModelServer, line: &str) -> anyhow::Result<PredictionResult> {
    let request: PredictRequest = serde_json::from_str(line)?;
    let frame = request.decode_image()?;
    debug!(
      "请求模型 [{}], 图像 {}x{}",
      request.model,
      frame.width(),
      frame.height()
    );

    let result = match self.timeout {
      Some(timeout) => {
        server.predict_with_timeout(&request.model, Arc::new(frame), request.params, timeout)?
      }
      None => server.predict(&request.model, &frame, &request.params)?,
    };
    Ok(result)
  }
}

impl<R: BufRead, W: Write> Task<R, &ModelServer, W> for StdioTask {
  type Error = anyhow::Error;

  fn run_task(self, input: R, server: &ModelServer, mut output: W) -> Result<(), Self::Error> {
    info!("开始处理标准输入中的请求...");
    let mut handled = 0usize;
    for line in input.lines() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }

      let response = match self.handle(server, &line) {
        Ok(result) => json!({ "ok": result }),
        Err(e) => {
          warn!("请求处理失败: {:#}", e);
          json!({ "error": format!("{:#}", e) })
        }
      };
      serde_json::to_writer(&mut output, &response)?;
      writeln!(output)?;
      output.flush()?;
      handled += 1;
    }

    info!("输入结束, 共处理 {} 个请求", handled);
    Ok(())
  }
}
