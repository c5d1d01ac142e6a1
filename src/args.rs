// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

/// Biaozhu 自动标注推理服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置目录，包含 models.yaml 与 auto_labeling/
  #[arg(
    long,
    global = true,
    env = "BIAOZHU_CONFIG_DIR",
    default_value = "configs",
    value_name = "DIR"
  )]
  pub config_dir: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 加载全部启用的模型并输出元数据
  Check,
  /// 对一张图像推理
  Predict {
    /// 模型标识
    #[arg(long, value_name = "MODEL_ID")]
    model: String,
    /// 输入来源: image:///path/to/file.jpg 或 data:image/png;base64,...
    #[arg(long, value_name = "SOURCE")]
    input: Url,
    /// 请求参数 (JSON 对象)，覆盖配置文件中的同名参数
    #[arg(long, value_name = "JSON")]
    params: Option<String>,
    /// 输出位置: stdout:, file:///path/result.json, folder:///dir
    #[arg(long, value_name = "OUTPUT")]
    output: Option<Url>,
    /// 重复推理次数，大于 1 时输出平均耗时
    #[arg(long, default_value = "1", value_name = "COUNT")]
    repeat: usize,
  },
  /// 从标准输入逐行读取推理请求
  ServeStdio {
    /// 单次推理的超时时间（秒）
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<f64>,
  },
}
