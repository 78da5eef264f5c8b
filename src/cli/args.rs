use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::infrastructure::{LogFormat, LoggingConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/storage_config.json";

#[derive(Parser, Debug)]
#[command(
    name = "review-export",
    version,
    about = "导出带情感评分的客户评论到 Google Sheets",
    long_about = "review-export 读取评论采集与情感分析流水线输出的 JSON 文件，按平台写入 Google Sheets 文档的各个工作表，支持增量去重、情感着色与仪表板。"
)]
pub struct Args {
    /// 存储配置文件（.json 或 .toml）
    #[arg(short, long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long = "log-level", global = true, default_value = "info")]
    pub log_level: String,

    /// 日志格式 (pretty, compact, json)
    #[arg(long = "log-format", global = true, default_value = "compact")]
    pub log_format: String,

    /// 日志中附带源文件与行号
    #[arg(long = "log-file-location", global = true, default_value_t = false)]
    pub log_file_location: bool,

    /// 记录 span 结束事件（含耗时）
    #[arg(long = "log-span-events", global = true, default_value_t = false)]
    pub log_span_events: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// 将评论写入所有启用的存储后端
    Store {
        /// 评论 JSON 文件（数组，或带 "reviews" 数组的对象）
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// 写入内存文档而不是 Google Sheets，只打印结果
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// 显示配置来源、启用状态与凭据检查结果
    Status,

    /// 重命名工作表（例如把旧名称改为规范的平台名）
    RenameTab {
        /// 现有工作表名
        from: String,
        /// 新名称
        to: String,
    },

    /// 写出默认配置文件
    InitConfig {
        /// 覆盖已存在的文件
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// 打印需要共享表格的服务账号邮箱
    ServiceAccountEmail,
}

impl Args {
    /// 由命令行选项构造日志配置
    pub fn logging_config(&self) -> anyhow::Result<LoggingConfig> {
        Ok(LoggingConfig {
            level: self.log_level.parse()?,
            format: self.log_format.parse::<LogFormat>().map_err(anyhow::Error::msg)?,
            include_file_location: self.log_file_location,
            include_span_events: self.log_span_events,
            ..LoggingConfig::default()
        })
    }
}
