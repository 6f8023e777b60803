use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "feed-playback",
    version,
    about = "竖屏视频流的播放资源预加载与缓存管理"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 覆盖数据目录（默认走系统 data_local_dir）
    #[arg(long, env = "FEED_PLAYBACK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// 覆盖日志目录（默认 `{data_dir}/logs`）
    #[arg(long, env = "FEED_PLAYBACK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// 覆盖日志过滤（等价于设置 RUST_LOG）
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    /// 相对视频 ID 的解析前缀；不设置时参数必须是完整 URL
    #[arg(long, env = "FEED_PLAYBACK_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 依次预加载到连续索引，打印最终快照（JSON）
    Preload {
        #[arg(required = true)]
        urls: Vec<String>,

        /// 预加载完成后切到该索引并播放
        #[arg(long)]
        active: Option<i64>,
    },

    /// 清空内存与磁盘缓存
    ClearCache,

    /// 打印生效的设置
    Settings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_preload_with_active() {
        let cli = Cli::try_parse_from([
            "feed-playback",
            "--data-dir",
            "/tmp/fp",
            "preload",
            "a.mp4",
            "b.mp4",
            "--active",
            "1",
        ])
        .expect("parse");
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/fp")));
        match cli.command {
            Command::Preload { urls, active } => {
                assert_eq!(urls, vec!["a.mp4", "b.mp4"]);
                assert_eq!(active, Some(1));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
