use clap::Parser;
use directories::ProjectDirs;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;

use feed_playback::cache::MediaCache;
use feed_playback::cli::{Cli, Command};
use feed_playback::error::AppError;
use feed_playback::logging;
use feed_playback::manager::{ManagerEvent, PlaybackResourceManager};
use feed_playback::media::{
    AssetResolver, BaseUrlResolver, HttpTransport, NullPlayerFactory, PassthroughResolver,
};
use feed_playback::pipeline::PreloadPipeline;
use feed_playback::settings::{self, PlaybackSettings};

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "feed", "feed-playback")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("feed-playback"))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    let _log_guard = logging::init(
        &data_dir,
        logging::LogConfig {
            dir: cli.log_dir.clone(),
            filter: cli.log_filter.clone(),
            console: true,
        },
    );
    tracing::info!(data_dir = %data_dir.display(), "feed-playback 启动");

    let mut settings = settings::load_settings(&data_dir);
    settings.apply_env_overrides();

    match cli.command {
        Command::Preload { urls, active } => {
            run_preload(&data_dir, &settings, cli.base_url, urls, active).await
        }
        Command::ClearCache => {
            let cache = MediaCache::new(&data_dir, &settings.cache_config());
            let (files, bytes) = cache.clear().await;
            println!("已清除 {files} 个缓存文件，共 {bytes} 字节");
            Ok(())
        }
        Command::Settings => {
            if !settings::settings_path(&data_dir).exists() {
                settings::save_settings(&data_dir, &settings)?;
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn run_preload(
    data_dir: &std::path::Path,
    settings: &PlaybackSettings,
    base_url: Option<String>,
    urls: Vec<String>,
    active: Option<i64>,
) -> Result<(), AppError> {
    let cache = Arc::new(MediaCache::new(data_dir, &settings.cache_config()));
    let resolver: Arc<dyn AssetResolver> = match base_url {
        Some(base) => Arc::new(BaseUrlResolver::new(base)),
        None => Arc::new(PassthroughResolver),
    };
    let transport = Arc::new(HttpTransport::new(&settings.transport_config()));
    let pipeline = Arc::new(PreloadPipeline::new(
        cache,
        resolver,
        transport,
        Arc::new(NullPlayerFactory::default()),
        settings.pipeline_config(),
    ));

    let (handle, mut events) =
        PlaybackResourceManager::spawn(pipeline, settings.manager_config(), None);

    let event_log = tokio::spawn(async move {
        while let Some(evt) = events.recv().await {
            match evt {
                ManagerEvent::Ready { index } => tracing::info!(index, "预加载完成"),
                ManagerEvent::Failed { index, error } => {
                    tracing::warn!(index, err = %error, "预加载失败")
                }
                ManagerEvent::Completed { index } => tracing::info!(index, "播放结束"),
            }
        }
    });

    let results = join_all(urls.iter().enumerate().map(|(i, url)| {
        let handle = handle.clone();
        async move { handle.preload(i as i64, url.as_str()).await }
    }))
    .await;

    // 失败原因已经由管理器以 WARN 输出到 stderr
    let failed = results.iter().filter(|res| res.is_err()).count();

    if let Some(index) = active {
        handle.pause_all_except(index).await?;
    }

    println!("{}", serde_json::to_string_pretty(&handle.snapshot())?);

    drop(handle);
    let _ = event_log.await;

    if failed > 0 {
        return Err(AppError::Other(format!(
            "{failed}/{} 个视频预加载失败",
            results.len()
        )));
    }
    Ok(())
}
