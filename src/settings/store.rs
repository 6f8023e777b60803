use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::error::SettingsError;
use crate::manager::ManagerConfig;
use crate::media::TransportConfig;
use crate::monitor::MonitorConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    // 缓存
    #[serde(default = "default_memory_cache_entries")]
    pub memory_cache_entries: usize,
    #[serde(default = "default_memory_cache_max_mb")]
    pub memory_cache_max_mb: usize,
    #[serde(default = "default_disk_cache_max_mb")]
    pub disk_cache_max_mb: usize,

    // 预加载 / 重试
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: u64,
    #[serde(default = "default_verification_timeout_secs")]
    pub verification_timeout_secs: u64,
    #[serde(default = "default_verification_poll_ms")]
    pub verification_poll_ms: u64,

    // 缓冲 / 播放结束检测
    #[serde(default = "default_buffer_target_secs")]
    pub buffer_target_secs: u64,
    #[serde(default = "default_buffer_sample_ms")]
    pub buffer_sample_ms: u64,
    #[serde(default = "default_completion_sample_ms")]
    pub completion_sample_ms: u64,
    #[serde(default = "default_completion_epsilon_ms")]
    pub completion_epsilon_ms: u64,
    #[serde(default = "default_min_played_ratio")]
    pub min_played_ratio: f64,
    #[serde(default = "default_restart_window_ms")]
    pub restart_window_ms: u64,
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,

    // 切换与清理
    #[serde(default = "default_transition_settle_ms")]
    pub transition_settle_ms: u64,
    #[serde(default = "default_keep_radius")]
    pub keep_radius: i64,

    // 传输
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_http_connect_timeout_secs")]
    pub http_connect_timeout_secs: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            memory_cache_entries: default_memory_cache_entries(),
            memory_cache_max_mb: default_memory_cache_max_mb(),
            disk_cache_max_mb: default_disk_cache_max_mb(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            pipeline_timeout_secs: default_pipeline_timeout_secs(),
            verification_timeout_secs: default_verification_timeout_secs(),
            verification_poll_ms: default_verification_poll_ms(),
            buffer_target_secs: default_buffer_target_secs(),
            buffer_sample_ms: default_buffer_sample_ms(),
            completion_sample_ms: default_completion_sample_ms(),
            completion_epsilon_ms: default_completion_epsilon_ms(),
            min_played_ratio: default_min_played_ratio(),
            restart_window_ms: default_restart_window_ms(),
            reload_delay_ms: default_reload_delay_ms(),
            transition_settle_ms: default_transition_settle_ms(),
            keep_radius: default_keep_radius(),
            http_timeout_secs: default_http_timeout_secs(),
            http_connect_timeout_secs: default_http_connect_timeout_secs(),
        }
    }
}

// 默认值函数（用于 serde default）
fn default_memory_cache_entries() -> usize { 10 }
fn default_memory_cache_max_mb() -> usize { 500 }
fn default_disk_cache_max_mb() -> usize { 2048 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 1000 }
fn default_pipeline_timeout_secs() -> u64 { 30 }
fn default_verification_timeout_secs() -> u64 { 10 }
fn default_verification_poll_ms() -> u64 { 50 }
fn default_buffer_target_secs() -> u64 { 10 }
fn default_buffer_sample_ms() -> u64 { 1000 }
fn default_completion_sample_ms() -> u64 { 100 }
fn default_completion_epsilon_ms() -> u64 { 150 }
fn default_min_played_ratio() -> f64 { 0.5 }
fn default_restart_window_ms() -> u64 { 1000 }
fn default_reload_delay_ms() -> u64 { 1000 }
fn default_transition_settle_ms() -> u64 { 0 }
fn default_keep_radius() -> i64 { 1 }
fn default_http_timeout_secs() -> u64 { 30 }
fn default_http_connect_timeout_secs() -> u64 { 10 }

impl PlaybackSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.memory_cache_entries,
            max_cost_mb: self.memory_cache_max_mb,
            disk_max_mb: self.disk_cache_max_mb,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            http_timeout_secs: self.http_timeout_secs,
            http_connect_timeout_secs: self.http_connect_timeout_secs,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                initial_delay: Duration::from_millis(self.initial_backoff_ms),
            },
            pipeline_timeout: Duration::from_secs(self.pipeline_timeout_secs),
            verify_timeout: Duration::from_secs(self.verification_timeout_secs),
            verify_poll: Duration::from_millis(self.verification_poll_ms.max(1)),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            monitor: MonitorConfig {
                buffer_target: Duration::from_secs(self.buffer_target_secs),
                buffer_sample: Duration::from_millis(self.buffer_sample_ms),
                completion_sample: Duration::from_millis(self.completion_sample_ms),
                completion_epsilon: Duration::from_millis(self.completion_epsilon_ms),
                min_played_ratio: self.min_played_ratio,
                restart_window: Duration::from_millis(self.restart_window_ms),
                reload_delay: Duration::from_millis(self.reload_delay_ms),
            },
            keep_radius: self.keep_radius,
            transition_settle: Duration::from_millis(self.transition_settle_ms),
        }
    }

    /// 环境变量覆盖文件里的缓存/传输设置
    pub fn apply_env_overrides(&mut self) {
        env_override("FEED_PLAYBACK_CACHE_MAX_MB", &mut self.memory_cache_max_mb);
        env_override("FEED_PLAYBACK_DISK_CACHE_MAX_MB", &mut self.disk_cache_max_mb);
        env_override("FEED_PLAYBACK_HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs);
        env_override(
            "FEED_PLAYBACK_HTTP_CONNECT_TIMEOUT_SECS",
            &mut self.http_connect_timeout_secs,
        );
    }
}

fn env_override<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Some(v) = std::env::var(key).ok().and_then(|s| s.parse().ok()) {
        *slot = v;
    }
}

pub fn load_settings(data_dir: &Path) -> PlaybackSettings {
    let p = settings_path(data_dir);
    let Ok(bytes) = fs::read(&p) else {
        return PlaybackSettings::default();
    };
    match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %p.display(), err = %e, "设置文件损坏，使用默认值");
            PlaybackSettings::default()
        }
    }
}

pub fn save_settings(data_dir: &Path, s: &PlaybackSettings) -> Result<(), SettingsError> {
    write_settings(data_dir, s).map_err(|source| SettingsError::Save { source })
}

fn write_settings(data_dir: &Path, s: &PlaybackSettings) -> std::io::Result<()> {
    fs::create_dir_all(data_dir)?;
    let p = settings_path(data_dir);
    let tmp = p.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(s).unwrap_or_else(|_| b"{}".to_vec());
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, &p) {
        let _ = fs::remove_file(&p);
        fs::rename(&tmp, &p).map_err(|_| e)?;
    }
    Ok(())
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}
