use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::prefs::UserPreferences;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub effect: EffectConfig,
    /// 設定ストアの初期値
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// ホストループのフレームレート
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    /// レコーダーパネルを表示するか
    #[serde(default)]
    pub recorder_panel: bool,
}

fn default_target_fps() -> u32 { 72 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            recorder_panel: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// 「続ける」を出すのに必要なトラッカー数
    #[serde(default = "default_expected_units")]
    pub expected_units: u32,
    /// リモート身長取得の待ち時間上限（ミリ秒）
    #[serde(default = "default_profile_timeout_ms")]
    pub profile_timeout_ms: u64,
}

fn default_expected_units() -> u32 { 2 }
fn default_profile_timeout_ms() -> u64 { 3000 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_units: default_expected_units(),
            profile_timeout_ms: default_profile_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EffectConfig {
    /// つま先エフェクトの下方向オフセット（メートル）
    #[serde(default = "default_toe_drop")]
    pub toe_drop: f32,
    /// かかとエフェクトの下方向オフセット（メートル）
    #[serde(default = "default_heel_drop")]
    pub heel_drop: f32,
}

fn default_toe_drop() -> f32 { 0.02 }
fn default_heel_drop() -> f32 { 0.08 }

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            toe_drop: default_toe_drop(),
            heel_drop: default_heel_drop(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// tracing-subscriberのフィルタ（RUST_LOGが優先）
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String { "info".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// 読めなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }
}
