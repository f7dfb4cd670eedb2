use serde::Deserialize;

/// ユーザー設定（外部所有のキー・バリュー）
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UserPreferences {
    /// トラッキングモード（デバイスにそのまま渡す）
    #[serde(default)]
    pub tracking_mode: i32,
    /// 踏み込み感度
    #[serde(default = "default_sensitivity")]
    pub stepping_sensitivity: f32,
    /// 接地エフェクトモード 0=off 1=両方 2=かかと 3=つま先
    #[serde(default = "default_stepping_effect")]
    pub stepping_effect: i32,
    /// 身長（cm）
    #[serde(default = "default_height")]
    pub height_cm: f32,
}

fn default_sensitivity() -> f32 { 0.5 }
fn default_stepping_effect() -> i32 { 1 }
fn default_height() -> f32 { 175.0 }

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            tracking_mode: 0,
            stepping_sensitivity: default_sensitivity(),
            stepping_effect: default_stepping_effect(),
            height_cm: default_height(),
        }
    }
}

/// 設定ストア。永続化は所有者側の責務
pub trait PreferenceStore {
    fn get(&self) -> UserPreferences;
    fn set(&mut self, prefs: UserPreferences);

    fn update(&mut self, f: &mut dyn FnMut(&mut UserPreferences)) {
        let mut prefs = self.get();
        f(&mut prefs);
        self.set(prefs);
    }
}

/// メモリ上の設定ストア
#[derive(Debug, Default, Clone)]
pub struct MemoryPreferences {
    prefs: UserPreferences,
}

impl MemoryPreferences {
    pub fn new(prefs: UserPreferences) -> Self {
        Self { prefs }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self) -> UserPreferences {
        self.prefs.clone()
    }

    fn set(&mut self, prefs: UserPreferences) {
        self.prefs = prefs;
    }
}
