use tracing::debug;

/// セッションが表示を切り替えるパネル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Panel {
    StartMenu,
    /// スタートメニューの「続ける」ボタン
    ContinueButton,
    Mirror,
    DancePadUi,
    MotionTrackerUi,
    DisplaySettingUi,
    RecorderUi,
    /// ダンスパッド本体
    DancePad,
}

impl Panel {
    /// プレイ中だけ表示するパネル（レコーダーは設定次第）
    pub const IN_SESSION: [Panel; 5] = [
        Panel::Mirror,
        Panel::DancePadUi,
        Panel::MotionTrackerUi,
        Panel::DisplaySettingUi,
        Panel::DancePad,
    ];
}

/// パネル表示の切り替え先（状態は持たない）
pub trait PanelHost {
    fn set_panel_visible(&mut self, panel: Panel, visible: bool);
}

/// ログに出すだけのパネルホスト
#[derive(Debug, Default)]
pub struct LogPanels;

impl PanelHost for LogPanels {
    fn set_panel_visible(&mut self, panel: Panel, visible: bool) {
        debug!("Panel {:?} -> {}", panel, if visible { "shown" } else { "hidden" });
    }
}
