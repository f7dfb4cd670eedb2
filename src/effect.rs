//! 接地エフェクトの再生判定
//!
//! エフェクトモード:
//! - 0: なし
//! - 1: かかと・つま先ともにパーティクル + 音
//! - 2: かかとのみパーティクル + 音
//! - 3: つま先のみパーティクル + 音
//! - それ以外: 音のみ（検証せずそのまま扱う）

use tracing::{debug, info};

use crate::config::EffectConfig;
use crate::contact::ContactEvent;
use crate::rig::ContactFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectMode {
    Off,
    Both,
    HeelVisual,
    ToeVisual,
    /// 範囲外の値。音だけ鳴らす
    Unrecognized(i32),
}

impl EffectMode {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => EffectMode::Off,
            1 => EffectMode::Both,
            2 => EffectMode::HeelVisual,
            3 => EffectMode::ToeVisual,
            other => EffectMode::Unrecognized(other),
        }
    }

    fn particles_for(self, kind: EffectKind) -> bool {
        matches!(
            (self, kind),
            (EffectMode::Both, _)
                | (EffectMode::HeelVisual, EffectKind::Heel)
                | (EffectMode::ToeVisual, EffectKind::Toe)
        )
    }
}

/// 再生するエフェクトの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Heel,
    Toe,
}

impl EffectKind {
    /// アクションビットからの変換。追跡対象外ならNone
    pub fn from_action(action: ContactFlags) -> Option<Self> {
        if action == ContactFlags::TOUCH_GROUND {
            Some(EffectKind::Heel)
        } else if action == ContactFlags::TOUCH_GROUND_TOE {
            Some(EffectKind::Toe)
        } else {
            None
        }
    }
}

/// パーティクル・効果音の再生先
pub trait EffectPlayer {
    fn play_particles(&mut self, kind: EffectKind, position: [f32; 3]);
    fn play_sound(&mut self, kind: EffectKind, position: [f32; 3]);
}

/// ダンスパッド穴判定に渡す1フレーム分の足情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepFrame {
    pub left_position: [f32; 3],
    pub right_position: [f32; 3],
    pub left_action: ContactFlags,
    pub right_action: ContactFlags,
    pub left_last_action: ContactFlags,
    pub right_last_action: ContactFlags,
}

/// エフェクトより優先されるミニゲーム（ダンスパッド）
pub trait Minigame {
    /// 実行中ならエフェクトの再生を止める
    fn is_overriding_active(&self) -> bool;

    /// プレイ中の毎フレーム、接地判定の前に呼ばれる
    fn on_step_frame(&mut self, _frame: &StepFrame) {}
}

/// 何もしないミニゲーム
#[derive(Debug, Default)]
pub struct IdleMinigame;

impl Minigame for IdleMinigame {
    fn is_overriding_active(&self) -> bool {
        false
    }
}

/// ログに出すだけの再生先
#[derive(Debug, Default)]
pub struct LogEffects;

impl EffectPlayer for LogEffects {
    fn play_particles(&mut self, kind: EffectKind, position: [f32; 3]) {
        info!("Particles {:?} at [{:.3}, {:.3}, {:.3}]", kind, position[0], position[1], position[2]);
    }

    fn play_sound(&mut self, kind: EffectKind, position: [f32; 3]) {
        info!("Sound {:?} at [{:.3}, {:.3}, {:.3}]", kind, position[0], position[1], position[2]);
    }
}

/// 接地イベント→エフェクト再生
pub struct EffectDispatcher {
    toe_drop: f32,
    heel_drop: f32,
}

impl EffectDispatcher {
    pub fn new(toe_drop: f32, heel_drop: f32) -> Self {
        Self { toe_drop, heel_drop }
    }

    pub fn from_config(config: &EffectConfig) -> Self {
        Self::new(config.toe_drop, config.heel_drop)
    }

    /// イベント1件を再生する。再生しなかった場合はfalse
    pub fn dispatch(
        &self,
        event: &ContactEvent,
        mode: EffectMode,
        minigame: &dyn Minigame,
        player: &mut dyn EffectPlayer,
    ) -> bool {
        if mode == EffectMode::Off {
            return false;
        }
        let Some(kind) = EffectKind::from_action(event.action) else {
            return false;
        };
        if minigame.is_overriding_active() {
            return false;
        }

        let sink = match kind {
            EffectKind::Toe => self.toe_drop,
            EffectKind::Heel => self.heel_drop,
        };
        let p = event.position;
        let target = [p[0], p[1] - sink, p[2]];

        if mode.particles_for(kind) {
            player.play_particles(kind, target);
        }
        player.play_sound(kind, target);
        debug!(
            "Step effect: foot = {:?}, kind = {:?}, mode = {:?}, target = {:?}",
            event.foot, kind, mode, target
        );
        true
    }
}

impl Default for EffectDispatcher {
    fn default() -> Self {
        Self::from_config(&EffectConfig::default())
    }
}
