//! レッグトラッキングのセッション管理
//!
//! ライフサイクル: Start → Calibrating → Calibrated → Playing
//!
//! ホストは毎フレーム[`Session::tick`]を呼び、アプリ復帰・フォーカス取得時に
//! [`Session::on_resume`] / [`Session::on_focus_gained`]を呼ぶ。
//! 状態の変更はすべてこの呼び出しの中（ロジックスレッド）で行う。

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::contact::{ContactDetector, ContactEvent};
use crate::device::DeviceBridge;
use crate::effect::{EffectDispatcher, EffectMode, EffectPlayer, Minigame, StepFrame};
use crate::error::SessionError;
use crate::prefs::{PreferenceStore, UserPreferences};
use crate::profile::{AvatarProfile, ProfilePoll, ProfileRequest, ProfileService, MIN_HEIGHT_CM};
use crate::rig::{AvatarRig, BoneIndex, ContactFlags, Foot, Skeleton};
use crate::ui::{Panel, PanelHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Calibrating,
    Calibrated,
    Playing,
}

/// アバターロードの進行段階（同時に一つだけ）
#[derive(Debug)]
enum LoadStage {
    Idle,
    /// リモート身長の応答待ち
    ResolvingHeight {
        request: ProfileRequest,
        deadline: Instant,
        previous: SessionState,
    },
    /// リスケール済み。次のtickでボーン位置が新スケールになってからグラウンド合わせ
    PendingFrame { profile: AvatarProfile },
}

/// セッションが使う外部コンポーネント
pub struct Collaborators {
    pub device: Box<dyn DeviceBridge>,
    pub preferences: Box<dyn PreferenceStore>,
    /// 無ければ保存済み身長をそのまま使う
    pub profile: Option<Box<dyn ProfileService>>,
    pub minigame: Box<dyn Minigame>,
    pub effects: Box<dyn EffectPlayer>,
    pub panels: Box<dyn PanelHost>,
}

pub struct Session {
    state: SessionState,
    stage: LoadStage,
    expected_units: u32,
    profile_timeout: Duration,
    recorder_panel: bool,
    avatar: Skeleton,
    rig: Option<AvatarRig>,
    avatar_profile: Option<AvatarProfile>,
    /// トラッキング原点のワールド位置。yはグラウンド合わせの基準を兼ねる
    origin: [f32; 3],
    completed_loads: u32,
    detector: ContactDetector,
    dispatcher: EffectDispatcher,
    device: Box<dyn DeviceBridge>,
    preferences: Box<dyn PreferenceStore>,
    profile_service: Option<Box<dyn ProfileService>>,
    minigame: Box<dyn Minigame>,
    effects: Box<dyn EffectPlayer>,
    panels: Box<dyn PanelHost>,
}

impl Session {
    /// セッションを作成する。アバターと各パネルを隠し、原点をリセンターする
    pub fn new(config: &Config, avatar: Skeleton, collaborators: Collaborators) -> Self {
        let Collaborators {
            device,
            preferences,
            profile,
            minigame,
            effects,
            panels,
        } = collaborators;

        let mut session = Self {
            state: SessionState::Start,
            stage: LoadStage::Idle,
            expected_units: config.session.expected_units,
            profile_timeout: Duration::from_millis(config.session.profile_timeout_ms),
            recorder_panel: config.app.recorder_panel,
            avatar,
            rig: None,
            avatar_profile: None,
            origin: [0.0; 3],
            completed_loads: 0,
            detector: ContactDetector::new(),
            dispatcher: EffectDispatcher::from_config(&config.effect),
            device,
            preferences,
            profile_service: profile,
            minigame,
            effects,
            panels,
        };

        session.set_in_session_panels(false);
        session.panels.set_panel_visible(Panel::RecorderUi, false);
        session.device.recenter_origin();
        session
    }

    /// 原点の初期位置を指定
    pub fn with_origin(mut self, origin: [f32; 3]) -> Self {
        self.origin = origin;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// ロード（身長取得・1フレーム待ち）が進行中か
    pub fn is_loading(&self) -> bool {
        !matches!(self.stage, LoadStage::Idle)
    }

    pub fn rig(&self) -> Option<&AvatarRig> {
        self.rig.as_ref()
    }

    pub fn avatar_profile(&self) -> Option<AvatarProfile> {
        self.avatar_profile
    }

    pub fn origin(&self) -> [f32; 3] {
        self.origin
    }

    /// 完了したアバターロードの回数
    pub fn completed_loads(&self) -> u32 {
        self.completed_loads
    }

    pub fn preferences(&self) -> UserPreferences {
        self.preferences.get()
    }

    /// 前フレームの接地フラグ
    pub fn last_contact(&self, foot: Foot) -> ContactFlags {
        self.detector.previous(foot)
    }

    // --- ホストからのイベント ---

    /// アプリ復帰（ポーズ解除）
    pub fn on_resume(&mut self) {
        self.update_fitness_band_state();
    }

    /// フォーカス取得。Startのままなら何もしない
    pub fn on_focus_gained(&mut self) {
        if self.state == SessionState::Start {
            return;
        }
        self.update_fitness_band_state();
    }

    /// スタートメニューの「続ける」
    pub fn on_continue(&mut self) {
        self.update_fitness_band_state();
    }

    /// 毎フレーム1回呼ぶ。プレイ中に検出した接地イベントを返す
    pub fn tick(&mut self) -> Vec<ContactEvent> {
        // 1フレーム待ちの間だけ検出しない（身長取得待ちは旧リグで続ける）
        let detecting = self.state == SessionState::Playing
            && !matches!(self.stage, LoadStage::PendingFrame { .. });

        if let Some(rig) = self.rig.as_mut() {
            if let Some(frame) = self.device.latest_frame() {
                rig.apply_frame(&frame);
            }
        }

        if let LoadStage::PendingFrame { profile } = self.stage {
            self.finish_load(profile);
        }

        let events = if detecting {
            self.detect_contacts()
        } else {
            // 検出しない間は前フレーム状態だけ追従させる
            if let Some(rig) = self.rig.as_ref() {
                self.detector.prime(rig);
            }
            Vec::new()
        };

        self.poll_profile();
        events
    }

    // --- 状態遷移 ---

    /// デバイスの接続・キャリブレーション状態を問い合わせて反映する
    ///
    /// 何度呼んでもよい。状態はキャリブレーション結果が示す範囲でしか動かさない。
    pub fn update_fitness_band_state(&mut self) {
        let prefs = self.preferences.get();
        self.device.set_tracking_mode(prefs.tracking_mode);

        if self.device.query_calibration_state() {
            self.panels.set_panel_visible(Panel::StartMenu, false);
            info!("Fitness band calibrated");
            if let Err(e) = self.start_session() {
                debug!("Session start skipped: {}", e);
            }
        } else {
            if self.rig.as_ref().is_some_and(|r| r.is_active()) {
                self.hide_avatar();
            }
            let connect = self.device.query_connection_state();
            self.panels.set_panel_visible(Panel::StartMenu, true);
            self.panels.set_panel_visible(
                Panel::ContinueButton,
                connect.connected_count == self.expected_units,
            );
            info!("Fitness band not calibrated: connected = {}", connect.connected_count);
        }
    }

    /// キャリブレーション開始（ユーザー操作）
    ///
    /// Playingは終端状態なので、プレイ中はアバターを隠すだけで状態は変えない。
    pub fn start_calibration(&mut self) -> Result<(), SessionError> {
        if self.is_loading() {
            warn!("Calibration requested during avatar load, ignored");
            return Err(SessionError::LoadInProgress);
        }
        self.device.start_calibration();
        if self.state != SessionState::Playing {
            self.state = SessionState::Calibrating;
        }
        self.hide_avatar();
        info!("Calibration started");
        Ok(())
    }

    /// 身長を確定してアバターロードを始める
    ///
    /// リモート身長取得があればその応答（または失敗・タイムアウト）を待つ。
    /// プレイ中に呼ばれた場合はPlayingのまま再ロードする。
    pub fn start_session(&mut self) -> Result<(), SessionError> {
        if self.is_loading() {
            return Err(SessionError::LoadInProgress);
        }
        let previous = self.state;
        if previous != SessionState::Playing {
            self.state = SessionState::Calibrated;
        }

        let request = match self.profile_service.as_mut() {
            Some(service) => match service.request_user_info() {
                Ok(request) => Some(request),
                Err(e) => {
                    warn!("User info request failed: {:#}", e);
                    None
                }
            },
            None => None,
        };

        match request {
            Some(request) => {
                self.stage = LoadStage::ResolvingHeight {
                    request,
                    deadline: Instant::now() + self.profile_timeout,
                    previous,
                };
                Ok(())
            }
            None => {
                let height = self.preferences.get().height_cm;
                self.begin_load(height, previous)
            }
        }
    }

    /// アバターを隠す
    pub fn hide_avatar(&mut self) {
        if let Some(rig) = self.rig.as_mut() {
            rig.set_active(false);
        }
    }

    /// 低い方の足が足裏高さに来るようにトラッキング原点のyを動かす
    ///
    /// 基準yは毎回更新する（前回の合わせからの相対）。新しい原点yを返す。
    pub fn align_ground(&mut self) -> Result<f32, SessionError> {
        let Some(rig) = self.rig.as_ref() else {
            error!("There is no loaded avatar!");
            return Err(SessionError::NoAvatarLoaded);
        };

        let left = self.origin[1] + rig.bone_position(BoneIndex::LeftFoot)[1];
        let right = self.origin[1] + rig.bone_position(BoneIndex::RightFoot)[1];
        let start_foot_height = left.min(right);

        let origin_y = self.origin[1] - (start_foot_height - rig.sole_height());
        self.origin[1] = origin_y;

        info!(
            "AlignGround: start foot height = {:.4}, origin = {:?}",
            start_foot_height, self.origin
        );
        Ok(origin_y)
    }

    // --- 設定パネル ---

    pub fn on_tracking_mode_changed(&mut self, mode: i32) {
        self.preferences.update(&mut |p| p.tracking_mode = mode);
        self.device.set_tracking_mode(mode);
        info!("Tracking mode changed: {}", mode);
    }

    pub fn on_sensitivity_changed(&mut self, value: f32) {
        self.preferences.update(&mut |p| p.stepping_sensitivity = value);
        info!("Stepping sensitivity changed: {:.2}", value);
    }

    /// 次のアバターロードから反映
    pub fn on_height_changed(&mut self, height_cm: f32) {
        self.preferences.update(&mut |p| p.height_cm = height_cm);
        debug!("Height changed: {:.0}", height_cm);
    }

    pub fn on_effect_mode_changed(&mut self, mode: i32) {
        self.preferences.update(&mut |p| p.stepping_effect = mode);
        debug!("Stepping effect changed: {}", mode);
    }

    // --- ロード ---

    fn poll_profile(&mut self) {
        let LoadStage::ResolvingHeight { request, deadline, previous } = &self.stage else {
            return;
        };
        let result = match request.poll() {
            ProfilePoll::Complete(result) => result,
            ProfilePoll::Pending if Instant::now() >= *deadline => {
                Err("timed out".to_string())
            }
            ProfilePoll::Pending => return,
        };
        let previous = *previous;

        match result {
            Ok(user) => {
                if user.stature_cm > MIN_HEIGHT_CM {
                    self.preferences.update(&mut |p| p.height_cm = user.stature_cm);
                }
                info!("GetUserInfo: success, height = {}", user.stature_cm);
            }
            Err(msg) => warn!("GetUserInfo: failed, msg = {}", msg),
        }

        self.stage = LoadStage::Idle;
        let height = self.preferences.get().height_cm;
        // 失敗はbegin_load内でログ済み
        let _ = self.begin_load(height, previous);
    }

    /// ロード手順のうち1フレーム待ちの手前まで
    fn begin_load(&mut self, height_cm: f32, previous: SessionState) -> Result<(), SessionError> {
        let profile = AvatarProfile::from_height(height_cm);

        self.device.recenter_origin();

        let mut rig = match AvatarRig::load_skeleton(self.avatar.clone()) {
            Ok(rig) => rig,
            Err(e) => {
                error!("Avatar load aborted: {}", e);
                self.stage = LoadStage::Idle;
                self.state = previous;
                return Err(e);
            }
        };
        rig.reset_transform();
        rig.set_active(true);
        if let Some(frame) = self.device.latest_frame() {
            rig.apply_frame(&frame);
        }
        self.detector.prime(&rig);

        rig.rescale(profile.scale_factor);
        rig.set_active(false);

        self.rig = Some(rig);
        self.avatar_profile = Some(profile);
        self.stage = LoadStage::PendingFrame { profile };
        debug!(
            "Avatar rescaled: height = {}, scale = {:.4}, waiting one frame",
            profile.height_cm, profile.scale_factor
        );
        Ok(())
    }

    fn finish_load(&mut self, profile: AvatarProfile) {
        self.stage = LoadStage::Idle;
        if self.align_ground().is_err() {
            return;
        }

        if let Some(rig) = self.rig.as_mut() {
            rig.set_active(true);
        }
        self.set_in_session_panels(true);
        if self.recorder_panel {
            self.panels.set_panel_visible(Panel::RecorderUi, true);
        }

        self.state = SessionState::Playing;
        self.completed_loads += 1;
        if let Some(rig) = self.rig.as_ref() {
            info!(
                "Avatar loaded: avatar = {}, height = {}",
                rig.name(),
                profile.height_cm
            );
        }
    }

    fn set_in_session_panels(&mut self, visible: bool) {
        for panel in Panel::IN_SESSION {
            self.panels.set_panel_visible(panel, visible);
        }
    }

    // --- 接地 ---

    fn detect_contacts(&mut self) -> Vec<ContactEvent> {
        let Some(rig) = self.rig.as_ref() else {
            return Vec::new();
        };

        let world = |bone: BoneIndex| {
            let p = rig.bone_position(bone);
            [self.origin[0] + p[0], self.origin[1] + p[1], self.origin[2] + p[2]]
        };
        let step = StepFrame {
            left_position: world(BoneIndex::LeftFoot),
            right_position: world(BoneIndex::RightFoot),
            left_action: rig.current_contact_mask(Foot::Left),
            right_action: rig.current_contact_mask(Foot::Right),
            left_last_action: self.detector.previous(Foot::Left),
            right_last_action: self.detector.previous(Foot::Right),
        };
        self.minigame.on_step_frame(&step);

        let events = self.detector.process(rig, self.origin);
        if events.is_empty() {
            return events;
        }

        let mode = EffectMode::from_raw(self.preferences.get().stepping_effect);
        for event in &events {
            self.dispatcher
                .dispatch(event, mode, self.minigame.as_ref(), self.effects.as_mut());
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimDevice, SimDeviceHandle};
    use crate::effect::EffectKind;
    use crate::prefs::MemoryPreferences;
    use crate::profile::{profile_channel, scale_factor, ProfileResponder, UserInfo};
    use crate::rig::SkeletonFrame;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    type PanelMap = Rc<RefCell<HashMap<Panel, bool>>>;
    type EffectCalls = Rc<RefCell<Vec<(&'static str, EffectKind)>>>;

    struct PanelLog(PanelMap);

    impl PanelHost for PanelLog {
        fn set_panel_visible(&mut self, panel: Panel, visible: bool) {
            self.0.borrow_mut().insert(panel, visible);
        }
    }

    struct EffectLog(EffectCalls);

    impl EffectPlayer for EffectLog {
        fn play_particles(&mut self, kind: EffectKind, _position: [f32; 3]) {
            self.0.borrow_mut().push(("particles", kind));
        }
        fn play_sound(&mut self, kind: EffectKind, _position: [f32; 3]) {
            self.0.borrow_mut().push(("sound", kind));
        }
    }

    struct SwitchMinigame {
        active: Rc<Cell<bool>>,
        frames: Rc<RefCell<Vec<StepFrame>>>,
    }

    impl Minigame for SwitchMinigame {
        fn is_overriding_active(&self) -> bool {
            self.active.get()
        }
        fn on_step_frame(&mut self, frame: &StepFrame) {
            self.frames.borrow_mut().push(*frame);
        }
    }

    /// 応答をテスト側から返すプロファイルサービス
    struct ManualProfile {
        responders: Rc<RefCell<Vec<ProfileResponder>>>,
    }

    impl ProfileService for ManualProfile {
        fn request_user_info(&mut self) -> anyhow::Result<ProfileRequest> {
            let (responder, request) = profile_channel();
            self.responders.borrow_mut().push(responder);
            Ok(request)
        }
    }

    struct BrokenProfile;

    impl ProfileService for BrokenProfile {
        fn request_user_info(&mut self) -> anyhow::Result<ProfileRequest> {
            anyhow::bail!("service not initialized")
        }
    }

    enum ProfileMode {
        Absent,
        Manual,
        Broken,
    }

    struct Harness {
        session: Session,
        device: SimDeviceHandle,
        panels: PanelMap,
        effects: EffectCalls,
        minigame_active: Rc<Cell<bool>>,
        step_frames: Rc<RefCell<Vec<StepFrame>>>,
        responders: Rc<RefCell<Vec<ProfileResponder>>>,
    }

    impl Harness {
        fn panel(&self, panel: Panel) -> Option<bool> {
            self.panels.borrow().get(&panel).copied()
        }

        fn respond(&self, result: Result<UserInfo, String>) {
            let responder = self.responders.borrow_mut().remove(0);
            responder.complete(result);
        }

        fn avatar_active(&self) -> bool {
            self.session.rig().is_some_and(|r| r.is_active())
        }

        /// キャリブレーション済みにして復帰→1tickでプレイ開始
        fn load(&mut self) {
            self.device.set_calibrated(true);
            self.session.on_resume();
            self.session.tick();
            assert_eq!(self.session.state(), SessionState::Playing);
        }
    }

    fn approx_eq_f32(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn build(avatar: Skeleton, config: Config, prefs: UserPreferences, mode: ProfileMode) -> Harness {
        let sim = SimDevice::new();
        let device = sim.handle();
        device.set_frame(SkeletonFrame::standing([0.0, 1.0, 0.0]));
        let panels = PanelMap::default();
        let effects = EffectCalls::default();
        let minigame_active = Rc::new(Cell::new(false));
        let step_frames = Rc::new(RefCell::new(Vec::new()));
        let responders = Rc::new(RefCell::new(Vec::new()));

        let profile: Option<Box<dyn ProfileService>> = match mode {
            ProfileMode::Absent => None,
            ProfileMode::Manual => Some(Box::new(ManualProfile {
                responders: responders.clone(),
            })),
            ProfileMode::Broken => Some(Box::new(BrokenProfile)),
        };

        let session = Session::new(
            &config,
            avatar,
            Collaborators {
                device: Box::new(sim),
                preferences: Box::new(MemoryPreferences::new(prefs)),
                profile,
                minigame: Box::new(SwitchMinigame {
                    active: minigame_active.clone(),
                    frames: step_frames.clone(),
                }),
                effects: Box::new(EffectLog(effects.clone())),
                panels: Box::new(PanelLog(panels.clone())),
            },
        );

        Harness {
            session,
            device,
            panels,
            effects,
            minigame_active,
            step_frames,
            responders,
        }
    }

    fn harness_with_height(height_cm: f32) -> Harness {
        let prefs = UserPreferences {
            height_cm,
            ..UserPreferences::default()
        };
        build(Skeleton::reference("avatar"), Config::default(), prefs, ProfileMode::Absent)
    }

    fn harness() -> Harness {
        harness_with_height(175.0)
    }

    #[test]
    fn test_initial_state() {
        let h = harness();
        assert_eq!(h.session.state(), SessionState::Start);
        assert!(h.session.rig().is_none());
        for panel in Panel::IN_SESSION {
            assert_eq!(h.panel(panel), Some(false));
        }
        assert_eq!(h.panel(Panel::RecorderUi), Some(false));
        assert_eq!(h.device.recenters(), 1);
    }

    #[test]
    fn test_continue_visible_with_two_units() {
        let mut h = harness();
        h.device.set_connected(2);
        h.session.on_resume();
        assert_eq!(h.session.state(), SessionState::Start);
        assert_eq!(h.panel(Panel::StartMenu), Some(true));
        assert_eq!(h.panel(Panel::ContinueButton), Some(true));
    }

    #[test]
    fn test_continue_hidden_with_one_unit() {
        let mut h = harness();
        h.device.set_connected(1);
        h.session.on_resume();
        assert_eq!(h.panel(Panel::StartMenu), Some(true));
        assert_eq!(h.panel(Panel::ContinueButton), Some(false));
    }

    #[test]
    fn test_poll_pushes_tracking_mode() {
        let prefs = UserPreferences {
            tracking_mode: 2,
            ..UserPreferences::default()
        };
        let mut h = build(Skeleton::reference("a"), Config::default(), prefs, ProfileMode::Absent);
        h.session.on_resume();
        assert_eq!(h.device.tracking_mode(), Some(2));
    }

    #[test]
    fn test_focus_ignored_in_start() {
        let mut h = harness();
        h.device.set_calibrated(true);
        h.session.on_focus_gained();
        assert_eq!(h.session.state(), SessionState::Start);
        assert_eq!(h.device.tracking_mode(), None);
    }

    #[test]
    fn test_poll_is_idempotent_while_uncalibrated() {
        let mut h = harness();
        h.device.set_connected(2);
        for _ in 0..3 {
            h.session.on_resume();
            h.session.tick();
        }
        assert_eq!(h.session.state(), SessionState::Start);
        assert!(!h.session.is_loading());
        assert_eq!(h.panel(Panel::ContinueButton), Some(true));
    }

    #[test]
    fn test_end_to_end_load() {
        let mut h = harness_with_height(180.0);
        h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::TOUCH_GROUND_TOE);
        h.device.set_calibrated(true);

        h.session.on_resume();
        assert_eq!(h.session.state(), SessionState::Calibrated);
        assert!(h.session.is_loading());
        assert_eq!(h.panel(Panel::StartMenu), Some(false));
        let profile = h.session.avatar_profile().unwrap();
        assert!(approx_eq_f32(profile.scale_factor, 1.069714, 1e-5));
        assert_eq!(h.session.rig().unwrap().scale(), profile.scale_factor);
        // 1フレーム待ちの間は非表示
        assert!(!h.avatar_active());
        assert_eq!(h.device.recenters(), 2);

        // 最初のプレイフレーム: 接地フラグが立っていてもイベントは出ない
        let events = h.session.tick();
        assert!(events.is_empty());
        assert_eq!(h.session.state(), SessionState::Playing);
        assert_eq!(h.session.completed_loads(), 1);
        assert!(h.avatar_active());
        for panel in Panel::IN_SESSION {
            assert_eq!(h.panel(panel), Some(true));
        }
        assert_eq!(h.panel(Panel::RecorderUi), Some(false));

        for _ in 0..5 {
            assert!(h.session.tick().is_empty());
        }
        assert_eq!(h.session.completed_loads(), 1);
        assert!(h.effects.borrow().is_empty());
    }

    #[test]
    fn test_alignment_uses_new_scale() {
        let mut h = harness_with_height(180.0);
        h.load();
        let s = scale_factor(180.0);
        let foot_local = 1.0 - 0.94 * s;
        let expected = -(foot_local - 0.025);
        assert!(approx_eq_f32(h.session.origin()[1], expected, 1e-5));

        let rig = h.session.rig().unwrap();
        let foot_world = h.session.origin()[1] + rig.bone_position(BoneIndex::LeftFoot)[1];
        assert!(approx_eq_f32(foot_world, rig.sole_height(), 1e-5));
    }

    #[test]
    fn test_height_clamped_on_load() {
        let mut h = harness_with_height(40.0);
        h.load();
        let profile = h.session.avatar_profile().unwrap();
        assert_eq!(profile.height_cm, 175.0);
        assert!(approx_eq_f32(profile.scale_factor, 1.04, 1e-6));
    }

    #[test]
    fn test_recorder_panel_from_config() {
        let mut config = Config::default();
        config.app.recorder_panel = true;
        let mut h = build(Skeleton::reference("a"), config, UserPreferences::default(), ProfileMode::Absent);
        h.load();
        assert_eq!(h.panel(Panel::RecorderUi), Some(true));
    }

    #[test]
    fn test_align_ground_without_avatar() {
        let mut h = harness();
        let before = h.session.origin();
        assert_eq!(h.session.align_ground(), Err(SessionError::NoAvatarLoaded));
        assert_eq!(h.session.origin(), before);
        assert_eq!(h.session.state(), SessionState::Start);
    }

    #[test]
    fn test_align_ground_idempotent() {
        let mut h = harness();
        h.load();
        let first = h.session.align_ground().unwrap();
        let second = h.session.align_ground().unwrap();
        assert!(approx_eq_f32(first, second, 1e-6));
    }

    #[test]
    fn test_align_ground_relative_to_last() {
        let mut h = harness();
        h.load();
        let aligned = h.session.origin()[1];

        // 足が0.1m上がった状態で再度合わせる
        h.device.set_frame(SkeletonFrame::standing([0.0, 1.1, 0.0]));
        h.session.tick();
        let moved = h.session.align_ground().unwrap();
        assert!(approx_eq_f32(moved, aligned - 0.1, 1e-5));
    }

    #[test]
    fn test_align_uses_lower_foot() {
        let mut h = harness();
        h.load();
        let mut frame = SkeletonFrame::standing([0.0, 1.0, 0.0]);
        frame.rotations[BoneIndex::LeftHip as usize] = crate::rig::quat_from_pitch(-0.6);
        h.device.set_frame(frame);
        h.session.tick();
        let before = h.session.origin()[1];
        let after = h.session.align_ground().unwrap();
        // 右足は動いていないので原点はそのまま
        assert!(approx_eq_f32(before, after, 1e-5));
    }

    #[test]
    fn test_with_origin_baseline() {
        let mut h = harness();
        let session = std::mem::replace(&mut h.session, harness().session);
        h.session = session.with_origin([0.0, 0.3, 0.0]);
        assert_eq!(h.session.origin(), [0.0, 0.3, 0.0]);
        h.load();
        let rig = h.session.rig().unwrap();
        let foot_world = h.session.origin()[1] + rig.bone_position(BoneIndex::RightFoot)[1];
        assert!(approx_eq_f32(foot_world, rig.sole_height(), 1e-5));
        assert!(h.session.origin()[1] < 0.3);
    }

    #[test]
    fn test_contact_edges_through_session() {
        let mut h = harness();
        h.load();
        let b = ContactFlags::TOUCH_GROUND;
        let e = ContactFlags::empty();
        let seq = [e, e, b, b, b, e, b];

        let mut fired = Vec::new();
        for (i, &mask) in seq.iter().enumerate() {
            h.device.set_actions(mask, e);
            let events = h.session.tick();
            if !events.is_empty() {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].foot, Foot::Left);
                fired.push(i);
            }
        }
        assert_eq!(fired, vec![2, 6]);
    }

    #[test]
    fn test_events_dispatched_with_mode() {
        let prefs = UserPreferences {
            stepping_effect: 2,
            ..UserPreferences::default()
        };
        let mut h = build(Skeleton::reference("a"), Config::default(), prefs, ProfileMode::Absent);
        h.load();
        h.device.set_actions(
            ContactFlags::TOUCH_GROUND | ContactFlags::TOUCH_GROUND_TOE,
            ContactFlags::empty(),
        );
        let events = h.session.tick();
        assert_eq!(events.len(), 2);
        assert_eq!(
            *h.effects.borrow(),
            vec![
                ("particles", EffectKind::Heel),
                ("sound", EffectKind::Heel),
                ("sound", EffectKind::Toe),
            ]
        );
    }

    #[test]
    fn test_effect_mode_change_applies_next_event() {
        let mut h = harness();
        h.load();
        h.session.on_effect_mode_changed(0);
        h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::empty());
        assert_eq!(h.session.tick().len(), 1);
        assert!(h.effects.borrow().is_empty());
    }

    #[test]
    fn test_minigame_suppresses_playback_keeps_edge_state() {
        let mut h = harness();
        h.load();
        h.minigame_active.set(true);
        h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::empty());
        let events = h.session.tick();
        assert_eq!(events.len(), 1);
        assert!(h.effects.borrow().is_empty());
        assert_eq!(h.session.last_contact(Foot::Left), ContactFlags::TOUCH_GROUND);

        // 解除後も継続接地は再発火しない
        h.minigame_active.set(false);
        assert!(h.session.tick().is_empty());
        assert!(h.effects.borrow().is_empty());
    }

    #[test]
    fn test_step_frame_forwarded_each_playing_tick() {
        let mut h = harness();
        h.load();
        assert!(h.step_frames.borrow().is_empty());

        h.device.set_actions(ContactFlags::TOUCH_GROUND_TOE, ContactFlags::empty());
        h.session.tick();
        h.session.tick();
        let frames = h.step_frames.borrow();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].left_action, ContactFlags::TOUCH_GROUND_TOE);
        assert_eq!(frames[0].left_last_action, ContactFlags::empty());
        assert_eq!(frames[1].left_last_action, ContactFlags::TOUCH_GROUND_TOE);
        let rig = h.session.rig().unwrap();
        let expected_y = h.session.origin()[1] + rig.bone_position(BoneIndex::LeftFoot)[1];
        assert!(approx_eq_f32(frames[1].left_position[1], expected_y, 1e-6));
    }

    #[test]
    fn test_profile_height_used() {
        let prefs = UserPreferences {
            height_cm: 180.0,
            ..UserPreferences::default()
        };
        let mut h = build(Skeleton::reference("a"), Config::default(), prefs, ProfileMode::Manual);
        h.device.set_calibrated(true);
        h.session.on_resume();
        assert_eq!(h.session.state(), SessionState::Calibrated);
        assert!(h.session.is_loading());
        assert!(h.session.rig().is_none());

        // 応答前のtickでは進まない
        h.session.tick();
        assert!(h.session.rig().is_none());

        h.respond(Ok(UserInfo { stature_cm: 168.0 }));
        h.session.tick();
        assert_eq!(h.session.preferences().height_cm, 168.0);
        assert_eq!(h.session.avatar_profile().unwrap().height_cm, 168.0);
        assert_eq!(h.session.state(), SessionState::Calibrated);

        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);
        assert_eq!(h.session.completed_loads(), 1);
    }

    #[test]
    fn test_detection_continues_while_resolving_height() {
        let mut h = build(
            Skeleton::reference("a"),
            Config::default(),
            UserPreferences::default(),
            ProfileMode::Manual,
        );
        h.device.set_calibrated(true);
        h.session.on_resume();
        h.respond(Ok(UserInfo { stature_cm: 175.0 }));
        h.session.tick();
        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);

        // 再ロード開始。応答は返さない
        h.session.on_focus_gained();
        assert!(h.session.is_loading());
        let forwarded = h.step_frames.borrow().len();

        let mut events = 0;
        for _ in 0..5 {
            h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::empty());
            events += h.session.tick().len();
            h.device.set_actions(ContactFlags::empty(), ContactFlags::empty());
            events += h.session.tick().len();
        }
        assert_eq!(events, 5);
        assert_eq!(h.step_frames.borrow().len(), forwarded + 10);
        assert_eq!(h.session.state(), SessionState::Playing);
        assert!(h.session.is_loading());

        // 応答後は1フレーム待ちの間だけ止まる
        h.respond(Ok(UserInfo { stature_cm: 175.0 }));
        h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::empty());
        assert_eq!(h.session.tick().len(), 1);
        h.device.set_actions(ContactFlags::empty(), ContactFlags::empty());
        assert!(h.session.tick().is_empty());
        assert!(!h.session.is_loading());
        assert_eq!(h.session.completed_loads(), 2);
    }

    #[test]
    fn test_continue_starts_session() {
        let mut h = harness();
        h.device.set_connected(2);
        h.session.on_resume();
        assert_eq!(h.panel(Panel::ContinueButton), Some(true));

        h.device.set_calibrated(true);
        h.session.on_continue();
        assert_eq!(h.session.state(), SessionState::Calibrated);
        assert_eq!(h.panel(Panel::StartMenu), Some(false));
        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);
        assert_eq!(h.session.completed_loads(), 1);
    }

    #[test]
    fn test_profile_small_stature_ignored() {
        let prefs = UserPreferences {
            height_cm: 180.0,
            ..UserPreferences::default()
        };
        let mut h = build(Skeleton::reference("a"), Config::default(), prefs, ProfileMode::Manual);
        h.device.set_calibrated(true);
        h.session.on_resume();
        h.respond(Ok(UserInfo { stature_cm: 40.0 }));
        h.session.tick();
        assert_eq!(h.session.preferences().height_cm, 180.0);
        assert_eq!(h.session.avatar_profile().unwrap().height_cm, 180.0);
    }

    #[test]
    fn test_profile_error_falls_back() {
        let prefs = UserPreferences {
            height_cm: 165.0,
            ..UserPreferences::default()
        };
        let mut h = build(Skeleton::reference("a"), Config::default(), prefs, ProfileMode::Manual);
        h.device.set_calibrated(true);
        h.session.on_resume();
        h.respond(Err("network".to_string()));
        h.session.tick();
        assert_eq!(h.session.avatar_profile().unwrap().height_cm, 165.0);
        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn test_profile_request_failure_loads_immediately() {
        let mut h = build(
            Skeleton::reference("a"),
            Config::default(),
            UserPreferences::default(),
            ProfileMode::Broken,
        );
        h.device.set_calibrated(true);
        h.session.on_resume();
        assert!(h.session.rig().is_some());
        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn test_profile_timeout_falls_back() {
        let mut config = Config::default();
        config.session.profile_timeout_ms = 0;
        let mut h = build(Skeleton::reference("a"), config, UserPreferences::default(), ProfileMode::Manual);
        h.device.set_calibrated(true);
        h.session.on_resume();
        h.session.tick();
        assert!(h.session.rig().is_some());
        assert_eq!(h.session.avatar_profile().unwrap().height_cm, 175.0);
        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn test_second_load_rejected_while_pending() {
        let mut h = harness();
        h.device.set_calibrated(true);
        h.session.on_resume();
        assert_eq!(h.session.start_session(), Err(SessionError::LoadInProgress));
        h.session.on_focus_gained();
        assert_eq!(h.session.start_calibration(), Err(SessionError::LoadInProgress));
        assert_eq!(h.device.calibration_starts(), 0);

        h.session.tick();
        h.session.tick();
        assert_eq!(h.session.completed_loads(), 1);
        assert!(!h.session.is_loading());
    }

    #[test]
    fn test_start_calibration() {
        let mut h = harness();
        h.session.start_calibration().unwrap();
        assert_eq!(h.session.state(), SessionState::Calibrating);
        assert_eq!(h.device.calibration_starts(), 1);

        // キャリブレーションアプリから戻る
        h.device.set_calibrated(true);
        h.session.on_focus_gained();
        assert_eq!(h.session.state(), SessionState::Calibrated);
        h.session.tick();
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn test_start_calibration_hides_avatar() {
        let mut h = harness();
        h.load();
        assert!(h.avatar_active());
        h.session.start_calibration().unwrap();
        assert!(!h.avatar_active());
        assert_eq!(h.session.state(), SessionState::Playing);
        assert_eq!(h.device.calibration_starts(), 1);
        assert!(h.session.tick().is_empty());
    }

    #[test]
    fn test_rig_missing_leaves_state() {
        let avatar = Skeleton::reference("no-toes").without_joint(BoneIndex::LeftToe);
        let mut h = build(avatar, Config::default(), UserPreferences::default(), ProfileMode::Absent);
        h.device.set_calibrated(true);
        h.session.on_resume();
        assert_eq!(h.session.state(), SessionState::Start);
        assert!(!h.session.is_loading());
        assert!(h.session.rig().is_none());
        assert_eq!(
            h.session.start_session(),
            Err(SessionError::RigMissing {
                avatar: "no-toes".to_string(),
                bone: BoneIndex::LeftToe
            })
        );
    }

    #[test]
    fn test_uncalibrated_poll_hides_avatar() {
        let mut h = harness();
        h.load();
        h.device.set_calibrated(false);
        h.device.set_connected(1);
        h.session.on_focus_gained();
        assert!(!h.avatar_active());
        assert_eq!(h.panel(Panel::StartMenu), Some(true));
        assert_eq!(h.panel(Panel::ContinueButton), Some(false));
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn test_reload_resets_edge_state() {
        let mut h = harness();
        h.load();
        h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::empty());
        assert_eq!(h.session.tick().len(), 1);

        // フォーカス復帰でアバターを再ロード（Playingのまま）
        h.session.on_focus_gained();
        assert_eq!(h.session.state(), SessionState::Playing);
        assert!(h.session.is_loading());

        // 再ロード中の立ち上がりは出さない
        h.device.set_actions(ContactFlags::TOUCH_GROUND_TOE, ContactFlags::empty());
        assert!(h.session.tick().is_empty());
        assert!(!h.session.is_loading());
        assert_eq!(h.session.completed_loads(), 2);
        assert!(h.session.tick().is_empty());

        h.device.set_actions(ContactFlags::TOUCH_GROUND, ContactFlags::empty());
        assert_eq!(h.session.tick().len(), 1);
    }

    #[test]
    fn test_settings_write_through() {
        let mut h = harness();
        h.session.on_tracking_mode_changed(1);
        h.session.on_sensitivity_changed(0.8);
        h.session.on_height_changed(190.0);
        let prefs = h.session.preferences();
        assert_eq!(prefs.tracking_mode, 1);
        assert_eq!(prefs.stepping_sensitivity, 0.8);
        assert_eq!(prefs.height_cm, 190.0);
        assert_eq!(h.device.tracking_mode(), Some(1));

        h.load();
        assert_eq!(h.session.avatar_profile().unwrap().height_cm, 190.0);
    }
}
