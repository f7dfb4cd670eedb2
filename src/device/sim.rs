//! 実機なしで動かすためのデバイス・プロファイル実装
//!
//! ホストのデモループとテストで使う。

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use super::{ConnectState, DeviceBridge, PoseSource};
use crate::profile::{profile_channel, ProfileRequest, ProfileService, UserInfo};
use crate::rig::{quat_from_pitch, BoneIndex, ContactFlags, SkeletonFrame};

#[derive(Debug, Default)]
struct SimState {
    calibrated: bool,
    connected: u32,
    tracking_mode: Option<i32>,
    calibration_starts: u32,
    recenters: u32,
    frame: Option<SkeletonFrame>,
}

/// スクリプト駆動のデバイス
///
/// 状態は[`SimDeviceHandle`]から外部操作する（単一スレッド前提）。
#[derive(Debug, Default)]
pub struct SimDevice {
    state: Rc<RefCell<SimState>>,
}

/// [`SimDevice`]の操作・観測用ハンドル
#[derive(Debug, Clone)]
pub struct SimDeviceHandle {
    state: Rc<RefCell<SimState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SimDeviceHandle {
        SimDeviceHandle {
            state: self.state.clone(),
        }
    }
}

impl SimDeviceHandle {
    pub fn set_calibrated(&self, calibrated: bool) {
        self.state.borrow_mut().calibrated = calibrated;
    }

    pub fn set_connected(&self, count: u32) {
        self.state.borrow_mut().connected = count;
    }

    pub fn set_frame(&self, frame: SkeletonFrame) {
        self.state.borrow_mut().frame = Some(frame);
    }

    /// 現在フレームの接地フラグだけを差し替える
    pub fn set_actions(&self, left: ContactFlags, right: ContactFlags) {
        let mut state = self.state.borrow_mut();
        let frame = state
            .frame
            .take()
            .unwrap_or_else(|| SkeletonFrame::standing([0.0, 1.0, 0.0]));
        state.frame = Some(frame.with_actions(left, right));
    }

    pub fn tracking_mode(&self) -> Option<i32> {
        self.state.borrow().tracking_mode
    }

    pub fn calibration_starts(&self) -> u32 {
        self.state.borrow().calibration_starts
    }

    pub fn recenters(&self) -> u32 {
        self.state.borrow().recenters
    }
}

impl DeviceBridge for SimDevice {
    fn set_tracking_mode(&mut self, mode: i32) {
        self.state.borrow_mut().tracking_mode = Some(mode);
    }

    fn start_calibration(&mut self) {
        let mut state = self.state.borrow_mut();
        state.calibration_starts += 1;
        state.calibrated = false;
    }

    fn query_calibration_state(&mut self) -> bool {
        self.state.borrow().calibrated
    }

    fn query_connection_state(&mut self) -> ConnectState {
        ConnectState {
            connected_count: self.state.borrow().connected,
        }
    }

    fn recenter_origin(&mut self) {
        self.state.borrow_mut().recenters += 1;
    }

    fn latest_frame(&mut self) -> Option<SkeletonFrame> {
        self.state.borrow().frame.clone()
    }
}

/// その場足踏みの骨格ストリーム
///
/// 左右交互に股関節を振り上げ、着地時にかかと→つま先の順で接地フラグを立てる。
pub struct GaitSource {
    root_height: f32,
    period: Duration,
    interval: Duration,
    started: Instant,
}

impl GaitSource {
    /// `period`: 片足1歩の周期, `fps`: 出力レート
    pub fn new(root_height: f32, period: Duration, fps: u32) -> Self {
        Self {
            root_height,
            period,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            started: Instant::now(),
        }
    }

    /// 経過時間からフレームを生成
    pub fn frame_at(&self, elapsed: Duration) -> SkeletonFrame {
        let step = self.period.as_secs_f32().max(1e-3);
        let t = elapsed.as_secs_f32() / step;
        let swing_left = (t as u64) % 2 == 0;
        let phase = t.fract();

        // 前半: 振り上げ（非接地）、後半: 接地。後半の頭はかかとのみ
        let lift = if phase < 0.5 { (phase * std::f32::consts::TAU).sin() * 0.6 } else { 0.0 };
        let swing_flags = if phase < 0.5 {
            ContactFlags::empty()
        } else if phase < 0.6 {
            ContactFlags::TOUCH_GROUND
        } else {
            ContactFlags::TOUCH_GROUND | ContactFlags::TOUCH_GROUND_TOE
        };
        let stance_flags = ContactFlags::TOUCH_GROUND | ContactFlags::TOUCH_GROUND_TOE;

        let mut frame = SkeletonFrame::standing([0.0, self.root_height, 0.0]);
        let (swing_hip, left, right) = if swing_left {
            (BoneIndex::LeftHip, swing_flags, stance_flags)
        } else {
            (BoneIndex::RightHip, stance_flags, swing_flags)
        };
        frame.rotations[swing_hip as usize] = quat_from_pitch(-lift);
        frame.with_actions(left, right)
    }
}

impl PoseSource for GaitSource {
    fn next_frame(&mut self) -> anyhow::Result<SkeletonFrame> {
        thread::sleep(self.interval);
        Ok(self.frame_at(self.started.elapsed()))
    }
}

/// 遅延付きで固定の身長を返すプロファイルサービス
///
/// 応答は別スレッドから届く。`stature_cm`がNoneならエラー応答。
pub struct SimProfileService {
    stature_cm: Option<f32>,
    delay: Duration,
}

impl SimProfileService {
    pub fn new(stature_cm: Option<f32>, delay: Duration) -> Self {
        Self { stature_cm, delay }
    }
}

impl ProfileService for SimProfileService {
    fn request_user_info(&mut self) -> anyhow::Result<ProfileRequest> {
        let (responder, request) = profile_channel();
        let stature = self.stature_cm;
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            let result = match stature {
                Some(stature_cm) => Ok(UserInfo { stature_cm }),
                None => Err("user info unavailable".to_string()),
            };
            responder.complete(result);
        });
        Ok(request)
    }
}
