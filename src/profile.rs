//! 身長プロファイル: アバタースケールの算出と、リモート身長取得の完了通知
//!
//! リモート取得はどのスレッドで完了してもよい。結果はチャネル経由で
//! ロジックのtickから回収する。

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use tracing::warn;

/// 基準リグの身長（cm）
pub const REFERENCE_HEIGHT_CM: f32 = 175.0;
/// これ以下の身長は不正値として基準身長に置き換える
pub const MIN_HEIGHT_CM: f32 = 50.0;
/// 身長→ボーン長スケールの補正係数
pub const HEIGHT_SCALE_RATIO: f32 = 1.04;

/// アバターロード時に確定する身長とスケール
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarProfile {
    pub height_cm: f32,
    pub scale_factor: f32,
}

impl AvatarProfile {
    /// 身長からプロファイルを作成（不正な身長は基準身長へ）
    pub fn from_height(height_cm: f32) -> Self {
        let height_cm = clamp_height(height_cm);
        Self {
            height_cm,
            scale_factor: scale_factor(height_cm),
        }
    }
}

/// ボーン長スケール = 身長 × 1.04 / 175
pub fn scale_factor(height_cm: f32) -> f32 {
    height_cm * HEIGHT_SCALE_RATIO / REFERENCE_HEIGHT_CM
}

/// 50cm以下（およびNaN）は175cmに置き換える
pub fn clamp_height(height_cm: f32) -> f32 {
    if height_cm > MIN_HEIGHT_CM {
        height_cm
    } else {
        warn!(
            "Height = {} is too small, it is set to {}, please check!",
            height_cm, REFERENCE_HEIGHT_CM
        );
        REFERENCE_HEIGHT_CM
    }
}

/// リモートのユーザー情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserInfo {
    pub stature_cm: f32,
}

/// リモート身長取得サービス
pub trait ProfileService {
    /// 取得を開始する。即時エラーは呼び出し側で保存済み身長にフォールバック
    fn request_user_info(&mut self) -> anyhow::Result<ProfileRequest>;
}

/// 取得結果の送信側（サービス実装が持つ）
#[derive(Debug, Clone)]
pub struct ProfileResponder {
    tx: Sender<Result<UserInfo, String>>,
}

impl ProfileResponder {
    /// 結果を通知する。要求側が既に破棄されていれば何もしない
    pub fn complete(self, result: Result<UserInfo, String>) {
        let _ = self.tx.send(result);
    }
}

/// 取得結果の受信側（セッションが持つ）
#[derive(Debug)]
pub struct ProfileRequest {
    rx: Receiver<Result<UserInfo, String>>,
}

/// ポーリング結果
#[derive(Debug, Clone, PartialEq)]
pub enum ProfilePoll {
    Pending,
    Complete(Result<UserInfo, String>),
}

impl ProfileRequest {
    pub fn poll(&self) -> ProfilePoll {
        match self.rx.try_recv() {
            Ok(result) => ProfilePoll::Complete(result),
            Err(TryRecvError::Empty) => ProfilePoll::Pending,
            Err(TryRecvError::Disconnected) => {
                ProfilePoll::Complete(Err("profile request dropped without response".to_string()))
            }
        }
    }
}

/// 要求と応答のペアを作成
pub fn profile_channel() -> (ProfileResponder, ProfileRequest) {
    let (tx, rx) = mpsc::channel();
    (ProfileResponder { tx }, ProfileRequest { rx })
}
