//! モーショントラッカー（フィットネスバンド）との境界
//!
//! デバイスドライバ本体は外部。ここではセッションが必要とする操作だけを
//! トレイトとして定義する。

pub mod sim;
pub mod threaded;

pub use sim::{GaitSource, SimDevice, SimDeviceHandle, SimProfileService};
pub use threaded::ThreadedDevice;

use crate::rig::SkeletonFrame;

/// トラッカー接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectState {
    /// 接続中のトラッカー数
    pub connected_count: u32,
}

/// デバイス操作
pub trait DeviceBridge {
    /// トラッキングモードを設定
    fn set_tracking_mode(&mut self, mode: i32);
    /// キャリブレーションアプリを起動
    fn start_calibration(&mut self);
    /// キャリブレーション済みか
    fn query_calibration_state(&mut self) -> bool;
    fn query_connection_state(&mut self) -> ConnectState;
    /// トラッキング原点をリセンター
    fn recenter_origin(&mut self);
    /// 最新の骨格フレーム。まだ無ければNone
    fn latest_frame(&mut self) -> Option<SkeletonFrame>;
}

/// 骨格フレームを1枚ずつ取り出す（ブロッキング）ソース
pub trait PoseSource: Send {
    fn next_frame(&mut self) -> anyhow::Result<SkeletonFrame>;
}
