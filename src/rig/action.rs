//! 足の接地アクションフラグ
//!
//! デバイスが毎フレーム左右の足ごとに出すビットマスク。数値は
//! デバイス側のエンコードに合わせているが、判定は名前付きフラグだけで行う。

use bitflags::bitflags;

bitflags! {
    /// 足ごとの接地アクション
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContactFlags: u32 {
        /// かかと（足裏）接地
        const TOUCH_GROUND = 0x01;
        /// 静止保持
        const KEEP_STATIC = 0x02;
        /// つま先接地
        const TOUCH_GROUND_TOE = 0x04;
        /// 踏み込み
        const FOOT_DOWN = 0x08;
    }
}

impl ContactFlags {
    /// 接地イベントとして追跡するビット
    pub const TRACKED: [ContactFlags; 2] = [ContactFlags::TOUCH_GROUND, ContactFlags::TOUCH_GROUND_TOE];

    /// 生のアクション値から作成（未知ビットは捨てる）
    pub fn from_raw(value: u32) -> Self {
        ContactFlags::from_bits_truncate(value)
    }
}

/// 前フレームからの立ち上がりエッジ（0→1）のうち追跡対象のビット
pub fn rising_edges(previous: ContactFlags, current: ContactFlags) -> ContactFlags {
    let tracked = ContactFlags::TOUCH_GROUND | ContactFlags::TOUCH_GROUND_TOE;
    current & !previous & tracked
}
