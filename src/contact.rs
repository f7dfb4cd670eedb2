use crate::rig::{rising_edges, AvatarRig, ContactFlags, Foot};

/// 接地の立ち上がりイベント
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactEvent {
    pub foot: Foot,
    /// 立ち上がったアクションビット（1ビット）
    pub action: ContactFlags,
    /// ビットに対応するボーン（かかと/つま先）のワールド位置
    pub position: [f32; 3],
}

/// 足ごとの接地フラグを前フレームと比較し、立ち上がりだけをイベントにする
///
/// 継続接地はその区間で1回だけ。立ち下がりはイベントにならない。
#[derive(Debug, Default)]
pub struct ContactDetector {
    previous: [ContactFlags; 2],
}

impl ContactDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前フレーム状態を与えたフラグで置き換える（イベントは出さない）
    pub fn reset(&mut self, left: ContactFlags, right: ContactFlags) {
        self.previous = [left, right];
    }

    /// リグの現在フラグで前フレーム状態を合わせる
    pub fn prime(&mut self, rig: &AvatarRig) {
        self.reset(
            rig.current_contact_mask(Foot::Left),
            rig.current_contact_mask(Foot::Right),
        );
    }

    pub fn previous(&self, foot: Foot) -> ContactFlags {
        self.previous[foot.slot()]
    }

    /// 1足分の比較。立ち上がったビットを返し、前フレーム状態を更新する
    ///
    /// 両ビットとも同じ前フレーム値と比較してから保存する。
    pub fn update(&mut self, foot: Foot, current: ContactFlags) -> ContactFlags {
        let slot = foot.slot();
        let edges = rising_edges(self.previous[slot], current);
        self.previous[slot] = current;
        edges
    }

    /// リグから両足を処理してイベントを返す。`origin`はトラッキング原点のワールド位置
    pub fn process(&mut self, rig: &AvatarRig, origin: [f32; 3]) -> Vec<ContactEvent> {
        let mut events = Vec::new();
        for foot in Foot::BOTH {
            let edges = self.update(foot, rig.current_contact_mask(foot));
            for action in ContactFlags::TRACKED {
                if !edges.contains(action) {
                    continue;
                }
                let bone = if action == ContactFlags::TOUCH_GROUND_TOE {
                    foot.toe_bone()
                } else {
                    foot.heel_bone()
                };
                let p = rig.bone_position(bone);
                events.push(ContactEvent {
                    foot,
                    action,
                    position: [origin[0] + p[0], origin[1] + p[1], origin[2] + p[2]],
                });
            }
        }
        events
    }
}
