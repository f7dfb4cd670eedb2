use tracing::debug;

use super::action::ContactFlags;
use super::bone::{quat_mul, quat_rotate, BoneIndex, Foot, IDENTITY_ROTATION};
use crate::error::SessionError;

/// デバイスから届く1フレーム分の骨格ポーズ
///
/// 骨格はデバイス固定（[`BoneIndex`]順）。回転は親からのローカル回転。
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonFrame {
    /// ルート（骨盤）のトラッキング空間位置
    pub root_position: [f32; 3],
    /// 各ボーンのローカル回転 (x, y, z, w)
    pub rotations: [[f32; 4]; BoneIndex::COUNT],
    /// 左足の接地アクション（生値）
    pub left_action: u32,
    /// 右足の接地アクション（生値）
    pub right_action: u32,
}

impl SkeletonFrame {
    /// 全ボーン無回転の直立ポーズ
    pub fn standing(root_position: [f32; 3]) -> Self {
        Self {
            root_position,
            rotations: [IDENTITY_ROTATION; BoneIndex::COUNT],
            left_action: 0,
            right_action: 0,
        }
    }

    pub fn with_actions(mut self, left: ContactFlags, right: ContactFlags) -> Self {
        self.left_action = left.bits();
        self.right_action = right.bits();
        self
    }
}

/// 関節: 親ボーンからのオフセット（基準スケール、メートル）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub offset: [f32; 3],
}

/// アバターインスタンスのスケルトン定義
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    pub name: String,
    joints: Vec<Option<Joint>>,
    /// ボーン原点から足裏までの高さ（アイドル姿勢、メートル）
    pub sole_height: f32,
}

impl Skeleton {
    pub fn new(name: &str, sole_height: f32) -> Self {
        Self {
            name: name.to_string(),
            joints: vec![None; BoneIndex::COUNT],
            sole_height,
        }
    }

    pub fn with_joint(mut self, bone: BoneIndex, offset: [f32; 3]) -> Self {
        self.joints[bone as usize] = Some(Joint { offset });
        self
    }

    pub fn without_joint(mut self, bone: BoneIndex) -> Self {
        self.joints[bone as usize] = None;
        self
    }

    pub fn joint(&self, bone: BoneIndex) -> Option<Joint> {
        self.joints.get(bone as usize).copied().flatten()
    }

    /// 身長175cm相当の基準アバター
    pub fn reference(name: &str) -> Self {
        use BoneIndex::*;
        Self::new(name, 0.025)
            .with_joint(Pelvis, [0.0, 0.0, 0.0])
            .with_joint(LeftHip, [0.09, -0.07, 0.0])
            .with_joint(RightHip, [-0.09, -0.07, 0.0])
            .with_joint(Spine1, [0.0, 0.10, 0.0])
            .with_joint(LeftKnee, [0.0, -0.40, 0.0])
            .with_joint(RightKnee, [0.0, -0.40, 0.0])
            .with_joint(Spine2, [0.0, 0.12, 0.0])
            .with_joint(LeftAnkle, [0.0, -0.41, 0.0])
            .with_joint(RightAnkle, [0.0, -0.41, 0.0])
            .with_joint(Spine3, [0.0, 0.06, 0.0])
            .with_joint(LeftFoot, [0.0, -0.06, 0.02])
            .with_joint(RightFoot, [0.0, -0.06, 0.02])
            .with_joint(Neck, [0.0, 0.20, 0.0])
            .with_joint(LeftCollar, [0.07, 0.14, 0.0])
            .with_joint(RightCollar, [-0.07, 0.14, 0.0])
            .with_joint(Head, [0.0, 0.10, 0.0])
            .with_joint(LeftShoulder, [0.11, 0.02, 0.0])
            .with_joint(RightShoulder, [-0.11, 0.02, 0.0])
            .with_joint(LeftElbow, [0.26, 0.0, 0.0])
            .with_joint(RightElbow, [-0.26, 0.0, 0.0])
            .with_joint(LeftWrist, [0.25, 0.0, 0.0])
            .with_joint(RightWrist, [-0.25, 0.0, 0.0])
            .with_joint(LeftHand, [0.08, 0.0, 0.0])
            .with_joint(RightHand, [-0.08, 0.0, 0.0])
            .with_joint(LeftToe, [0.0, -0.02, 0.12])
            .with_joint(RightToe, [0.0, -0.02, 0.12])
    }
}

/// アバターリグ: スケルトンにデバイスポーズを流し込み、足の位置と接地フラグを提供する
///
/// ボーン長のスケールは常に基準オフセットから掛ける（重ね掛けしない）。
/// スケール変更は次に適用されるフレームから位置に反映される。
pub struct AvatarRig {
    skeleton: Skeleton,
    scale: f32,
    positions: [[f32; 3]; BoneIndex::COUNT],
    actions: [ContactFlags; 2],
    active: bool,
}

impl AvatarRig {
    /// アバターインスタンスにバインド
    pub fn load_skeleton(skeleton: Skeleton) -> Result<Self, SessionError> {
        for bone in BoneIndex::REQUIRED {
            if skeleton.joint(bone).is_none() {
                return Err(SessionError::RigMissing {
                    avatar: skeleton.name.clone(),
                    bone,
                });
            }
        }
        let mut rig = Self {
            skeleton,
            scale: 1.0,
            positions: [[0.0; 3]; BoneIndex::COUNT],
            actions: [ContactFlags::empty(); 2],
            active: false,
        };
        rig.reset_transform();
        Ok(rig)
    }

    pub fn name(&self) -> &str {
        &self.skeleton.name
    }

    /// スケール1・レストポーズ（足裏が地面）に戻す
    pub fn reset_transform(&mut self) {
        self.scale = 1.0;
        let foot_y = self.chain_height(BoneIndex::LeftFoot);
        let mut rest = SkeletonFrame::standing([0.0, self.skeleton.sole_height - foot_y, 0.0]);
        rest.left_action = self.actions[0].bits();
        rest.right_action = self.actions[1].bits();
        self.solve(&rest);
    }

    /// ボーン長を一様にスケール
    pub fn rescale(&mut self, scale: f32) {
        debug!("Rig {}: bone length scale {:.4}", self.skeleton.name, scale);
        self.scale = scale;
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// デバイスフレームを現在のスケールで適用
    pub fn apply_frame(&mut self, frame: &SkeletonFrame) {
        self.solve(frame);
    }

    /// 今フレームの接地フラグ
    pub fn current_contact_mask(&self, foot: Foot) -> ContactFlags {
        self.actions[foot.slot()]
    }

    /// ボーン位置（トラッキング空間）
    pub fn bone_position(&self, bone: BoneIndex) -> [f32; 3] {
        self.positions[bone as usize]
    }

    pub fn sole_height(&self) -> f32 {
        self.skeleton.sole_height
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 順運動学: 親→子の順にオフセットを回転・スケールして積み上げる
    fn solve(&mut self, frame: &SkeletonFrame) {
        let mut world_rot = [IDENTITY_ROTATION; BoneIndex::COUNT];
        for i in 0..BoneIndex::COUNT {
            let Some(bone) = BoneIndex::from_index(i) else { continue };
            let local_rot = frame.rotations[i];
            match bone.parent() {
                None => {
                    self.positions[i] = frame.root_position;
                    world_rot[i] = local_rot;
                }
                Some(parent) => {
                    let p = parent as usize;
                    let offset = self.skeleton.joint(bone).map_or([0.0; 3], |j| j.offset);
                    let scaled = [offset[0] * self.scale, offset[1] * self.scale, offset[2] * self.scale];
                    let d = quat_rotate(world_rot[p], scaled);
                    let base = self.positions[p];
                    self.positions[i] = [base[0] + d[0], base[1] + d[1], base[2] + d[2]];
                    world_rot[i] = quat_mul(world_rot[p], local_rot);
                }
            }
        }
        self.actions = [
            ContactFlags::from_raw(frame.left_action),
            ContactFlags::from_raw(frame.right_action),
        ];
    }

    /// ルートからボーンまでの基準スケールでの高さ差（無回転）
    fn chain_height(&self, bone: BoneIndex) -> f32 {
        let mut y = 0.0;
        let mut cur = Some(bone);
        while let Some(b) = cur {
            if b.parent().is_some() {
                y += self.skeleton.joint(b).map_or(0.0, |j| j.offset[1]);
            }
            cur = b.parent();
        }
        y
    }
}
