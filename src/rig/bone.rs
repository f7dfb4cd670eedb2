/// アバタースケルトンのボーンインデックス（SMPL 24関節 + つま先2本）
///
/// 親は必ず子より小さいインデックスを持つ（FKを先頭から順に解ける）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BoneIndex {
    Pelvis = 0,
    LeftHip = 1,
    RightHip = 2,
    Spine1 = 3,
    LeftKnee = 4,
    RightKnee = 5,
    Spine2 = 6,
    LeftAnkle = 7,
    RightAnkle = 8,
    Spine3 = 9,
    LeftFoot = 10,
    RightFoot = 11,
    Neck = 12,
    LeftCollar = 13,
    RightCollar = 14,
    Head = 15,
    LeftShoulder = 16,
    RightShoulder = 17,
    LeftElbow = 18,
    RightElbow = 19,
    LeftWrist = 20,
    RightWrist = 21,
    LeftHand = 22,
    RightHand = 23,
    LeftToe = 24,
    RightToe = 25,
}

impl BoneIndex {
    pub const COUNT: usize = 26;

    /// 足接地判定に必須のボーン
    pub const REQUIRED: [BoneIndex; 4] = [
        BoneIndex::LeftFoot,
        BoneIndex::RightFoot,
        BoneIndex::LeftToe,
        BoneIndex::RightToe,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        use BoneIndex::*;
        const ALL: [BoneIndex; BoneIndex::COUNT] = [
            Pelvis, LeftHip, RightHip, Spine1, LeftKnee, RightKnee, Spine2,
            LeftAnkle, RightAnkle, Spine3, LeftFoot, RightFoot, Neck,
            LeftCollar, RightCollar, Head, LeftShoulder, RightShoulder,
            LeftElbow, RightElbow, LeftWrist, RightWrist, LeftHand, RightHand,
            LeftToe, RightToe,
        ];
        ALL.get(index).copied()
    }

    /// 標準スケルトンでの親ボーン
    pub fn parent(self) -> Option<BoneIndex> {
        use BoneIndex::*;
        match self {
            Pelvis => None,
            LeftHip | RightHip | Spine1 => Some(Pelvis),
            LeftKnee => Some(LeftHip),
            RightKnee => Some(RightHip),
            Spine2 => Some(Spine1),
            LeftAnkle => Some(LeftKnee),
            RightAnkle => Some(RightKnee),
            Spine3 => Some(Spine2),
            LeftFoot => Some(LeftAnkle),
            RightFoot => Some(RightAnkle),
            Neck | LeftCollar | RightCollar => Some(Spine3),
            Head => Some(Neck),
            LeftShoulder => Some(LeftCollar),
            RightShoulder => Some(RightCollar),
            LeftElbow => Some(LeftShoulder),
            RightElbow => Some(RightShoulder),
            LeftWrist => Some(LeftElbow),
            RightWrist => Some(RightElbow),
            LeftHand => Some(LeftWrist),
            RightHand => Some(RightWrist),
            LeftToe => Some(LeftFoot),
            RightToe => Some(RightFoot),
        }
    }
}

/// 左右の足
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Foot {
    Left,
    Right,
}

impl Foot {
    pub const BOTH: [Foot; 2] = [Foot::Left, Foot::Right];

    /// かかと側（足首直下）のボーン
    pub fn heel_bone(self) -> BoneIndex {
        match self {
            Foot::Left => BoneIndex::LeftFoot,
            Foot::Right => BoneIndex::RightFoot,
        }
    }

    pub fn toe_bone(self) -> BoneIndex {
        match self {
            Foot::Left => BoneIndex::LeftToe,
            Foot::Right => BoneIndex::RightToe,
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Foot::Left => 0,
            Foot::Right => 1,
        }
    }
}

pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// クォータニオン積 a * b
pub fn quat_mul(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    let [ax, ay, az, aw] = a;
    let [bx, by, bz, bw] = b;
    [
        aw * bx + ax * bw + ay * bz - az * by,
        aw * by - ax * bz + ay * bw + az * bx,
        aw * bz + ax * by - ay * bx + az * bw,
        aw * bw - ax * bx - ay * by - az * bz,
    ]
}

/// ベクトルをクォータニオンで回転
pub fn quat_rotate(q: [f32; 4], v: [f32; 3]) -> [f32; 3] {
    // v' = v + 2w(u×v) + 2u×(u×v)
    let u = [q[0], q[1], q[2]];
    let w = q[3];
    let uv = cross(u, v);
    let uuv = cross(u, uv);
    [
        v[0] + 2.0 * (w * uv[0] + uuv[0]),
        v[1] + 2.0 * (w * uv[1] + uuv[1]),
        v[2] + 2.0 * (w * uv[2] + uuv[2]),
    ]
}

/// X軸まわりの回転（ラジアン）
pub fn quat_from_pitch(angle: f32) -> [f32; 4] {
    let half = angle / 2.0;
    [half.sin(), 0.0, 0.0, half.cos()]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
