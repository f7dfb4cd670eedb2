use thiserror::Error;

use crate::rig::BoneIndex;

/// セッション操作のエラー
///
/// どれも要求された操作だけを中断する。セッション状態は変更しない。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// アバターに必須ボーン（左右の足・つま先）が無い
    #[error("avatar '{avatar}' is missing required bone {bone:?}")]
    RigMissing { avatar: String, bone: BoneIndex },

    /// アバター未ロード状態でのグラウンド合わせ
    #[error("there is no loaded avatar")]
    NoAvatarLoaded,

    /// アバターロードが進行中（同時に一つだけ）
    #[error("avatar load already in progress")]
    LoadInProgress,
}
