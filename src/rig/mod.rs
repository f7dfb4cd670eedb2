pub mod action;
pub mod avatar;
pub mod bone;

pub use action::{rising_edges, ContactFlags};
pub use avatar::{AvatarRig, Joint, Skeleton, SkeletonFrame};
pub use bone::{quat_from_pitch, BoneIndex, Foot};
