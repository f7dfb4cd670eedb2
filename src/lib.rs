pub mod config;
pub mod contact;
pub mod device;
pub mod effect;
pub mod error;
pub mod prefs;
pub mod profile;
pub mod rig;
pub mod session;
pub mod ui;

pub use contact::{ContactDetector, ContactEvent};
pub use error::SessionError;
pub use session::{Collaborators, Session, SessionState};
