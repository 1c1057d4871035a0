pub mod id;
pub mod notification;

pub use notification::{decode_frame, FrameError, NotificationRecord};
