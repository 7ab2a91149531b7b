//! Video output path

pub mod mode;
pub mod picture;
pub mod scheduler;
pub mod v210;

pub use mode::{match_display_mode, DisplayMode, FourCc, VideoFormat};
pub use picture::{Picture, PictureData, PixelFormat};
pub use scheduler::{FrameOutcome, FrameScheduler, SchedulerSettings, SchedulerState, SchedulerStats};
