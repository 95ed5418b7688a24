//! Desktop integration around the pipeline: where codes go and how the
//! process is hosted.

pub mod headless;
#[cfg(feature = "tray")]
pub mod tray;
