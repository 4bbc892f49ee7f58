pub mod playback;
pub mod transcode;

pub use playback::{PlaybackError, PlaybackManager, StreamWriter};
pub use transcode::transcode;
