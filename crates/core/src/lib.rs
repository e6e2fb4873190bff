pub mod arrangement;
pub mod clip_ops;
pub mod drag;
pub mod playback;
pub mod session;
pub mod snap;
pub mod time;

pub use arrangement::{Arrangement, DurationRequest, DurationResult, PlaceError};
pub use drag::{DragConfig, DragController, DragPreview, DragSource, DragState, DropOutcome};
pub use playback::{PlaybackState, Transport};
pub use session::{LoadReport, Session, SessionConfig, SessionError};
pub use time::{MusicalPosition, TimeContext, TimeMode};

pub use daw_project::{FileStore, KeyValueStore, MemoryStore, OfflineClip, ProjectError};
pub use daw_render::{EXPORT_SAMPLE_RATE, RenderError};
pub use daw_transport::{
    AssetId, AudioBuffer, Clip, ClipId, DEFAULT_CLIP_WIDTH, SoundAsset, Track, TrackId, VoiceSink,
};
