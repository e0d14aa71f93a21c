//! On-demand MP4-to-HLS packaging.
//!
//! Given a faststart MP4, this crate resolves its sample index once,
//! selects keyframe-aligned segment ranges across the video and audio
//! tracks, and packetises each one into MPEG-2 Transport Stream on request.
//! Nothing is precomputed or persisted: every call walks the mapped file
//! directly.

pub mod atom;
pub mod bitio;
pub mod dispatch;
pub mod error;
pub mod moov;
pub mod mp4file;
pub mod playlist;
pub mod request;
pub mod sample_table;
pub mod segment;
pub mod sink;
pub mod ts;

pub use dispatch::RequestOptions;
pub use error::{Error, Result};
pub use mp4file::Mp4File;
pub use request::{dispatch_request, DispatchOutcome, RequestKind};
pub use segment::Segment;
