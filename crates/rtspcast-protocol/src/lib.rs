pub mod codec;
pub mod packets;

pub use codec::{FrameCodecError, FramePacket, MjpegSplitter, DEFAULT_MAX_FRAME_SIZE};
pub use packets::{
    AuditEvent, AuditKind, CaptureStatus, ControlAction, ControlCommand, ServerEvent, StatusSnapshot,
};
