use bytes::Bytes;
use chrono::{DateTime, Utc};
use rtspcast_protocol::FramePacket;

/// One decoded frame, held as a complete JPEG image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub data: Bytes,
}

impl Frame {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_packet(&self) -> FramePacket {
        FramePacket {
            sequence: self.sequence,
            captured_at_ms: self.captured_at.timestamp_millis(),
            payload: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_packet() {
        let frame = Frame::new(9, Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]));
        let packet = frame.to_packet();
        assert_eq!(packet.sequence, 9);
        assert_eq!(packet.captured_at_ms, frame.captured_at.timestamp_millis());
        assert_eq!(packet.payload, frame.data);
        assert_eq!(frame.len(), 4);
    }
}
