use bytes::Bytes;
use tracing::warn;

/// Packet type byte for a binary frame packet
pub const FRAME_PACKET_TYPE: u8 = 0x01;

/// Header size for frame packets:
/// - 1 byte: packet type
/// - 8 bytes: sequence number
/// - 8 bytes: capture time (unix millis)
pub const FRAME_HEADER_SIZE: usize = 17;

/// Upper bound for a single JPEG image read from a byte stream
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameCodecError {
    #[error("Packet too short: {0} bytes")]
    Truncated(usize),

    #[error("Unknown packet type: {0:#04x}")]
    UnknownType(u8),
}

/// A captured frame as pushed to subscribers over a binary channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub sequence: u64,
    pub captured_at_ms: i64,
    pub payload: Bytes,
}

impl FramePacket {
    /// Serialize packet to bytes for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(FRAME_PACKET_TYPE);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialize packet from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameCodecError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameCodecError::Truncated(data.len()));
        }
        if data[0] != FRAME_PACKET_TYPE {
            return Err(FrameCodecError::UnknownType(data[0]));
        }

        let mut sequence = [0u8; 8];
        sequence.copy_from_slice(&data[1..9]);
        let mut captured_at_ms = [0u8; 8];
        captured_at_ms.copy_from_slice(&data[9..FRAME_HEADER_SIZE]);

        Ok(Self {
            sequence: u64::from_be_bytes(sequence),
            captured_at_ms: i64::from_be_bytes(captured_at_ms),
            payload: Bytes::copy_from_slice(&data[FRAME_HEADER_SIZE..]),
        })
    }
}

/// Splits a stream of concatenated JPEG images (ffmpeg `image2pipe` MJPEG output)
/// into whole images, regardless of how the bytes were chunked on the way in.
pub struct MjpegSplitter {
    buffer: Vec<u8>,
    max_frame_size: usize,
    in_frame: bool,
    /// Where the next end-of-image search resumes
    scan_from: usize,
    dropped_bytes: u64,
}

impl MjpegSplitter {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            max_frame_size,
            in_frame: false,
            scan_from: 0,
            dropped_bytes: 0,
        }
    }

    /// Feed bytes in. Returns every image completed by this chunk, oldest first.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            if !self.in_frame {
                match find_marker(&self.buffer, 0, JPEG_SOI) {
                    Some(start) => {
                        self.dropped_bytes += start as u64;
                        self.buffer.drain(..start);
                        self.in_frame = true;
                        self.scan_from = JPEG_SOI.len();
                    }
                    None => {
                        // A trailing 0xFF may be the first half of the next SOI
                        let keep = usize::from(self.buffer.last() == Some(&0xFF));
                        let drop = self.buffer.len() - keep;
                        self.dropped_bytes += drop as u64;
                        self.buffer.drain(..drop);
                        break;
                    }
                }
            }

            match find_marker(&self.buffer, self.scan_from, JPEG_EOI) {
                Some(end) => {
                    let frame: Vec<u8> = self.buffer.drain(..end + JPEG_EOI.len()).collect();
                    frames.push(Bytes::from(frame));
                    self.in_frame = false;
                    self.scan_from = 0;
                }
                None => {
                    if self.buffer.len() > self.max_frame_size {
                        warn!(
                            "Discarding {} buffered bytes without end-of-image marker (limit {})",
                            self.buffer.len(),
                            self.max_frame_size
                        );
                        self.dropped_bytes += self.buffer.len() as u64;
                        self.buffer.clear();
                        self.in_frame = false;
                        self.scan_from = 0;
                    } else {
                        // Re-check the last byte next time in case the marker is split
                        self.scan_from = self.buffer.len().saturating_sub(1).max(JPEG_SOI.len());
                    }
                    break;
                }
            }
        }

        frames
    }

    /// Bytes discarded because they were outside any image
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Bytes held for an image still in progress
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn find_marker(haystack: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(body);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_frame_packet_layout() {
        let packet = FramePacket {
            sequence: 42,
            captured_at_ms: 1_700_000_000_123,
            payload: Bytes::from_static(&[1, 2, 3]),
        };

        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE + 3);
        assert_eq!(bytes[0], FRAME_PACKET_TYPE);
        assert_eq!(FramePacket::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_frame_packet_rejects_bad_input() {
        assert_eq!(
            FramePacket::from_bytes(&[FRAME_PACKET_TYPE, 0, 0]),
            Err(FrameCodecError::Truncated(3))
        );

        let mut bytes = vec![0u8; FRAME_HEADER_SIZE];
        bytes[0] = 0x7F;
        assert_eq!(
            FramePacket::from_bytes(&bytes),
            Err(FrameCodecError::UnknownType(0x7F))
        );
    }

    #[test]
    fn test_single_frame() {
        let mut splitter = MjpegSplitter::default();
        let image = jpeg(b"pixels");
        let frames = splitter.push(&image);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &image[..]);
        assert_eq!(splitter.pending_len(), 0);
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut splitter = MjpegSplitter::default();
        let mut data = jpeg(b"first");
        data.extend(jpeg(b"second"));

        let frames = splitter.push(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &jpeg(b"first")[..]);
        assert_eq!(&frames[1][..], &jpeg(b"second")[..]);
    }

    #[test]
    fn test_frame_split_byte_by_byte() {
        let mut splitter = MjpegSplitter::default();
        let image = jpeg(&[0x10, 0xFF, 0x00, 0x20, 0xFF]);

        let mut frames = Vec::new();
        for byte in &image {
            frames.extend(splitter.push(std::slice::from_ref(byte)));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &image[..]);
    }

    #[test]
    fn test_garbage_before_start_is_dropped() {
        let mut splitter = MjpegSplitter::default();
        let mut data = b"noise".to_vec();
        data.extend(jpeg(b"img"));

        let frames = splitter.push(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &jpeg(b"img")[..]);
        assert_eq!(splitter.dropped_bytes(), 5);
    }

    #[test]
    fn test_oversized_frame_is_discarded_then_recovers() {
        let mut splitter = MjpegSplitter::new(16);
        let mut runaway = vec![0xFF, 0xD8];
        runaway.extend(vec![0x11; 32]);
        assert!(splitter.push(&runaway).is_empty());
        assert_eq!(splitter.pending_len(), 0);

        let frames = splitter.push(&jpeg(b"ok"));
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &jpeg(b"ok")[..]);
    }
}
