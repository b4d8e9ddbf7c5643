/// Attributes of a parsed RTP packet, as consumed by the recovery kernel.
///
/// RTP parsing happens upstream; only these four attributes are ever read.
/// Whether a packet starts a key frame is decided by the codec-specific
/// payload descriptor handler, also upstream.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacketInfo {
    /// Synchronization Source identifier of the stream.
    pub ssrc: u32,
    /// RTP sequence number.
    pub sequence_number: u16,
    /// Payload size in bytes, as carried on the wire.
    pub payload_size: u64,
    /// Whether this packet belongs to a key frame.
    pub is_key_frame: bool,
}
