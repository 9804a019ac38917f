//! Stream metadata carried by an element.

/// Codec identifier attached to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecFormat {
    /// Unknown or not yet probed.
    #[default]
    Unknown,
    /// Raw PCM samples.
    Pcm,
    /// G.711 a-law.
    G711A,
    /// G.711 u-law.
    G711U,
    /// MP3.
    Mp3,
    /// AAC.
    Aac,
    /// Opus.
    Opus,
    /// SBC (Bluetooth audio).
    Sbc,
}

/// Mutable stream metadata owned by an element.
///
/// The record is guarded by the element's info mutex; it is the only element
/// state shared between the worker and control threads without exclusive
/// ownership. Position and format fields are updated from `process` callbacks
/// via the element's info helpers and broadcast to listeners through
/// `report_info`/`report_position`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Bit width of one sample (8, 16, 24, 32).
    pub bits: u16,
    /// Bitrate in bits per second.
    pub bitrate: u32,
    /// Current position being processed, in bytes.
    pub byte_pos: i64,
    /// Total byte count of the stream, when known.
    pub total_bytes: i64,
    /// Stream duration in milliseconds, when known.
    pub duration_ms: u32,
    /// Source or destination URI.
    pub uri: Option<String>,
    /// Codec identifier.
    pub codec: CodecFormat,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bits: 16,
            bitrate: 0,
            byte_pos: 0,
            total_bytes: 0,
            duration_ms: 0,
            uri: None,
            codec: CodecFormat::Unknown,
        }
    }
}
