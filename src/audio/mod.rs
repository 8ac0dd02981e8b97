pub mod codec;
pub mod frame;
pub mod transcode;

pub use codec::{
    chunk_wire_audio, convert_frame, decode_inbound, encode_wire, CodecError, FRAME_BYTES,
    WIRE_SAMPLE_RATE,
};
pub use frame::{AudioDomain, AudioFrame, Direction, FrameSequencer};
pub use transcode::{encode_outbound, FfmpegTranscoder, NativeTranscoder, SourceFormat, Transcoder};
