mod attribute_codec;
mod frame_codec;
mod sequence;

pub use self::attribute_codec::{AttributeCodec, AttributeCodecError};
pub use self::frame_codec::{Frame, FrameCodec, FrameCodecError};
pub use self::sequence::{MAX_SEQUENCE, SequenceCounter};
