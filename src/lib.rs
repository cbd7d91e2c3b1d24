mod decoders;
mod utils;

pub use decoders::png::animation::ANIMATION_LOOP_INFINITE;
pub use decoders::png::frame::{FrameBufferCache, FrameInfo, FrameStatus, ImageFrame};
pub use decoders::png::header::{AnimationControl, BlendOp, ColorType, DisposeOp, ImageHeader};
pub use decoders::png::state::DecodeState;
pub use decoders::png::PngImageDecoder;
pub use utils::error::{PngError, PngResult};
pub use utils::info::PngInfo;
pub use utils::options::{AlphaOption, DecoderOptions, GammaAndColorProfileOption};
