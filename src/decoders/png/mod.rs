pub mod animation;
pub mod chunk;
pub mod decoder;
pub mod frame;
pub mod header;
pub mod scanline;
pub(crate) mod session;
pub mod state;

pub use decoder::PngImageDecoder;
