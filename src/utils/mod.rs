pub mod crc;
pub mod error;
pub mod info;
pub mod logger;
pub mod options;
pub(crate) mod traits;
