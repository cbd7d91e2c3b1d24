use serde::Serialize;

/// Alpha convention of the RGBA8 buffers handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlphaOption {
    Premultiplied,
    NotPremultiplied,
}

/// Whether gAMA information is applied to decoded colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GammaAndColorProfileOption {
    Applied,
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecoderOptions {
    pub alpha: AlphaOption,
    pub gamma_and_color_profile: GammaAndColorProfileOption,
    /// Largest RGBA8 canvas (width * height * 4) the decoder agrees to allocate.
    pub max_decoded_bytes: u64,
    /// Largest chunk payload accepted before the stream is declared corrupt.
    pub max_chunk_length: u32,
    pub verify_crc: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            alpha: AlphaOption::NotPremultiplied,
            gamma_and_color_profile: GammaAndColorProfileOption::Applied,
            max_decoded_bytes: 1 << 30,
            max_chunk_length: 0x7fff_ffff,
            verify_crc: true,
        }
    }
}

impl DecoderOptions {
    pub fn with_alpha(mut self, alpha: AlphaOption) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_gamma(mut self, gamma: GammaAndColorProfileOption) -> Self {
        self.gamma_and_color_profile = gamma;
        self
    }

    pub fn with_max_decoded_bytes(mut self, limit: u64) -> Self {
        self.max_decoded_bytes = limit;
        self
    }

    pub fn with_max_chunk_length(mut self, limit: u32) -> Self {
        self.max_chunk_length = limit;
        self
    }

    pub fn with_crc_verification(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    pub(crate) fn premultiply(&self) -> bool {
        self.alpha == AlphaOption::Premultiplied
    }

    pub(crate) fn apply_gamma(&self) -> bool {
        self.gamma_and_color_profile == GammaAndColorProfileOption::Applied
    }
}
