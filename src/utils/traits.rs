use crate::utils::error::{PngError, PngResult};

pub(crate) trait SafeAccess<T> {
    fn get_safe(&self, index: usize) -> PngResult<&T>;
    fn get_range_safe(&self, range: std::ops::Range<usize>) -> PngResult<&[T]>;
}

impl<T> SafeAccess<T> for [T] {
    /// Safely retrieves a reference to an element at the specified index in a slice.
    ///
    /// # Errors
    ///
    /// Returns `PngError::OutOfBounds` if the index is past the end of the slice.
    fn get_safe(&self, index: usize) -> PngResult<&T> {
        self.get(index).ok_or(PngError::OutOfBounds {
            start: index,
            end: index + 1,
            len: self.len(),
        })
    }

    /// Safely retrieves a reference to a range of elements in a slice.
    ///
    /// # Errors
    ///
    /// Returns `PngError::OutOfBounds` if the range is inverted or ends past the slice.
    fn get_range_safe(&self, range: std::ops::Range<usize>) -> PngResult<&[T]> {
        self.get(range.clone()).ok_or(PngError::OutOfBounds {
            start: range.start,
            end: range.end,
            len: self.len(),
        })
    }
}

/// Big-endian field access for chunk payloads.
pub(crate) trait BigEndianFields {
    fn u8_at(&self, offset: usize) -> PngResult<u8>;
    fn u16_at(&self, offset: usize) -> PngResult<u16>;
    fn u32_at(&self, offset: usize) -> PngResult<u32>;
}

impl BigEndianFields for [u8] {
    fn u8_at(&self, offset: usize) -> PngResult<u8> {
        self.get_safe(offset).copied()
    }

    fn u16_at(&self, offset: usize) -> PngResult<u16> {
        let bytes = self.get_range_safe(offset..offset + 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32_at(&self, offset: usize) -> PngResult<u32> {
        let bytes = self.get_range_safe(offset..offset + 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
