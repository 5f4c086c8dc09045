//! Palette transfer error enums.
use std::collections::TryReserveError;

/// Error for palette extraction and remapping operations.
#[derive(Clone, Debug)]
pub enum PtError {
    /// The image `width` and/or `height` does not match the pixel buffer.
    MismatchedPixelBuffer,
    /// The target and source palettes have different lengths.
    MismatchedPalettes,
    /// A palette is empty.
    EmptyPalette,
    /// A palette is too large to be indexed by the 16-bit lookup table.
    PaletteTooLarge,
    /// The DBSCAN neighborhood radius is zero, negative, or not finite.
    NonPositiveEpsilon,
    /// The hybrid clustering block size is equal to `0`.
    ZeroBlockSize,
    /// No OpenCL device could be initialized.
    #[cfg(feature = "opencl")]
    DeviceUnavailable(String),
    /// An OpenCL operation failed after initialization.
    #[cfg(feature = "opencl")]
    DeviceRuntime(String),
    /// Space could not be reserved for a collection required in a
    /// clustering or remapping calculation.
    Reserve(TryReserveError),
    /// A general error occurred.
    General(&'static str),
}

impl std::fmt::Display for PtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MismatchedPixelBuffer => {
                write!(f, "Pixel buffer length does not equal image dimensions")
            }
            Self::MismatchedPalettes => {
                write!(f, "Target and source palettes must have the same length")
            }
            Self::EmptyPalette => write!(f, "Palette cannot be empty"),
            Self::PaletteTooLarge => {
                write!(f, "Palette does not fit in a 16-bit lookup table")
            }
            Self::NonPositiveEpsilon => write!(f, "Epsilon must be positive and finite"),
            Self::ZeroBlockSize => write!(f, "Block size cannot be 0"),
            #[cfg(feature = "opencl")]
            Self::DeviceUnavailable(e) => write!(f, "No usable OpenCL device: {e}"),
            #[cfg(feature = "opencl")]
            Self::DeviceRuntime(e) => write!(f, "OpenCL operation failed: {e}"),
            Self::Reserve(e) => write!(f, "{e}"),
            Self::General(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PtError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reserve(e) => e.source(),
            Self::MismatchedPixelBuffer
            | Self::MismatchedPalettes
            | Self::EmptyPalette
            | Self::PaletteTooLarge
            | Self::NonPositiveEpsilon
            | Self::ZeroBlockSize
            | Self::General(_) => None,
            #[cfg(feature = "opencl")]
            Self::DeviceUnavailable(_) | Self::DeviceRuntime(_) => None,
        }
    }
}

impl std::convert::From<TryReserveError> for PtError {
    fn from(error: TryReserveError) -> Self {
        Self::Reserve(error)
    }
}

impl std::convert::From<&'static str> for PtError {
    fn from(error: &'static str) -> Self {
        Self::General(error)
    }
}

#[cfg(feature = "opencl")]
impl std::convert::From<ocl::Error> for PtError {
    fn from(error: ocl::Error) -> Self {
        Self::DeviceRuntime(error.to_string())
    }
}
