//! Frame conversion and skeleton overlay drawing.

pub mod convert;
pub mod overlay;

use gymmy_types::GymmyError;

pub use convert::{convert, decode_nv21, pack_nv21, rotate, FrameConverter, PackedChroma};
pub use overlay::{composite, OverlayStyle};

pub fn conversion_error(message: impl Into<String>) -> GymmyError {
    GymmyError::Conversion(message.into())
}
