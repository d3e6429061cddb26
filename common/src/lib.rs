#[macro_use]
pub mod macros;
pub mod bit_buffer2;
pub mod buffer2;
pub mod file_format;
pub mod log_setup;
pub mod toggle;

pub use bit_buffer2::BitBuffer2;
pub use buffer2::Buffer2;
pub use file_format::FileFormat;
pub use toggle::Toggle;

/// Denominators with a smaller magnitude are treated as zero.
pub const EPSILON: f64 = 1e-10;
