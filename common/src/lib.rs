pub mod file_format;
pub mod parallel;
pub mod serde;

pub use file_format::SerdeFormat;
