pub mod ma_cross;

pub use ma_cross::*;
