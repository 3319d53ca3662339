pub mod compiler;
pub mod presets;
pub mod storage;
