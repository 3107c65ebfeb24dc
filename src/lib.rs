pub mod callback;
pub mod config;
pub mod device;
pub mod dim3;
pub mod instruction;
pub mod kernel;
pub mod memory;
pub mod sm;
pub mod warp;
