pub mod error;
pub mod types;

pub mod buffer;
pub mod config;
pub mod connectivity;
pub mod identity;
pub mod permission;
pub mod sampler;
pub mod sink;
pub mod storage;
pub mod sync;
