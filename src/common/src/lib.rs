pub mod backends;
pub mod cli;
pub mod config;
pub mod docstore;
pub mod identity;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backends::Backends;
