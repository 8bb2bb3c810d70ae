//! Blob storage backends

mod cache;
mod file;
mod http;

pub use cache::CachedStorage;
pub use file::FileStorage;
pub use http::HttpStorage;
