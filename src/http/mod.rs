//! HTTP surface for uploading, downloading and deleting blobs

pub mod errors;
pub mod server;

pub use errors::ApiError;
pub use server::{AppState, HttpServer};
