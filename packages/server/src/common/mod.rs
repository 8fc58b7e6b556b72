// Common types shared across the application

pub mod api_response;
pub mod platform;

pub use api_response::{ApiResponse, PaginatedResponse};
pub use platform::{Platform, UnknownPlatform};
