// HTTP routes
pub mod health;
pub mod tasks;
pub mod websocket;

pub use health::*;
pub use tasks::*;
pub use websocket::*;
