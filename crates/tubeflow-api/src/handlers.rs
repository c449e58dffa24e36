//! Request handlers.

pub mod gemini;
pub mod health;
pub mod videos;
pub mod youtube;

pub use gemini::*;
pub use health::*;
pub use videos::*;
pub use youtube::*;
