pub mod encryption;

// Re-export commonly used services
pub use encryption::*;
