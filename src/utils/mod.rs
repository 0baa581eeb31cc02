pub mod logging;
pub mod wait;

pub use wait::{ms, pause};
