pub mod artifact;
pub mod bridge;
pub mod protocol;
pub mod session;
