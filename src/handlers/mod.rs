pub mod commands;
pub mod keyboard;
pub mod media;
pub mod replies;
