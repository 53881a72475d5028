pub mod firmware;
pub mod health;
pub mod sessions;
