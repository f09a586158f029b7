pub mod config;
pub mod conversation;
pub mod error;
pub mod keyring;
pub mod notify;
pub mod stream;
