pub mod config;
pub mod evaluate;
pub mod health;
pub mod replay;
pub mod status;
