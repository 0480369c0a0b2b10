pub mod connection;
pub mod constants;
pub mod heart_rate;
pub mod stack;
pub mod types;
