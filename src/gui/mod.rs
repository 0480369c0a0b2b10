pub mod application;
pub mod open;
pub mod style;
pub mod types;
