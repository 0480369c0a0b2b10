pub mod auth;
pub mod controller;
pub mod dispatch;
pub mod facade;
pub mod observer;
pub mod telemetry;
pub mod types;
