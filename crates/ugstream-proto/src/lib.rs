pub mod catalog;
pub mod config;
pub mod navigation;
pub mod platform;
pub mod protocol;
pub mod station;
