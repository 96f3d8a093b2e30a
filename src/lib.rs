pub mod calibration;
pub mod config;
pub mod cost;
pub mod datatypes;
pub mod error;
pub mod evaluation_log;
pub mod loader;
pub mod orientation;
pub mod post_processor;
pub mod projector;
pub mod simulator;
pub mod triangulation;
