// src/lib.rs
pub mod api;
pub mod banner;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod normalizer;
pub mod planner;
pub mod policy;
pub mod providers;
pub mod renderer;
pub mod resolver;
pub mod runner;
pub mod sandbox;
pub mod submit;
