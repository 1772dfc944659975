mod authorization;
mod labels;
mod model_service;
mod ort_service;
mod reconstruct;
mod routes;
mod server;

pub mod config;

pub use server::start_server;
