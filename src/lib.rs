pub mod cli;
pub mod decoder;
pub mod explain;
pub mod models;
pub mod render;
pub mod tracer;
pub mod utils;
