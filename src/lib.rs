mod routes;
mod server;

pub mod alert;
pub mod annotator;
pub mod app;
pub mod bounding_box;
pub mod camera;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod frame;
pub mod pipeline;
pub mod stream;
pub mod telemetry;

pub use app::start_app;
