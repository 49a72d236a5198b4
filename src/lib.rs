pub mod api;
pub mod config;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod store;

pub use errors::WorkflowError;
pub use pipeline::Pipeline;
