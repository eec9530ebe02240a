pub mod handler;

pub use handler::job_progress_ws;
