mod models;
mod query;

pub use models::{Station, StationFilter};
pub use query::{ListError, StationQueryEngine};
