pub mod discovery;
pub mod natural_order;

pub use discovery::{discover_jobs, has_accepted_extension};
pub use natural_order::{natural_cmp, sort_natural};
