pub mod log_store;
pub mod stats_file;

pub use log_store::{LogFile, LogStore};
pub use stats_file::{export, load_tree, write_atomic};
