//! The append-only update log: writer (§4.3) and reader (§4.4).

pub mod reader;
pub mod writer;

pub use reader::{list_log_files, read_all, LogFileEntry};
pub use writer::{LogWriter, OnRotate};
