//! Loading raw tables from and writing cleaned tables to object storage.

mod loader;
mod writer;

pub use loader::TableLoader;
pub use writer::TableWriter;
