pub mod buffer_file;
pub mod point_store;
