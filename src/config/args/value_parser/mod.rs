pub mod extension_map;
pub mod human_bytes;
pub mod schedule_interval;
pub mod storage_class;
pub mod url;
