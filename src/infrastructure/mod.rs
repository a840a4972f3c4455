pub mod in_memory;
#[cfg(feature = "storage-redis")]
pub mod redis;
