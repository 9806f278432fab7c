//! Cache
//!
//! Cliente Redis del store de auditoría y cache con TTL en proceso para los
//! planes preparados.

pub mod cache_config;
pub mod redis_client;
pub mod ttl_cache;

pub use cache_config::CacheConfig;
pub use redis_client::RedisClient;
pub use ttl_cache::TtlCache;
