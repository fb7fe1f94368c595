pub mod rule_cache;

pub use self::rule_cache::{RuleCacheManager, CACHE_FORMAT_VERSION};
