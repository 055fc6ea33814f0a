pub mod codec;
pub mod intent;
pub mod response;
pub mod semantic;
pub mod store;

pub use codec::{deserialize_response, serialize_response, CACHE_SCHEMA_VERSION};
pub use intent::{
    build_scope_signature, classify_category, compute_intent_similarity, normalize_intent,
    IntentCategory,
};
pub use response::{cache_key, tier_for_depth, ttl_for_depth, CacheTier, ResponseCache};
pub use semantic::{SemanticCache, SemanticMatch};
pub use store::{CacheStore, SqliteCacheStore};
