//! Quota counting: keys, policy, and the two counter backends.

mod backend;
mod key;
mod memory;
mod policy;
mod shared;
mod store;

pub use backend::QuotaCounters;
pub use key::{CounterKey, Counting, QuotaScope};
pub use memory::{MemoryCounters, MemoryLimiter};
pub use policy::{GroupLimit, PolicyStore};
pub use shared::SharedCounters;
pub use store::{RedisStore, SharedStore};
