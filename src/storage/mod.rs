mod core;
mod hashmap;

pub use core::{ProposalStore, Value};
pub use hashmap::HashMapStore;
