//! Match history persistence

pub mod history;
pub mod supabase;

pub use history::{MatchHistoryStore, MemoryMatchStore, NewMatchRecord, PersistedMatch, StoreError};
pub use supabase::{SupabaseClient, SupabaseError, SupabaseMatchStore};
