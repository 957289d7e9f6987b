//! Data access: domain records, declarative queries, and the fetchers that
//! run them against a remote source.

mod fetchers;
mod source;
mod supabase;
mod tags;
mod types;

pub use fetchers::{Catalog, TRENDING_LIMIT};
pub use source::{Filter, Order, RemoteSource, SelectQuery};
pub use supabase::SupabaseSource;
pub use tags::split_tags;
pub use types::{
  FailurePolicies, FailurePolicy, GenreFilter, Playlist, Pulse, Song, TrendWindow,
};

#[cfg(test)]
pub(crate) use source::fake;
