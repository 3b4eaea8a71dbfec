// napi-store: Versioned key-value store gateway (buckets, etags, filters, atomic batches)

pub mod bucket;
pub mod codec;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod memory;
pub mod store;

pub use bucket::{BucketSpec, init_bucket};
pub use codec::{decode_set, encode_set, set_member_pattern};
pub use error::Error;
pub use filter::{Filter, FilterInput, filter_for};
pub use gateway::UpdateObj;
pub use memory::MemoryStore;
pub use store::{
    BatchOp, BucketConfig, Committed, Etag, ExpectedEtag, FindOptions, IndexKind, IndexSpec,
    ObjectRecord, Operation, RecordStream, Sort, SortOrder, Store,
};
