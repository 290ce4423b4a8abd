pub mod datasets;
pub mod deepdao;
pub mod env;
pub mod etherscan;
pub mod log;
pub mod paginate;
pub mod queries;
pub mod snapshot;

pub use paginate::{
    fetch_all, CheckpointConfig, FetchOptions, FetchOutcome, FetchStatus, PageTransport, Record,
};
pub use snapshot::{QueryTemplate, SnapshotGraphql, SnapshotRest};
