pub mod codec;
pub mod config;
mod error;
pub mod filter;
pub mod operation;
pub mod pool;
pub mod schema;
mod value;

pub use codec::{JsonArrayCodec, JsonCodec, WrappedValuesCodec, codec_for};
pub use config::{EngineFamily, PoolSettings, SqlConfig};
pub use operation::SqlOperationService;
pub use pool::{ConnectionFactory, ConnectionPool, PoolStatus, PooledConnection};
pub use schema::{ColumnInfo, SchemaMetadata, TableMapping};
