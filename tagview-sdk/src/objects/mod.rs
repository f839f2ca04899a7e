//! Shared wire types for the Tagview APIs.

pub mod push;
pub mod search;
pub mod unit;

pub use push::{RawPushMessage, WsClientFrame, WsServerFrame, scanner_channel};
pub use search::{ApiResponse, ColumnDef, SearchRequest, SearchResults, SortOrder};
pub use unit::{RegisterUnitRequest, UnitRecord, UnitStatus, UpdateLocationRequest};
