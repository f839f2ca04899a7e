//! REST boundary seam.
//!
//! The core treats the inventory server as a black box returning results;
//! this trait is the seam so processors and view sessions can be exercised
//! against an in-memory gateway in tests.

use async_trait::async_trait;
use tagview_sdk::client::{ClientError, ConsoleClient};
use tagview_sdk::objects::search::{SearchRequest, SearchResults};
use tagview_sdk::objects::unit::{RegisterUnitRequest, UnitRecord, UpdateLocationRequest};

/// Typed access to the inventory server's REST API.
///
/// Implementations must not retry on their own: retrying is a
/// user-initiated action, and the optimistic machinery depends on exactly
/// one confirm or cancel per call.
#[async_trait]
pub trait RestGateway: Send + Sync {
    /// Paginated authoritative unit query.
    async fn search_units(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchResults<UnitRecord>, ClientError>;

    /// Register a new unit.
    async fn register_unit(
        &self,
        request: &RegisterUnitRequest,
    ) -> Result<UnitRecord, ClientError>;

    /// Move a unit to a new location.
    async fn update_location(
        &self,
        request: &UpdateLocationRequest,
    ) -> Result<UnitRecord, ClientError>;

    /// Remove a unit.
    async fn delete_unit(&self, tag_id: &str) -> Result<(), ClientError>;
}

#[async_trait]
impl RestGateway for ConsoleClient {
    async fn search_units(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchResults<UnitRecord>, ClientError> {
        ConsoleClient::search_units(self, request).await
    }

    async fn register_unit(
        &self,
        request: &RegisterUnitRequest,
    ) -> Result<UnitRecord, ClientError> {
        ConsoleClient::register_unit(self, request).await
    }

    async fn update_location(
        &self,
        request: &UpdateLocationRequest,
    ) -> Result<UnitRecord, ClientError> {
        ConsoleClient::update_location(self, request).await
    }

    async fn delete_unit(&self, tag_id: &str) -> Result<(), ClientError> {
        ConsoleClient::delete_unit(self, tag_id).await
    }
}
