pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::shared::models::{
    Classification, Manager, NewAssignment, NewClassification, NewTicket, Office, StoredTicket,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Seam to the excluded relational layer. Everything the pipeline persists or
/// reads goes through this trait; the daemon wires a concrete backend in.
///
/// `increment_manager_load` must be a true atomic increment on the backend
/// (`SET current_load = current_load + 1` in SQL terms), never a
/// read-modify-write from the caller's side.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_ticket(
        &self,
        guid: &str,
        company_id: i64,
    ) -> Result<Option<StoredTicket>, StorageError>;

    async fn get_ticket(&self, ticket_id: i64) -> Result<Option<StoredTicket>, StorageError>;

    async fn insert_ticket(&self, ticket: NewTicket) -> Result<StoredTicket, StorageError>;

    async fn set_ticket_coords(
        &self,
        ticket_id: i64,
        lat: f64,
        lon: f64,
    ) -> Result<(), StorageError>;

    async fn classification_for(
        &self,
        ticket_id: i64,
    ) -> Result<Option<Classification>, StorageError>;

    async fn get_classification(&self, id: i64) -> Result<Option<Classification>, StorageError>;

    async fn put_classification(
        &self,
        classification: NewClassification,
    ) -> Result<Classification, StorageError>;

    async fn offices(&self, company_id: i64) -> Result<Vec<Office>, StorageError>;

    async fn managers(&self, company_id: i64) -> Result<Vec<Manager>, StorageError>;

    async fn find_manager_by_name(
        &self,
        company_id: i64,
        name: &str,
    ) -> Result<Option<Manager>, StorageError>;

    /// Replaces any existing assignment for the ticket.
    async fn put_assignment(&self, assignment: NewAssignment) -> Result<(), StorageError>;

    /// Returns the load after incrementing.
    async fn increment_manager_load(&self, manager_id: i64) -> Result<i32, StorageError>;
}
