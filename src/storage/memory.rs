use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::{Storage, StorageError};
use crate::shared::models::{
    Assignment, Classification, Manager, NewAssignment, NewClassification, NewTicket, Office,
    StoredTicket,
};

/// In-memory `Storage` backend. Default for the daemon when no relational
/// backend is wired in, and the fixture for every pipeline test.
///
/// Loads live in per-manager atomics so concurrent assignments contend the
/// same way they would on a SQL `SET current_load = current_load + 1`.
#[derive(Default)]
pub struct MemoryStorage {
    next_id: AtomicI64,
    tickets: RwLock<HashMap<i64, StoredTicket>>,
    classifications: RwLock<HashMap<i64, Classification>>,
    managers: RwLock<HashMap<i64, Manager>>,
    loads: RwLock<HashMap<i64, Arc<AtomicI32>>>,
    offices: RwLock<HashMap<i64, Office>>,
    assignments: RwLock<HashMap<i64, Assignment>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn poisoned<T>(_: T) -> StorageError {
        StorageError::Backend("storage lock poisoned".to_string())
    }

    /// Test/bootstrap helper: register a manager and seed its load counter.
    pub fn add_manager(&self, manager: Manager) -> i64 {
        let id = if manager.id > 0 { manager.id } else { self.next_id() };
        let mut manager = manager;
        manager.id = id;
        self.loads
            .write()
            .expect("lock")
            .insert(id, Arc::new(AtomicI32::new(manager.current_load)));
        self.managers.write().expect("lock").insert(id, manager);
        id
    }

    /// Test/bootstrap helper: register an office.
    pub fn add_office(&self, office: Office) -> i64 {
        let id = if office.id > 0 { office.id } else { self.next_id() };
        let mut office = office;
        office.id = id;
        self.offices.write().expect("lock").insert(id, office);
        id
    }

    /// Test helper: the single assignment currently held by a ticket.
    pub fn assignment_for(&self, ticket_id: i64) -> Option<Assignment> {
        self.assignments
            .read()
            .expect("lock")
            .values()
            .find(|a| a.ticket_id == ticket_id)
            .cloned()
    }

    /// Test helper: number of classification rows for a ticket.
    pub fn classification_count(&self, ticket_id: i64) -> usize {
        self.classifications
            .read()
            .expect("lock")
            .values()
            .filter(|c| c.ticket_id == ticket_id)
            .count()
    }

    fn load_of(&self, manager_id: i64) -> Option<Arc<AtomicI32>> {
        self.loads.read().ok()?.get(&manager_id).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_ticket(
        &self,
        guid: &str,
        company_id: i64,
    ) -> Result<Option<StoredTicket>, StorageError> {
        let tickets = self.tickets.read().map_err(Self::poisoned)?;
        Ok(tickets
            .values()
            .find(|t| t.guid == guid && t.company_id == company_id)
            .cloned())
    }

    async fn get_ticket(&self, ticket_id: i64) -> Result<Option<StoredTicket>, StorageError> {
        let tickets = self.tickets.read().map_err(Self::poisoned)?;
        Ok(tickets.get(&ticket_id).cloned())
    }

    async fn insert_ticket(&self, ticket: NewTicket) -> Result<StoredTicket, StorageError> {
        let row = StoredTicket {
            id: self.next_id(),
            company_id: ticket.company_id,
            guid: ticket.guid,
            description: ticket.description,
            source: ticket.source,
            status: ticket.status,
            segment: ticket.segment,
            gender: ticket.gender,
            birth_date: ticket.birth_date,
            contact: ticket.contact,
            country: ticket.country,
            city: ticket.city,
            street: ticket.street,
            house: ticket.house,
            latitude: None,
            longitude: None,
            created_at: Utc::now(),
        };
        self.tickets
            .write()
            .map_err(Self::poisoned)?
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_ticket_coords(
        &self,
        ticket_id: i64,
        lat: f64,
        lon: f64,
    ) -> Result<(), StorageError> {
        let mut tickets = self.tickets.write().map_err(Self::poisoned)?;
        let row = tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| StorageError::NotFound(format!("ticket #{ticket_id}")))?;
        row.latitude = Some(lat);
        row.longitude = Some(lon);
        Ok(())
    }

    async fn classification_for(
        &self,
        ticket_id: i64,
    ) -> Result<Option<Classification>, StorageError> {
        let rows = self.classifications.read().map_err(Self::poisoned)?;
        Ok(rows.values().find(|c| c.ticket_id == ticket_id).cloned())
    }

    async fn get_classification(&self, id: i64) -> Result<Option<Classification>, StorageError> {
        let rows = self.classifications.read().map_err(Self::poisoned)?;
        Ok(rows.get(&id).cloned())
    }

    async fn put_classification(
        &self,
        classification: NewClassification,
    ) -> Result<Classification, StorageError> {
        let row = Classification {
            id: self.next_id(),
            ticket_id: classification.ticket_id,
            category: classification.category,
            sentiment: classification.sentiment,
            priority: classification.priority,
            language: classification.language,
            summary: classification.summary,
            recommendation: classification.recommendation,
            created_at: Utc::now(),
        };
        self.classifications
            .write()
            .map_err(Self::poisoned)?
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn offices(&self, company_id: i64) -> Result<Vec<Office>, StorageError> {
        let offices = self.offices.read().map_err(Self::poisoned)?;
        let mut rows: Vec<Office> = offices
            .values()
            .filter(|o| o.company_id == company_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.id);
        Ok(rows)
    }

    async fn managers(&self, company_id: i64) -> Result<Vec<Manager>, StorageError> {
        let managers = self.managers.read().map_err(Self::poisoned)?;
        let mut rows: Vec<Manager> = managers
            .values()
            .filter(|m| m.company_id == company_id)
            .cloned()
            .collect();
        for row in &mut rows {
            if let Some(load) = self.load_of(row.id) {
                row.current_load = load.load(Ordering::SeqCst);
            }
        }
        rows.sort_by_key(|m| m.id);
        Ok(rows)
    }

    async fn find_manager_by_name(
        &self,
        company_id: i64,
        name: &str,
    ) -> Result<Option<Manager>, StorageError> {
        let managers = self.managers.read().map_err(Self::poisoned)?;
        Ok(managers
            .values()
            .find(|m| m.company_id == company_id && m.name == name)
            .cloned())
    }

    async fn put_assignment(&self, assignment: NewAssignment) -> Result<(), StorageError> {
        let mut rows = self.assignments.write().map_err(Self::poisoned)?;
        // One live assignment per ticket; re-assignment replaces.
        rows.retain(|_, a| a.ticket_id != assignment.ticket_id);
        let id = self.next_id();
        rows.insert(
            id,
            Assignment {
                id,
                ticket_id: assignment.ticket_id,
                analysis_id: assignment.analysis_id,
                manager_id: assignment.manager_id,
                office_id: assignment.office_id,
                reason: assignment.reason,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn increment_manager_load(&self, manager_id: i64) -> Result<i32, StorageError> {
        let load = self
            .load_of(manager_id)
            .ok_or_else(|| StorageError::NotFound(format!("manager #{manager_id}")))?;
        Ok(load.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
