//! Durable store of service registrations and the historical identifiers
//! ledger.
//!
//! The repository is the source of truth for service lifecycle state,
//! independent of whatever the backend's container view says. Records are
//! keyed by service name and stored as JSON rows in SQLite; every mutation
//! is a single transaction. The repository provides no cross-record
//! atomicity — concurrent callers serialize through the service network's
//! lock.
//!
//! The historical ledger is append-only: it keeps every name/UUID pair the
//! enclave has ever successfully created, so stable identifier lookup
//! works across process restarts even after services are removed.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use palisade_core::{
    ServiceConfig, ServiceIdentifiers, ServiceName, ServiceRegistration, ServiceStatus,
    ServiceUuid,
};

/// Errors from the registration repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No registration exists for the service name.
    #[error("no registration exists for service '{0}'")]
    NotFound(ServiceName),

    /// A registration already exists for the service name.
    #[error("a registration already exists for service '{0}'")]
    DuplicateName(ServiceName),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// SQLite-backed store of [`ServiceRegistration`] records keyed by name.
pub struct ServiceRegistrationRepository {
    conn: Mutex<Connection>,
}

impl ServiceRegistrationRepository {
    /// Opens (or creates) the repository at the given path.
    pub fn open(path: &Path) -> RepositoryResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RepositoryError::Storage(format!("failed to open repository: {e}")))?;
        let repository = Self {
            conn: Mutex::new(conn),
        };
        repository.init_schema()?;
        Ok(repository)
    }

    /// Opens an in-memory repository (for testing).
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RepositoryError::Storage(format!("failed to open in-memory repository: {e}"))
        })?;
        let repository = Self {
            conn: Mutex::new(conn),
        };
        repository.init_schema()?;
        Ok(repository)
    }

    fn init_schema(&self) -> RepositoryResult<()> {
        let conn = self.lock_conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS service_registrations (
                name TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS historical_identifiers (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                shortened_uuid TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Creates a new registration record. Fails if the name already exists.
    pub fn create(&self, registration: &ServiceRegistration) -> RepositoryResult<()> {
        let record = serde_json::to_string(registration)?;
        let conn = self.lock_conn();
        let result = conn.execute(
            "INSERT INTO service_registrations (name, record) VALUES (?1, ?2)",
            params![registration.name().as_str(), record],
        );
        match result {
            Ok(_) => {
                debug!(service = %registration.name(), uuid = %registration.uuid(), "Created service registration");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(RepositoryError::DuplicateName(registration.name().clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the registration for a service name.
    pub fn get(&self, name: &ServiceName) -> RepositoryResult<ServiceRegistration> {
        let conn = self.lock_conn();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM service_registrations WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(record) => Ok(serde_json::from_str(&record)?),
            None => Err(RepositoryError::NotFound(name.clone())),
        }
    }

    /// Returns true if a registration exists for the name.
    pub fn exist(&self, name: &ServiceName) -> RepositoryResult<bool> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM service_registrations WHERE name = ?1",
            params![name.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Returns every registration, keyed by service name.
    pub fn get_all(&self) -> RepositoryResult<HashMap<ServiceName, ServiceRegistration>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT record FROM service_registrations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut registrations = HashMap::new();
        for record in rows {
            let registration: ServiceRegistration = serde_json::from_str(&record?)?;
            registrations.insert(registration.name().clone(), registration);
        }
        Ok(registrations)
    }

    /// Returns the names of every registered service.
    pub fn get_all_service_names(&self) -> RepositoryResult<HashSet<ServiceName>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT name FROM service_registrations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = HashSet::new();
        for name in rows {
            names.insert(ServiceName::new(name?));
        }
        Ok(names)
    }

    /// Updates the lifecycle status of a registration.
    pub fn update_status(
        &self,
        name: &ServiceName,
        status: ServiceStatus,
    ) -> RepositoryResult<()> {
        self.mutate(name, |registration| {
            registration.set_status(status);
        })
    }

    /// Updates the lifecycle status and the last-applied config together.
    pub fn update_status_and_config(
        &self,
        name: &ServiceName,
        status: ServiceStatus,
        config: Option<ServiceConfig>,
    ) -> RepositoryResult<()> {
        self.mutate(name, |registration| {
            registration.set_status(status);
            registration.set_config(config);
        })
    }

    /// Deletes the registration for a service name. Deleting an absent name
    /// is a no-op.
    pub fn delete(&self, name: &ServiceName) -> RepositoryResult<()> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM service_registrations WHERE name = ?1",
            params![name.as_str()],
        )?;
        Ok(())
    }

    /// Appends an entry to the historical identifiers ledger. Re-appending
    /// an already-recorded UUID is a no-op.
    pub fn append_historical_identifier(
        &self,
        identifiers: &ServiceIdentifiers,
    ) -> RepositoryResult<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR IGNORE INTO historical_identifiers (uuid, name, shortened_uuid, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identifiers.uuid.as_str(),
                identifiers.name.as_str(),
                identifiers.shortened_uuid,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Returns every identifier the enclave has ever created, in insertion
    /// order.
    pub fn get_historical_identifiers(&self) -> RepositoryResult<Vec<ServiceIdentifiers>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, shortened_uuid FROM historical_identifiers ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut identifiers = Vec::new();
        for row in rows {
            let (uuid, name, shortened_uuid) = row?;
            identifiers.push(ServiceIdentifiers {
                name: ServiceName::new(name),
                uuid: ServiceUuid::new(uuid),
                shortened_uuid,
            });
        }
        Ok(identifiers)
    }

    // Read-modify-write of one record inside a single transaction.
    fn mutate(
        &self,
        name: &ServiceName,
        apply: impl FnOnce(&mut ServiceRegistration),
    ) -> RepositoryResult<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let record: Option<String> = tx
            .query_row(
                "SELECT record FROM service_registrations WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(record) = record else {
            return Err(RepositoryError::NotFound(name.clone()));
        };
        let mut registration: ServiceRegistration = serde_json::from_str(&record)?;
        apply(&mut registration);
        let updated = serde_json::to_string(&registration)?;
        tx.execute(
            "UPDATE service_registrations SET record = ?2 WHERE name = ?1",
            params![name.as_str(), updated],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Lock poisoning only happens if a panic occurred mid-operation; the
        // enclosing operation has already failed at that point.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
