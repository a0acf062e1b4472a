//! SQLite-backed [`LocalStore`].

use crate::error::{StorageError, StorageResult};
use crate::{LocalStore, TicketFilter};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracker_types::{MemberRole, Project, ProjectMember, Ticket, Timestamp};

const PROJECT_COLUMNS: &str = "uuid, name, description, is_private, created_at, \
     last_event_id, last_event_created_at, tickets";

const TICKET_COLUMNS: &str = "uuid, project_uuid, type, title, description, state, parent_uuid, \
     creator_pubkey, created_at, updated_at, last_event_id, last_event_created_at, children";

/// Local store backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS projects (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                is_private INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_event_id TEXT,
                last_event_created_at INTEGER NOT NULL DEFAULT 0,
                tickets TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS project_members (
                project_uuid TEXT NOT NULL REFERENCES projects(uuid) ON DELETE CASCADE,
                pub_key TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(project_uuid, pub_key)
            );

            CREATE INDEX IF NOT EXISTS idx_members_pub_key ON project_members(pub_key);

            CREATE TABLE IF NOT EXISTS tickets (
                uuid TEXT PRIMARY KEY,
                project_uuid TEXT NOT NULL REFERENCES projects(uuid) ON DELETE CASCADE,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL,
                parent_uuid TEXT,
                creator_pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_event_id TEXT,
                last_event_created_at INTEGER NOT NULL DEFAULT 0,
                children TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_project ON tickets(project_uuid);
            CREATE INDEX IF NOT EXISTS idx_tickets_state ON tickets(state);
            ",
        )?;
        Ok(())
    }

    fn load_members(conn: &Connection, project_uuid: &str) -> StorageResult<Vec<ProjectMember>> {
        let mut stmt = conn.prepare(
            "SELECT pub_key, role, created_at FROM project_members
             WHERE project_uuid = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![project_uuid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut members = Vec::new();
        for row in rows {
            let (pub_key, role, created_at) = row?;
            let role = MemberRole::parse(&role)
                .ok_or_else(|| StorageError::InvalidData(format!("unknown member role: {role}")))?;
            members.push(ProjectMember {
                project_uuid: project_uuid.to_string(),
                pub_key,
                role,
                created_at: Timestamp::from_secs(created_at),
            });
        }
        Ok(members)
    }

    fn hydrate_project(conn: &Connection, row: ProjectRow) -> StorageResult<Project> {
        let tickets: BTreeSet<String> = serde_json::from_str(&row.tickets)?;
        let members = Self::load_members(conn, &row.uuid)?;
        Ok(Project {
            uuid: row.uuid,
            name: row.name,
            description: row.description,
            is_private: row.is_private,
            created_at: Timestamp::from_secs(row.created_at),
            last_event_id: row.last_event_id,
            last_event_created_at: Timestamp::from_secs(row.last_event_created_at),
            members,
            tickets,
        })
    }
}

struct ProjectRow {
    uuid: String,
    name: String,
    description: String,
    is_private: bool,
    created_at: i64,
    last_event_id: Option<String>,
    last_event_created_at: i64,
    tickets: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            is_private: row.get(3)?,
            created_at: row.get(4)?,
            last_event_id: row.get(5)?,
            last_event_created_at: row.get(6)?,
            tickets: row.get(7)?,
        })
    }
}

struct TicketRow {
    ticket: Ticket,
    children: String,
}

impl TicketRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ticket: Ticket {
                uuid: row.get(0)?,
                project_uuid: row.get(1)?,
                ticket_type: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                state: row.get(5)?,
                parent_uuid: row.get(6)?,
                creator_pubkey: row.get(7)?,
                created_at: Timestamp::from_secs(row.get(8)?),
                updated_at: Timestamp::from_secs(row.get(9)?),
                last_event_id: row.get(10)?,
                last_event_created_at: Timestamp::from_secs(row.get(11)?),
                children_uuids: BTreeSet::new(),
            },
            children: row.get(12)?,
        })
    }

    fn into_ticket(self) -> StorageResult<Ticket> {
        let mut ticket = self.ticket;
        ticket.children_uuids = serde_json::from_str(&self.children)?;
        Ok(ticket)
    }
}

impl LocalStore for SqliteStore {
    fn get_project(&self, uuid: &str) -> StorageResult<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE uuid = ?1"),
                params![uuid],
                ProjectRow::from_row,
            )
            .optional()?;
        row.map(|r| Self::hydrate_project(&conn, r)).transpose()
    }

    fn save_project(&self, project: &Project) -> StorageResult<()> {
        let tickets = serde_json::to_string(&project.tickets)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (uuid, name, description, is_private, created_at,
                                   last_event_id, last_event_created_at, tickets)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(uuid) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                is_private = excluded.is_private,
                created_at = excluded.created_at,
                last_event_id = excluded.last_event_id,
                last_event_created_at = excluded.last_event_created_at,
                tickets = excluded.tickets",
            params![
                project.uuid,
                project.name,
                project.description,
                project.is_private,
                project.created_at.as_secs(),
                project.last_event_id,
                project.last_event_created_at.as_secs(),
                tickets,
            ],
        )?;
        tx.execute(
            "DELETE FROM project_members WHERE project_uuid = ?1",
            params![project.uuid],
        )?;
        for member in &project.members {
            tx.execute(
                "INSERT OR IGNORE INTO project_members (project_uuid, pub_key, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.uuid,
                    member.pub_key,
                    member.role.as_str(),
                    member.created_at.as_secs(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_projects_for_member(&self, pubkey: &str) -> StorageResult<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let rows: Vec<ProjectRow> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects
                 WHERE is_private = 0
                    OR uuid IN (SELECT project_uuid FROM project_members WHERE pub_key = ?1)
                 ORDER BY created_at, uuid"
            ))?;
            let mapped = stmt.query_map(params![pubkey], ProjectRow::from_row)?;
            mapped.collect::<rusqlite::Result<_>>()?
        };
        rows.into_iter()
            .map(|r| Self::hydrate_project(&conn, r))
            .collect()
    }

    fn get_ticket(&self, uuid: &str) -> StorageResult<Option<Ticket>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE uuid = ?1"),
            params![uuid],
            TicketRow::from_row,
        )
        .optional()?
        .map(TicketRow::into_ticket)
        .transpose()
    }

    fn save_ticket(&self, ticket: &Ticket) -> StorageResult<()> {
        let children = serde_json::to_string(&ticket.children_uuids)?;
        let conn = self.conn.lock().unwrap();
        let project_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE uuid = ?1)",
            params![ticket.project_uuid],
            |row| row.get(0),
        )?;
        if !project_exists {
            return Err(StorageError::NotFound(format!(
                "project {} for ticket {}",
                ticket.project_uuid, ticket.uuid
            )));
        }
        conn.execute(
            &format!(
                "INSERT INTO tickets ({TICKET_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(uuid) DO UPDATE SET
                    project_uuid = excluded.project_uuid,
                    type = excluded.type,
                    title = excluded.title,
                    description = excluded.description,
                    state = excluded.state,
                    parent_uuid = excluded.parent_uuid,
                    creator_pubkey = excluded.creator_pubkey,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    last_event_id = excluded.last_event_id,
                    last_event_created_at = excluded.last_event_created_at,
                    children = excluded.children"
            ),
            params![
                ticket.uuid,
                ticket.project_uuid,
                ticket.ticket_type,
                ticket.title,
                ticket.description,
                ticket.state,
                ticket.parent_uuid,
                ticket.creator_pubkey,
                ticket.created_at.as_secs(),
                ticket.updated_at.as_secs(),
                ticket.last_event_id,
                ticket.last_event_created_at.as_secs(),
                children,
            ],
        )?;
        Ok(())
    }

    fn list_tickets(&self, filter: &TicketFilter) -> StorageResult<Vec<Ticket>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(project_uuid) = &filter.project_uuid {
            values.push(Value::Text(project_uuid.clone()));
            clauses.push(format!("project_uuid = ?{}", values.len()));
        }
        if let Some(state) = &filter.state {
            values.push(Value::Text(state.clone()));
            clauses.push(format!("state = ?{}", values.len()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets {where_clause} ORDER BY created_at, uuid"
        ))?;
        let rows = stmt.query_map(params_from_iter(values), TicketRow::from_row)?;
        rows.map(|row| row?.into_ticket()).collect()
    }

    fn delete_ticket(&self, uuid: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM tickets WHERE uuid = ?1", params![uuid])?;
        Ok(removed > 0)
    }
}
