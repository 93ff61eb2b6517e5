// Local student roster kept in SQLite

use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::models::Student;

/// Names inserted the first time the roster is created
const SEED_STUDENTS: [&str; 4] = ["Ana López", "Carlos Pérez", "María González", "José Rodríguez"];

pub struct StudentRoster {
    db: Connection,
}

impl StudentRoster {
    /// Open or create the roster database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create roster directory")?;
        }

        let db = Connection::open(path).context("Failed to open roster database")?;
        Self::init(db)
    }

    /// Roster that lives only as long as the returned value
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory roster")?;
        Self::init(db)
    }

    fn init(db: Connection) -> Result<Self> {
        let mut roster = Self { db };
        roster.create_schema()?;
        Ok(roster)
    }

    /// Create the students table, seeding it when it did not exist yet
    fn create_schema(&mut self) -> Result<()> {
        let tx = self.db.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'students'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            debug!("Creating students table");
            tx.execute_batch(
                r#"
                CREATE TABLE students (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL
                );
                "#,
            )?;

            for name in SEED_STUDENTS {
                tx.execute("INSERT INTO students (name) VALUES (?1)", [name])?;
            }
            info!(count = SEED_STUDENTS.len(), "Seeded student roster");
        }

        tx.commit()?;
        Ok(())
    }

    /// All student names, alphabetically
    pub fn list(&self) -> Result<Vec<String>> {
        let mut stmt = self.db.prepare("SELECT name FROM students ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// All rows with their ids, alphabetically
    pub fn students(&self) -> Result<Vec<Student>> {
        let mut stmt = self.db.prepare("SELECT id, name FROM students ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Student {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read students")
    }

    /// Add a student and return the new row id
    pub fn add(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(eyre!("Student name cannot be empty or whitespace-only"));
        }

        self.db
            .execute("INSERT INTO students (name) VALUES (?1)", [name])
            .context("Failed to insert student")?;
        let id = self.db.last_insert_rowid();
        debug!(id, name, "Added student");
        Ok(id)
    }
}
