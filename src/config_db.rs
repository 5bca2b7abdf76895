use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{error::Result, scope::Scope};

/// Source location (absolute path) -> scope tag.
const SOURCES: TableDefinition<&str, &str> = TableDefinition::new("sources");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Persistent configuration: which sources feed which scope, plus settings.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(SOURCES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Sources --

    /// Register `location` as a source of `scope`, replacing any previous
    /// assignment of the same location.
    pub fn add_source(&self, location: &Path, scope: Scope) -> Result<()> {
        let key = location.to_string_lossy();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SOURCES)?;
            table.insert(key.as_ref(), scope.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn remove_source(&self, location: &Path) -> Result<bool> {
        let key = location.to_string_lossy();
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SOURCES)?;
            table.remove(key.as_ref())?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// All registered sources, sorted by location.
    pub fn list_sources(&self) -> Result<Vec<(PathBuf, Scope)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let scope = v.value().parse::<Scope>()?;
            result.push((PathBuf::from(k.value()), scope));
        }
        Ok(result)
    }

    /// Sources registered for `scope`, in location order.
    pub fn sources_for(&self, scope: Scope) -> Result<Vec<PathBuf>> {
        Ok(self
            .list_sources()?
            .into_iter()
            .filter(|(_, s)| *s == scope)
            .map(|(path, _)| path)
            .collect())
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }


    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
