// Schedule Store
// One directory per entry under the base dir, each holding an entry.json
// metadata document. Writes take the store-wide exclusive lock, reads the
// shared lock. Corrupt entries are skipped by list, never surfaced.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::warn;

use gatehouse_core::{GatehouseError, Result};
use gatehouse_types::{new_schedule_id, ScheduleEntry};

const ENTRY_FILE: &str = "entry.json";

#[derive(Clone)]
pub struct ScheduleStore {
    base_dir: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl ScheduleStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            lock: Arc::new(RwLock::new(())),
        })
    }

    fn entry_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    /// Persist a new entry. Assigns a fresh id if absent and stamps
    /// `created_at`.
    pub fn create(&self, mut entry: ScheduleEntry) -> Result<ScheduleEntry> {
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        if entry.id.trim().is_empty() {
            entry.id = new_schedule_id();
        }
        entry.created_at = Utc::now();
        let dir = self.entry_dir(&entry.id);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(&entry)?;
        atomic_write(&dir.join(ENTRY_FILE), &content)?;
        Ok(entry)
    }

    pub fn get(&self, id: &str) -> Result<ScheduleEntry> {
        let _guard = self.lock.read().unwrap_or_else(|e| e.into_inner());
        self.read_entry(id)
    }

    pub fn update(&self, entry: &ScheduleEntry) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        let dir = self.entry_dir(&entry.id);
        if !dir.exists() {
            return Err(GatehouseError::NotFound(format!(
                "schedule entry {}",
                entry.id
            )));
        }
        let content = serde_json::to_string_pretty(entry)?;
        atomic_write(&dir.join(ENTRY_FILE), &content)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        let dir = self.entry_dir(id);
        if !dir.exists() {
            return Err(GatehouseError::NotFound(format!("schedule entry {id}")));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    /// Every readable entry, sorted by `created_at` descending. Corrupt
    /// entries are skipped.
    pub fn list(&self) -> Result<Vec<ScheduleEntry>> {
        let _guard = self.lock.read().unwrap_or_else(|e| e.into_inner());
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.base_dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.path().is_dir() {
                continue;
            }
            let Some(id) = dir_entry.file_name().to_str().map(ToString::to_string) else {
                continue;
            };
            match self.read_entry(&id) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(entry = %id, error = %err, "skipping unreadable schedule entry");
                }
            }
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    pub fn list_by_session(&self, session_id: &str) -> Result<Vec<ScheduleEntry>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| entry.session_id.as_deref() == Some(session_id))
            .collect())
    }

    fn read_entry(&self, id: &str) -> Result<ScheduleEntry> {
        let path = self.entry_dir(id).join(ENTRY_FILE);
        if !path.exists() {
            return Err(GatehouseError::NotFound(format!("schedule entry {id}")));
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| GatehouseError::Parse(format!("schedule entry {id}: {e}")))
    }
}

/// Atomic write using temp file and rename.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_types::{ScheduleSource, TaskTemplate};
    use tempfile::tempdir;

    fn entry(title: &str) -> ScheduleEntry {
        ScheduleEntry {
            id: String::new(),
            source: ScheduleSource::Dynamic,
            session_id: None,
            title: title.to_string(),
            description: String::new(),
            cron_spec: None,
            interval_sec: Some(300),
            on_event: None,
            cooldown_sec: 0,
            max_runs: 0,
            run_count: 0,
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
            skill_name: None,
            task_template: TaskTemplate {
                title: title.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn crud_round_trip() {
        let tmp = tempdir().unwrap();
        let store = ScheduleStore::new(tmp.path()).unwrap();

        let created = store.create(entry("check inbox")).unwrap();
        assert!(created.id.starts_with("sched_"));

        let loaded = store.get(&created.id).unwrap();
        assert_eq!(loaded, created);

        let mut updated = loaded.clone();
        updated.run_count = 5;
        store.update(&updated).unwrap();
        assert_eq!(store.get(&created.id).unwrap().run_count, 5);

        store.delete(&created.id).unwrap();
        assert!(!tmp.path().join(&created.id).exists());
        assert!(matches!(
            store.get(&created.id),
            Err(GatehouseError::NotFound(_))
        ));
    }

    #[test]
    fn update_and_delete_of_missing_entry_are_not_found() {
        let tmp = tempdir().unwrap();
        let store = ScheduleStore::new(tmp.path()).unwrap();
        assert!(matches!(
            store.update(&entry("ghost")),
            Err(GatehouseError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("sched_ghost"),
            Err(GatehouseError::NotFound(_))
        ));
    }

    #[test]
    fn list_sorts_newest_first_and_skips_corruption() {
        let tmp = tempdir().unwrap();
        let store = ScheduleStore::new(tmp.path()).unwrap();

        let first = store.create(entry("first")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create(entry("second")).unwrap();

        // A corrupt entry directory must be skipped, not surfaced.
        let corrupt_dir = tmp.path().join("sched_corrupt");
        fs::create_dir_all(&corrupt_dir).unwrap();
        fs::write(corrupt_dir.join(ENTRY_FILE), "{ nope").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn corrupt_single_get_surfaces_parse_error() {
        let tmp = tempdir().unwrap();
        let store = ScheduleStore::new(tmp.path()).unwrap();
        let dir = tmp.path().join("sched_bad");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRY_FILE), "not json").unwrap();
        assert!(matches!(
            store.get("sched_bad"),
            Err(GatehouseError::Parse(_))
        ));
    }

    #[test]
    fn list_by_session_filters() {
        let tmp = tempdir().unwrap();
        let store = ScheduleStore::new(tmp.path()).unwrap();
        let mut a = entry("mine");
        a.session_id = Some("ses_1".to_string());
        let mut b = entry("theirs");
        b.session_id = Some("ses_2".to_string());
        store.create(a).unwrap();
        store.create(b).unwrap();
        store.create(entry("nobody's")).unwrap();

        let mine = store.list_by_session("ses_1").unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "mine");
    }
}
