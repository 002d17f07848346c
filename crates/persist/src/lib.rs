//! Vitrine persistence: the locally stored favorites set.
//! A single SQLite table keyed by (kind, id); an in-memory twin for tests.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use rustc_hash::FxHashSet;
use tracing::{debug, info};
use vitrine_core::resource::Resource;
use vitrine_core::ResourceId;

/// Favorite ids per resource kind.
pub trait FavoriteStore: Send + Sync {
    fn get_all(&self, kind: &str) -> Result<FxHashSet<ResourceId>>;

    fn contains(&self, kind: &str, id: &ResourceId) -> Result<bool>;

    /// `true` when the id was not a favorite before.
    fn add(&self, kind: &str, id: &ResourceId) -> Result<bool>;

    /// `true` when the id was a favorite before.
    fn remove(&self, kind: &str, id: &ResourceId) -> Result<bool>;

    /// Flip membership; returns the new state.
    fn toggle(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        if self.contains(kind, id)? {
            self.remove(kind, id)?;
            Ok(false)
        } else {
            self.add(kind, id)?;
            Ok(true)
        }
    }
}

/// SQLite-backed favorites. Synchronous; calls are a single indexed statement.
pub struct SqliteFavorites {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteFavorites {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("VITRINE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS favorites (
                kind     TEXT NOT NULL,
                id       TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (kind, id)
            )",
            [],
        )
        .context("creating favorites table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path, "persist: favorites opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("favorites connection poisoned"))
    }
}

impl FavoriteStore for SqliteFavorites {
    fn get_all(&self, kind: &str) -> Result<FxHashSet<ResourceId>> {
        let started = Instant::now();
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id FROM favorites WHERE kind = ?1")?;
        let mut rows = stmt.query([kind])?;
        let mut out = FxHashSet::default();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            out.insert(ResourceId::new(id));
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn contains(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        let db = self.conn()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM favorites WHERE kind = ?1 AND id = ?2",
            (kind, id.as_str()),
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn add(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        let started = Instant::now();
        let db = self.conn()?;
        let changed = db
            .execute(
                "INSERT OR IGNORE INTO favorites(kind, id, added_at) VALUES (?1, ?2, ?3)",
                (kind, id.as_str(), now_ts()),
            )
            .with_context(|| format!("adding favorite {}/{}", kind, id))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        debug!(kind, id = %id, added = changed > 0, "persist: favorite add");
        Ok(changed > 0)
    }

    fn remove(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        let db = self.conn()?;
        let changed = db
            .execute("DELETE FROM favorites WHERE kind = ?1 AND id = ?2", (kind, id.as_str()))
            .with_context(|| format!("removing favorite {}/{}", kind, id))?;
        debug!(kind, id = %id, removed = changed > 0, "persist: favorite remove");
        Ok(changed > 0)
    }
}

/// Non-persistent favorites, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryFavorites {
    ids: Mutex<FxHashSet<(String, ResourceId)>>,
}

impl MemoryFavorites {
    pub fn new() -> Self { Self::default() }

    fn set(&self) -> Result<MutexGuard<'_, FxHashSet<(String, ResourceId)>>> {
        self.ids.lock().map_err(|_| anyhow!("favorites set poisoned"))
    }
}

impl FavoriteStore for MemoryFavorites {
    fn get_all(&self, kind: &str) -> Result<FxHashSet<ResourceId>> {
        Ok(self.set()?.iter().filter(|(k, _)| k == kind).map(|(_, id)| id.clone()).collect())
    }

    fn contains(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        Ok(self.set()?.contains(&(kind.to_string(), id.clone())))
    }

    fn add(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        Ok(self.set()?.insert((kind.to_string(), id.clone())))
    }

    fn remove(&self, kind: &str, id: &ResourceId) -> Result<bool> {
        Ok(self.set()?.remove(&(kind.to_string(), id.clone())))
    }
}

/// Favorites of one kind, read once when a screen opens.
///
/// Loading a list never changes it; only [`LocalFavoriteSet::toggle`] (an explicit
/// user action) does, and that writes through to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFavoriteSet {
    kind: &'static str,
    ids: FxHashSet<ResourceId>,
}

impl LocalFavoriteSet {
    pub fn load<R: Resource>(store: &dyn FavoriteStore) -> Result<Self> {
        let ids = store.get_all(R::KIND).with_context(|| format!("reading {} favorites", R::KIND))?;
        debug!(kind = R::KIND, count = ids.len(), "persist: favorites snapshot");
        Ok(Self { kind: R::KIND, ids })
    }

    pub fn kind(&self) -> &'static str { self.kind }

    pub fn get_all(&self) -> &FxHashSet<ResourceId> { &self.ids }

    pub fn contains(&self, id: &ResourceId) -> bool { self.ids.contains(id) }

    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub fn toggle(&mut self, store: &dyn FavoriteStore, id: &ResourceId) -> Result<bool> {
        let now = store.toggle(self.kind, id)?;
        if now {
            self.ids.insert(id.clone());
        } else {
            self.ids.remove(id);
        }
        Ok(now)
    }
}

/// A list item joined with its favorite flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Marked<R> {
    pub item: R,
    pub favorite: bool,
}

pub fn mark_favorites<R: Resource>(list: &[R], favorites: &LocalFavoriteSet) -> Vec<Marked<R>> {
    list.iter()
        .map(|item| Marked {
            favorite: item.id().map_or(false, |id| favorites.contains(id)),
            item: item.clone(),
        })
        .collect()
}

/// Only the favorite items, in list order.
pub fn favorites_in<R: Resource>(list: &[R], favorites: &LocalFavoriteSet) -> Vec<R> {
    list.iter().filter(|r| r.id().map_or(false, |id| favorites.contains(id))).cloned().collect()
}

pub fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".vitrine");
        let _ = std::fs::create_dir_all(&p);
        p.push("vitrine.db");
        return p.to_string_lossy().to_string();
    }
    "vitrine.db".to_string()
}

fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_core::resource::{Advertisement, Review};

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!(
            "vitrine-test-{}.db",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        );
        dir.join(f).to_string_lossy().to_string()
    }

    fn ads() -> Vec<Advertisement> {
        serde_json::from_value(serde_json::json!([
            { "id": "1", "titre": "A" },
            { "id": "2", "titre": "B" },
            { "titre": "unsaved" }
        ]))
        .unwrap()
    }

    #[test]
    fn sqlite_add_remove_survives_reopen() {
        let path = temp_db();
        {
            let s = SqliteFavorites::open(&path).unwrap();
            assert!(s.add("advertisement", &"1".into()).unwrap());
            assert!(!s.add("advertisement", &"1".into()).unwrap());
            assert!(s.add("advertisement", &"2".into()).unwrap());
            assert!(s.add("review", &"1".into()).unwrap());
            assert!(s.remove("advertisement", &"2".into()).unwrap());
            assert!(!s.remove("advertisement", &"2".into()).unwrap());
        }
        let s = SqliteFavorites::open(&path).unwrap();
        let all = s.get_all("advertisement").unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains(&ResourceId::from("1")));
        assert!(s.contains("review", &"1".into()).unwrap());
        assert!(!s.contains("review", &"2".into()).unwrap());
    }

    #[test]
    fn toggle_flips_membership() {
        let s = MemoryFavorites::new();
        assert!(s.toggle("advertisement", &"9".into()).unwrap());
        assert!(s.contains("advertisement", &"9".into()).unwrap());
        assert!(!s.toggle("advertisement", &"9".into()).unwrap());
        assert!(s.get_all("advertisement").unwrap().is_empty());
    }

    #[test]
    fn snapshot_is_per_kind_and_joins_by_id() {
        let store = MemoryFavorites::new();
        store.add("advertisement", &"2".into()).unwrap();
        store.add("review", &"1".into()).unwrap();
        let favs = LocalFavoriteSet::load::<Advertisement>(&store).unwrap();
        assert_eq!(favs.kind(), "advertisement");
        assert_eq!(favs.len(), 1);

        let list = ads();
        let marked = mark_favorites(&list, &favs);
        assert_eq!(marked.iter().map(|m| m.favorite).collect::<Vec<_>>(), vec![false, true, false]);
        assert_eq!(favorites_in(&list, &favs), vec![list[1].clone()]);

        let reviews = LocalFavoriteSet::load::<Review>(&store).unwrap();
        assert!(reviews.contains(&"1".into()));
    }

    #[test]
    fn snapshot_does_not_follow_store_until_toggled() {
        let store = MemoryFavorites::new();
        let mut favs = LocalFavoriteSet::load::<Advertisement>(&store).unwrap();
        store.add("advertisement", &"1".into()).unwrap();
        assert!(!favs.contains(&"1".into()));

        assert!(favs.toggle(&store, &"3".into()).unwrap());
        assert!(favs.contains(&"3".into()));
        assert!(!favs.toggle(&store, &"3".into()).unwrap());
        assert!(!favs.contains(&"3".into()));
        assert!(store.contains("advertisement", &"1".into()).unwrap());
    }
}
