use crate::kv::keys::{self, note_id_from_key, note_key};
use crate::note::{generate_id, now};
use crate::{Error, FaultSink, KvStore, LogSink, Note, NoteSummary, SelectionTracker};
use serde_json::Value;
use std::collections::HashSet;

/// Owns notes and the notes list on top of a [`KvStore`].
///
/// Internally every step returns `Result<_, Error>`. At the public boundary
/// reads degrade to empty/`None`, updates and deletes degrade to `false`, and
/// only creation propagates. Every swallowed fault goes to the sink first.
pub struct NoteRepository<S: KvStore, F: FaultSink = LogSink> {
    store: S,
    sink: F,
}

impl<S: KvStore> NoteRepository<S, LogSink> {
    pub fn new(store: S) -> Self {
        Self::with_sink(store, LogSink)
    }
}

impl<S: KvStore, F: FaultSink> NoteRepository<S, F> {
    pub fn with_sink(store: S, sink: F) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &F {
        &self.sink
    }

    /// The current-note pointer backed by the same store.
    pub fn selection(&self) -> SelectionTracker<'_, S> {
        SelectionTracker::new(&self.store, &self.sink)
    }

    /// Create a note, prepend its summary to the list and select it.
    ///
    /// A failure after the note write leaves an orphaned note behind; it is
    /// not rolled back (see [`find_orphans`](Self::find_orphans)).
    pub async fn create_note(&self, content: Option<&str>) -> Result<Note, Error> {
        self.try_create_note(content.unwrap_or_default())
            .await
            .inspect_err(|e| self.sink.report("create_note", e))
    }

    /// The persisted notes list, or empty if absent or unreadable.
    pub async fn get_notes_list(&self) -> Vec<NoteSummary> {
        self.try_notes_list().await.unwrap_or_else(|e| {
            self.sink.report("get_notes_list", &e);
            Vec::new()
        })
    }

    /// Look up a note by id. `None` if absent or unreadable.
    pub async fn get_note(&self, id: &str) -> Option<Note> {
        self.try_get_note(id).await.unwrap_or_else(|e| {
            self.sink.report("get_note", &e);
            None
        })
    }

    /// Replace a note's content and refresh its summary in place.
    ///
    /// Returns `false` if the note does not exist or a step failed. If the
    /// note exists but has no list entry, the content is still saved and the
    /// list is left as is.
    pub async fn save_note_content(&self, id: &str, content: &str) -> bool {
        match self.try_save_note_content(id, content).await {
            Ok(_) => true,
            Err(e) => {
                self.sink.report("save_note_content", &e);
                false
            }
        }
    }

    /// Delete a note and its list entry, moving the selection off it if needed.
    ///
    /// All three steps are attempted even if an earlier one fails; the result
    /// is `true` only when every step succeeded.
    pub async fn delete_note(&self, id: &str) -> bool {
        let mut ok = true;

        if let Err(e) = self.store.del(&note_key(id)).await {
            self.sink.report("delete_note", &e);
            ok = false;
        }

        let remaining = match self.try_remove_from_list(id).await {
            Ok(list) => Some(list),
            Err(e) => {
                self.sink.report("delete_note", &e);
                ok = false;
                None
            }
        };

        if let Err(e) = self.try_move_selection_off(id, remaining.as_deref()).await {
            self.sink.report("delete_note", &e);
            ok = false;
        }

        ok
    }

    /// Import the legacy single-note blob as the first note.
    ///
    /// Does nothing once the list holds any note, so it is safe to call on
    /// every start. Returns the created note, if one was created.
    pub async fn migrate_from_single_note(&self) -> Option<Note> {
        self.try_migrate().await.unwrap_or_else(|e| {
            self.sink.report("migrate_from_single_note", &e);
            None
        })
    }

    /// Case-insensitive substring search over list titles and previews.
    ///
    /// A blank query returns the whole list. Full note bodies are never read.
    pub async fn search_notes(&self, query: &str) -> Vec<NoteSummary> {
        let list = self.get_notes_list().await;
        if query.trim().is_empty() {
            return list;
        }

        let needle = query.to_lowercase();
        list.into_iter().filter(|s| s.matches(&needle)).collect()
    }

    /// Ids of stored notes that have no entry in the notes list.
    pub async fn find_orphans(&self) -> Vec<String> {
        self.try_find_orphans().await.unwrap_or_else(|e| {
            self.sink.report("find_orphans", &e);
            Vec::new()
        })
    }

    pub async fn get_current_note_id(&self) -> Option<String> {
        self.selection().get_current_note_id().await
    }

    pub async fn set_current_note_id(&self, id: Option<&str>) -> bool {
        self.selection().set_current_note_id(id).await
    }

    async fn try_create_note(&self, content: &str) -> Result<Note, Error> {
        let id = self.unused_id().await?;
        let note = Note::new(id, content.to_string(), now());

        self.write_note(&note).await?;

        let mut list = self.try_notes_list().await?;
        list.retain(|s| s.id != note.id);
        list.insert(0, note.to_summary());
        self.write_notes_list(&list).await?;

        self.selection().try_set(Some(&note.id)).await?;

        log::debug!("created note {}", note.id);
        Ok(note)
    }

    async fn try_save_note_content(&self, id: &str, content: &str) -> Result<Note, Error> {
        let mut note = self
            .try_get_note(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {}", id)))?;

        note.set_content(content.to_string(), now());
        self.write_note(&note).await?;

        let mut list = self.try_notes_list().await?;
        match list.iter_mut().find(|s| s.id == id) {
            Some(summary) => {
                summary.refresh_from(&note);
                self.write_notes_list(&list).await?;
            }
            None => log::warn!("note {} is not in the notes list; summary left as is", id),
        }

        Ok(note)
    }

    async fn try_remove_from_list(&self, id: &str) -> Result<Vec<NoteSummary>, Error> {
        let mut list = self.try_notes_list().await?;
        list.retain(|s| s.id != id);
        self.write_notes_list(&list).await?;
        Ok(list)
    }

    /// If `deleted` is selected, select the first remaining note or nothing.
    /// An unknown remaining list clears the selection.
    async fn try_move_selection_off(
        &self,
        deleted: &str,
        remaining: Option<&[NoteSummary]>,
    ) -> Result<(), Error> {
        let selection = self.selection();
        if selection.try_get().await?.as_deref() != Some(deleted) {
            return Ok(());
        }

        let next = remaining.and_then(|list| list.first()).map(|s| s.id.as_str());
        selection.try_set(next).await
    }

    async fn try_migrate(&self) -> Result<Option<Note>, Error> {
        if !self.try_notes_list().await?.is_empty() {
            return Ok(None);
        }

        match self.store.get(keys::LEGACY_CONTENT).await? {
            Some(Value::String(content)) if !content.trim().is_empty() => {
                let note = self.try_create_note(&content).await?;
                log::info!("migrated single note into {}", note.id);
                Ok(Some(note))
            }
            _ => Ok(None),
        }
    }

    async fn try_find_orphans(&self) -> Result<Vec<String>, Error> {
        let listed: HashSet<String> = self
            .try_notes_list()
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let mut orphans: Vec<String> = self
            .store
            .keys()
            .await?
            .iter()
            .filter_map(|key| note_id_from_key(key))
            .filter(|id| !listed.contains(*id))
            .map(String::from)
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    async fn try_notes_list(&self) -> Result<Vec<NoteSummary>, Error> {
        match self.store.get(keys::NOTES_LIST).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    async fn try_get_note(&self, id: &str) -> Result<Option<Note>, Error> {
        match self.store.get(&note_key(id)).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    async fn write_note(&self, note: &Note) -> Result<(), Error> {
        self.store
            .set(&note_key(&note.id), serde_json::to_value(note)?)
            .await
    }

    async fn write_notes_list(&self, list: &[NoteSummary]) -> Result<(), Error> {
        self.store
            .set(keys::NOTES_LIST, serde_json::to_value(list)?)
            .await
    }

    async fn unused_id(&self) -> Result<String, Error> {
        loop {
            let id = generate_id();
            if self.store.get(&note_key(&id)).await?.is_none() {
                return Ok(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::UNTITLED;
    use crate::{MemoryStore, RecordingSink};
    use serde_json::json;

    fn setup() -> (MemoryStore, NoteRepository<MemoryStore, RecordingSink>) {
        let store = MemoryStore::new();
        let repo = NoteRepository::with_sink(store.clone(), RecordingSink::new());
        (store, repo)
    }

    /// Every listed id has a note, every note has a summary, and they agree.
    async fn assert_consistent(repo: &NoteRepository<MemoryStore, RecordingSink>) {
        let list = repo.get_notes_list().await;
        for summary in &list {
            let note = repo
                .get_note(&summary.id)
                .await
                .unwrap_or_else(|| panic!("listed note {} missing", summary.id));
            assert_eq!(summary.title, note.title);
            assert_eq!(summary.updated_at, note.updated_at);
        }
        assert!(repo.find_orphans().await.is_empty());

        let ids: HashSet<_> = list.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids.len(), list.len(), "duplicate ids in list");

        if let Some(current) = repo.get_current_note_id().await {
            assert!(ids.contains(&current), "selection points at {}", current);
        }
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let (_store, repo) = setup();

        let note = repo.create_note(Some("# Hello\nworld")).await.unwrap();
        assert_eq!(note.title, "Hello");
        assert_eq!(note.created_at, note.updated_at);

        let list = repo.get_notes_list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].preview, "# Hello\nworld");
        assert_eq!(repo.get_current_note_id().await.as_deref(), Some(note.id.as_str()));

        assert!(repo.save_note_content(&note.id, "").await);
        let list = repo.get_notes_list().await;
        assert_eq!(list[0].title, UNTITLED);
        assert_eq!(list[0].preview, "");
        assert_eq!(repo.get_note(&note.id).await.unwrap().title, UNTITLED);

        assert!(repo.delete_note(&note.id).await);
        assert!(repo.get_note(&note.id).await.is_none());
        assert!(repo.get_notes_list().await.is_empty());
        assert_eq!(repo.get_current_note_id().await, None);
        assert!(repo.sink().reports().is_empty());
    }

    #[tokio::test]
    async fn test_create_prepends_and_selects() {
        let (_store, repo) = setup();

        let first = repo.create_note(Some("first")).await.unwrap();
        let second = repo.create_note(None).await.unwrap();
        assert_eq!(second.content, "");
        assert_eq!(second.title, UNTITLED);

        let ids: Vec<_> = repo.get_notes_list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(repo.get_current_note_id().await, Some(second.id));
        assert_consistent(&repo).await;
    }

    #[tokio::test]
    async fn test_save_keeps_order() {
        let (_store, repo) = setup();
        let a = repo.create_note(Some("alpha")).await.unwrap();
        let b = repo.create_note(Some("beta")).await.unwrap();

        assert!(repo.save_note_content(&a.id, "# Alpha v2\nmore").await);

        let list = repo.get_notes_list().await;
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);
        assert_eq!(list[1].title, "Alpha v2");
        assert_eq!(list[1].preview, "# Alpha v2\nmore");
        assert_eq!(repo.get_note(&a.id).await.unwrap().content, "# Alpha v2\nmore");
        assert_consistent(&repo).await;
    }

    #[tokio::test]
    async fn test_save_missing_note() {
        let (_store, repo) = setup();
        assert!(!repo.save_note_content("nope", "text").await);

        let reports = repo.sink().reports();
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].1, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_with_drifted_list() {
        let (store, repo) = setup();
        let note = repo.create_note(Some("kept")).await.unwrap();
        store.set(keys::NOTES_LIST, json!([])).await.unwrap();

        assert!(repo.save_note_content(&note.id, "changed").await);
        assert_eq!(repo.get_note(&note.id).await.unwrap().content, "changed");
        assert!(repo.get_notes_list().await.is_empty());
        assert_eq!(repo.find_orphans().await, vec![note.id]);
    }

    #[tokio::test]
    async fn test_delete_selected_moves_to_first() {
        let (_store, repo) = setup();
        let a = repo.create_note(Some("a")).await.unwrap();
        let b = repo.create_note(Some("b")).await.unwrap();
        let c = repo.create_note(Some("c")).await.unwrap();

        assert!(repo.delete_note(&c.id).await);
        let list = repo.get_notes_list().await;
        assert_eq!(list[0].id, b.id);
        assert_eq!(repo.get_current_note_id().await, Some(b.id.clone()));

        assert!(repo.set_current_note_id(Some(&a.id)).await);
        assert!(repo.delete_note(&b.id).await);
        assert_eq!(repo.get_current_note_id().await, Some(a.id.clone()));

        assert!(repo.delete_note(&a.id).await);
        assert_eq!(repo.get_current_note_id().await, None);
        assert_consistent(&repo).await;
    }

    #[tokio::test]
    async fn test_delete_unknown_id() {
        let (_store, repo) = setup();
        let a = repo.create_note(Some("a")).await.unwrap();

        assert!(repo.delete_note("missing").await);
        assert_eq!(repo.get_notes_list().await.len(), 1);
        assert_eq!(repo.get_current_note_id().await, Some(a.id));
    }

    #[tokio::test]
    async fn test_delete_attempts_every_step() {
        let (store, repo) = setup();
        let a = repo.create_note(Some("a")).await.unwrap();
        let b = repo.create_note(Some("b")).await.unwrap();

        store.fail_key(&keys::note_key(&b.id));
        assert!(!repo.delete_note(&b.id).await);

        // The list and selection steps still ran.
        let list = repo.get_notes_list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, a.id);
        assert_eq!(repo.get_current_note_id().await, Some(a.id));
        assert_eq!(repo.sink().reports().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_unreadable_list_clears_selection() {
        let (store, repo) = setup();
        let a = repo.create_note(Some("a")).await.unwrap();

        store.fail_key(keys::NOTES_LIST);
        assert!(!repo.delete_note(&a.id).await);
        assert_eq!(repo.get_current_note_id().await, None);
        assert!(repo.get_note(&a.id).await.is_none());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_orphan() {
        let (store, repo) = setup();
        store.fail_key(keys::NOTES_LIST);

        let err = repo.create_note(Some("lost")).await.unwrap_err();
        assert!(matches!(err, Error::StorageFault(_)));
        assert_eq!(repo.sink().reports()[0].0, "create_note");

        store.clear_faults();
        assert!(repo.get_notes_list().await.is_empty());
        assert_eq!(repo.get_current_note_id().await, None);
        assert_eq!(repo.find_orphans().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_at_selection_step() {
        let (store, repo) = setup();
        let first = repo.create_note(Some("first")).await.unwrap();
        store.fail_key(keys::CURRENT_NOTE);

        let err = repo.create_note(Some("second")).await.unwrap_err();
        assert!(matches!(err, Error::StorageFault(_)));
        let reports = repo.sink().reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "create_note");

        store.clear_faults();
        // Note and summary landed; only the selection was not moved.
        let list = repo.get_notes_list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "second");
        assert_eq!(repo.get_current_note_id().await, Some(first.id));
        assert!(repo.find_orphans().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_with_failing_list_write() {
        let (store, repo) = setup();
        let note = repo.create_note(Some("# a")).await.unwrap();
        store.fail_key(keys::NOTES_LIST);

        assert!(!repo.save_note_content(&note.id, "# new").await);
        let reports = repo.sink().reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "save_note_content");
        assert!(matches!(reports[0].1, Error::StorageFault(_)));

        store.clear_faults();
        // The note was rewritten but its summary is stale.
        assert_eq!(repo.get_note(&note.id).await.unwrap().title, "new");
        assert_eq!(repo.get_notes_list().await[0].title, "a");
    }

    #[tokio::test]
    async fn test_save_with_failing_note_write() {
        let (store, repo) = setup();
        let note = repo.create_note(Some("# a")).await.unwrap();
        store.set_fail_writes(true);

        assert!(!repo.save_note_content(&note.id, "# new").await);
        let reports = repo.sink().reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "save_note_content");
        assert!(matches!(reports[0].1, Error::StorageFault(_)));

        store.clear_faults();
        assert_eq!(repo.get_note(&note.id).await.unwrap(), note);
        assert_eq!(repo.get_notes_list().await[0].title, "a");
    }

    #[tokio::test]
    async fn test_reads_degrade() {
        let (store, repo) = setup();
        let a = repo.create_note(Some("a")).await.unwrap();

        store.set_fail_reads(true);
        assert!(repo.get_notes_list().await.is_empty());
        assert!(repo.get_note(&a.id).await.is_none());
        assert_eq!(repo.get_current_note_id().await, None);
        assert!(repo.search_notes("a").await.is_empty());
        assert!(repo.find_orphans().await.is_empty());
        assert_eq!(repo.sink().reports().len(), 5);
    }

    #[tokio::test]
    async fn test_corrupt_list_is_a_fault() {
        let (store, repo) = setup();
        store.set(keys::NOTES_LIST, json!("garbage")).await.unwrap();

        assert!(repo.get_notes_list().await.is_empty());
        assert!(repo.create_note(Some("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (store, repo) = setup();
        store
            .set(keys::LEGACY_CONTENT, json!("# Old note\nfrom before"))
            .await
            .unwrap();

        let migrated = repo.migrate_from_single_note().await.unwrap();
        assert_eq!(migrated.title, "Old note");
        assert!(repo.migrate_from_single_note().await.is_none());

        let list = repo.get_notes_list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(repo.get_current_note_id().await, Some(migrated.id));
        // The legacy blob is left untouched.
        assert!(store.get(keys::LEGACY_CONTENT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_migrate_without_legacy_content() {
        let (store, repo) = setup();
        assert!(repo.migrate_from_single_note().await.is_none());

        store.set(keys::LEGACY_CONTENT, json!("   \n")).await.unwrap();
        assert!(repo.migrate_from_single_note().await.is_none());
        assert!(repo.get_notes_list().await.is_empty());
    }

    #[tokio::test]
    async fn test_migrate_skips_when_notes_exist() {
        let (store, repo) = setup();
        repo.create_note(Some("existing")).await.unwrap();
        store.set(keys::LEGACY_CONTENT, json!("legacy")).await.unwrap();

        assert!(repo.migrate_from_single_note().await.is_none());
        assert_eq!(repo.get_notes_list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_migrate_skips_on_unreadable_list() {
        let (store, repo) = setup();
        store.set(keys::LEGACY_CONTENT, json!("legacy")).await.unwrap();
        store.fail_key(keys::NOTES_LIST);

        assert!(repo.migrate_from_single_note().await.is_none());
        store.clear_faults();
        assert!(repo.find_orphans().await.is_empty());
    }

    #[tokio::test]
    async fn test_search() {
        let (_store, repo) = setup();
        let groceries = repo.create_note(Some("# Groceries\nmilk, eggs")).await.unwrap();
        let meeting = repo.create_note(Some("Meeting notes\nDiscuss MILK budget")).await.unwrap();
        let long_tail = format!("Long\n{}needle", "x".repeat(120));
        repo.create_note(Some(&long_tail)).await.unwrap();

        let all = repo.get_notes_list().await;
        assert_eq!(repo.search_notes("").await, all);
        assert_eq!(repo.search_notes("   ").await, all);

        let ids: Vec<_> = repo.search_notes("Milk").await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![meeting.id.clone(), groceries.id.clone()]);

        let ids: Vec<_> = repo.search_notes("groc").await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![groceries.id]);

        // Only the preview is searched, not the full body.
        assert!(repo.search_notes("needle").await.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_sequence_stays_consistent() {
        let (_store, repo) = setup();
        let mut ids = Vec::new();
        for i in 0..6 {
            let note = repo.create_note(Some(&format!("# Note {}\nbody", i))).await.unwrap();
            ids.push(note.id);
        }
        for (i, id) in ids.iter().enumerate().step_by(2) {
            assert!(repo.save_note_content(id, &format!("edited {}", i)).await);
        }
        assert!(repo.delete_note(&ids[5]).await);
        assert!(repo.delete_note(&ids[0]).await);
        assert!(repo.save_note_content(&ids[3], "# Three\nagain").await);

        assert_eq!(repo.get_notes_list().await.len(), 4);
        assert_consistent(&repo).await;
    }

    #[tokio::test]
    async fn test_two_views_share_store() {
        let store = MemoryStore::new();
        let tab_a = NoteRepository::new(store.clone());
        let tab_b = NoteRepository::new(store);

        let note = tab_a.create_note(Some("shared")).await.unwrap();
        assert!(tab_b.save_note_content(&note.id, "edited in b").await);
        assert!(tab_a.save_note_content(&note.id, "edited in a").await);

        // Last write wins.
        assert_eq!(tab_b.get_note(&note.id).await.unwrap().content, "edited in a");
    }
}
