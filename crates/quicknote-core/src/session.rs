use crate::sync::{BroadcastTransport, CrossTabNotifier, Payload, SyncMessage};
use crate::{Error, FaultSink, KvStore, LogSink, Note, NoteRepository};

/// One view of the store: repository mutations followed by cross-tab notices.
pub struct SyncedNotes<S: KvStore, T: BroadcastTransport, F: FaultSink = LogSink> {
    repo: NoteRepository<S, F>,
    notifier: CrossTabNotifier<T>,
}

impl<S: KvStore, T: BroadcastTransport, F: FaultSink> SyncedNotes<S, T, F> {
    pub fn new(repo: NoteRepository<S, F>, transport: T) -> Self {
        Self {
            repo,
            notifier: CrossTabNotifier::new(transport),
        }
    }

    /// Read access; reads never notify.
    pub fn repo(&self) -> &NoteRepository<S, F> {
        &self.repo
    }

    pub fn notifier(&self) -> &CrossTabNotifier<T> {
        &self.notifier
    }

    /// Start receiving other views' messages. See [`CrossTabNotifier::init_sync`].
    pub fn init_sync<C>(&mut self, on_message: C)
    where
        C: Fn(SyncMessage) + Send + Sync + 'static,
    {
        self.notifier.init_sync(on_message);
    }

    pub fn close_sync(&mut self) {
        self.notifier.close_sync();
    }

    pub async fn create_note(&self, content: Option<&str>) -> Result<Note, Error> {
        let note = self.repo.create_note(content).await?;
        self.notifier.broadcast_notes_list_update();
        Ok(note)
    }

    pub async fn save_note_content(&self, id: &str, content: &str) -> bool {
        if !self.repo.save_note_content(id, content).await {
            return false;
        }
        self.notifier.broadcast_update(Payload::NoteUpdate {
            note_id: id.to_string(),
            content: content.to_string(),
        });
        self.notifier.broadcast_notes_list_update();
        true
    }

    /// Other views are told to refresh even if a step failed, since some
    /// steps may have landed.
    pub async fn delete_note(&self, id: &str) -> bool {
        let ok = self.repo.delete_note(id).await;
        self.notifier.broadcast_notes_list_update();
        ok
    }

    pub async fn migrate_from_single_note(&self) -> Option<Note> {
        let note = self.repo.migrate_from_single_note().await?;
        self.notifier.broadcast_notes_list_update();
        Some(note)
    }

    pub async fn set_current_note_id(&self, id: Option<&str>) -> bool {
        self.repo.set_current_note_id(id).await
    }
}
