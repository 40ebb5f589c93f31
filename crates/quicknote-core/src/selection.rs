use crate::kv::keys::CURRENT_NOTE;
use crate::{Error, FaultSink, KvStore};
use serde_json::Value;

/// The "current note" pointer, stored under a single key.
///
/// No validation against the notes list happens here; callers keep the
/// pointer valid.
pub struct SelectionTracker<'a, S: KvStore + ?Sized> {
    store: &'a S,
    sink: &'a dyn FaultSink,
}

impl<'a, S: KvStore + ?Sized> SelectionTracker<'a, S> {
    pub fn new(store: &'a S, sink: &'a dyn FaultSink) -> Self {
        Self { store, sink }
    }

    /// The selected id, or `None` if unset, cleared, or unreadable.
    pub async fn get_current_note_id(&self) -> Option<String> {
        match self.try_get().await {
            Ok(id) => id,
            Err(e) => {
                self.sink.report("get_current_note_id", &e);
                None
            }
        }
    }

    /// Point the selection at `id`, or clear it with `None`.
    pub async fn set_current_note_id(&self, id: Option<&str>) -> bool {
        match self.try_set(id).await {
            Ok(()) => true,
            Err(e) => {
                self.sink.report("set_current_note_id", &e);
                false
            }
        }
    }

    pub(crate) async fn try_get(&self) -> Result<Option<String>, Error> {
        match self.store.get(CURRENT_NOTE).await? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) => Ok(Some(id)),
            Some(other) => Err(Error::StorageFault(format!(
                "current note id is not a string: {}",
                other
            ))),
        }
    }

    pub(crate) async fn try_set(&self, id: Option<&str>) -> Result<(), Error> {
        let value = id.map_or(Value::Null, |id| Value::String(id.to_string()));
        self.store.set(CURRENT_NOTE, value).await
    }
}
