use std::path::PathBuf;

use tempfile::TempDir;

use msgstore::core::{Message, MessageId, MessageReference};
use msgstore::storage::{MessageStore, StoreSettings, WriteMode};

/// A file-backed store in a temp dir that can be closed and reopened.
pub struct TestStore {
    _dir: TempDir,
    pub path: PathBuf,
    pub settings: StoreSettings,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_mode(WriteMode::RowAtATime)
    }

    pub fn with_mode(write_mode: WriteMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        Self {
            _dir: dir,
            path,
            settings: StoreSettings {
                write_mode,
                ..StoreSettings::default()
            },
        }
    }

    pub fn open(&self) -> MessageStore {
        MessageStore::open_path(&self.path, self.settings).unwrap()
    }
}

pub fn reference(store: &MessageStore, id: MessageId, reliable: bool) -> MessageReference {
    let message = Message::new(id, reliable).with_payload(format!("body-{id}").into_bytes());
    MessageReference::new(store.ledger().message_handle(message).unwrap())
}
