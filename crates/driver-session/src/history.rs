//! Identity-scoped chat history on top of a [`KeyValueStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use driver_core::{ChatTranscript, TranscriptSummary};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::{KeyValueStore, StoreResult};

pub const HISTORY_STORAGE_KEY: &str = "driver-workspace-chatHistory-v1";

/// The signed-in principal that owns a slice of history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub organization: String,
    pub user_id: String,
}

impl Identity {
    pub fn new(organization: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            user_id: user_id.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}-{}", self.organization, self.user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLocalHistory {
    #[serde(default)]
    pub chat: BTreeMap<String, ChatTranscript>,
}

/// Identity key to that identity's history.
pub type AccountKeyedChatHistory = BTreeMap<String, UserLocalHistory>;

/// Every operation is a read-modify-write of the whole stored value; `lock`
/// keeps them from interleaving.
pub struct ChatHistory {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> StoreResult<AccountKeyedChatHistory> {
        match self.store.get(HISTORY_STORAGE_KEY).await? {
            Some(value) if !value.is_null() => Ok(serde_json::from_value(value)?),
            _ => Ok(AccountKeyedChatHistory::new()),
        }
    }

    async fn write_all(&self, history: &AccountKeyedChatHistory) -> StoreResult<()> {
        self.store
            .set(HISTORY_STORAGE_KEY, serde_json::to_value(history)?)
            .await
    }

    /// Upserts `transcript` by id. A no-op without an identity.
    pub async fn save(
        &self,
        identity: Option<&Identity>,
        transcript: &ChatTranscript,
    ) -> StoreResult<()> {
        let Some(identity) = identity else {
            return Ok(());
        };
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.entry(identity.key())
            .or_default()
            .chat
            .insert(transcript.id.clone(), transcript.clone());
        self.write_all(&all).await
    }

    pub async fn load(
        &self,
        identity: Option<&Identity>,
        id: &str,
    ) -> StoreResult<Option<ChatTranscript>> {
        let Some(identity) = identity else {
            return Ok(None);
        };
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        Ok(all
            .remove(&identity.key())
            .and_then(|mut history| history.chat.remove(id)))
    }

    /// Returns whether a transcript was removed.
    pub async fn delete(&self, identity: Option<&Identity>, id: &str) -> StoreResult<bool> {
        let Some(identity) = identity else {
            return Ok(false);
        };
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        let removed = all
            .get_mut(&identity.key())
            .and_then(|history| history.chat.remove(id))
            .is_some();
        if removed {
            self.write_all(&all).await?;
        }
        Ok(removed)
    }

    /// Drops everything stored for `identity`.
    pub async fn clear(&self, identity: Option<&Identity>) -> StoreResult<()> {
        let Some(identity) = identity else {
            return Ok(());
        };
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        if all.remove(&identity.key()).is_some() {
            self.write_all(&all).await?;
        }
        Ok(())
    }

    pub async fn history(&self, identity: Option<&Identity>) -> StoreResult<UserLocalHistory> {
        let Some(identity) = identity else {
            return Ok(UserLocalHistory::default());
        };
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        Ok(all.remove(&identity.key()).unwrap_or_default())
    }

    /// Saved sessions, most recently active first.
    pub async fn summaries(
        &self,
        identity: Option<&Identity>,
    ) -> StoreResult<Vec<TranscriptSummary>> {
        let history = self.history(identity).await?;
        let mut summaries: Vec<_> = history.chat.values().map(ChatTranscript::summary).collect();
        summaries.sort_by(|a, b| b.last_interaction_timestamp.cmp(&a.last_interaction_timestamp));
        Ok(summaries)
    }

    /// The account-keyed slice belonging to `identity`, ready for import elsewhere.
    pub async fn export(
        &self,
        identity: Option<&Identity>,
    ) -> StoreResult<AccountKeyedChatHistory> {
        let Some(identity) = identity else {
            return Ok(AccountKeyedChatHistory::new());
        };
        let history = self.history(Some(identity)).await?;
        Ok(AccountKeyedChatHistory::from([(identity.key(), history)]))
    }

    /// Replaces stored history with `imported`. With `merge`, existing entries
    /// are kept and win over imported ones with the same id.
    pub async fn import(&self, imported: AccountKeyedChatHistory, merge: bool) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut result = imported;
        if merge {
            for (account, existing) in self.read_all().await? {
                result.entry(account).or_default().chat.extend(existing.chat);
            }
        }
        self.write_all(&result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};
    use driver_core::{HumanMessage, Interaction};

    fn history() -> (ChatHistory, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ChatHistory::new(store.clone()), store)
    }

    fn alice() -> Identity {
        Identity::new("acme", "alice")
    }

    fn transcript(id: &str, title: &str) -> ChatTranscript {
        let mut transcript = ChatTranscript::new(id);
        transcript.chat_title = Some(title.to_string());
        transcript.interactions.push(Interaction {
            human_message: HumanMessage::new(title),
            assistant_message: None,
        });
        transcript
    }

    #[tokio::test]
    async fn save_uses_account_keyed_layout() {
        let (history, store) = history();

        history.save(Some(&alice()), &transcript("c1", "first")).await.unwrap();

        let raw = store.get(HISTORY_STORAGE_KEY).await.unwrap().unwrap();
        assert_eq!(raw["acme-alice"]["chat"]["c1"]["chatTitle"], "first");
    }

    #[tokio::test]
    async fn save_upserts_by_id() {
        let (history, _) = history();
        let identity = alice();

        history.save(Some(&identity), &transcript("c1", "old")).await.unwrap();
        history.save(Some(&identity), &transcript("c1", "new")).await.unwrap();

        let loaded = history.load(Some(&identity), "c1").await.unwrap().unwrap();
        assert_eq!(loaded.chat_title.as_deref(), Some("new"));
        assert_eq!(history.history(Some(&identity)).await.unwrap().chat.len(), 1);
    }

    #[tokio::test]
    async fn identities_are_isolated() {
        let (history, _) = history();
        let bob = Identity::new("acme", "bob");

        history.save(Some(&alice()), &transcript("c1", "mine")).await.unwrap();

        assert!(history.load(Some(&bob), "c1").await.unwrap().is_none());
        history.clear(Some(&bob)).await.unwrap();
        assert!(history.load(Some(&alice()), "c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn without_identity_everything_is_a_no_op() {
        let (history, store) = history();

        history.save(None, &transcript("c1", "x")).await.unwrap();

        assert!(store.get(HISTORY_STORAGE_KEY).await.unwrap().is_none());
        assert!(history.load(None, "c1").await.unwrap().is_none());
        assert!(!history.delete(None, "c1").await.unwrap());
        assert!(history.summaries(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (history, _) = history();
        let identity = alice();
        history.save(Some(&identity), &transcript("c1", "a")).await.unwrap();
        history.save(Some(&identity), &transcript("c2", "b")).await.unwrap();

        assert!(history.delete(Some(&identity), "c1").await.unwrap());
        assert!(!history.delete(Some(&identity), "c1").await.unwrap());
        assert_eq!(history.history(Some(&identity)).await.unwrap().chat.len(), 1);

        history.clear(Some(&identity)).await.unwrap();
        assert!(history.history(Some(&identity)).await.unwrap().chat.is_empty());
    }

    #[tokio::test]
    async fn summaries_are_newest_first() {
        let (history, _) = history();
        let identity = alice();
        let mut older = transcript("old", "older");
        older.last_interaction_timestamp = Utc::now() - Duration::hours(1);
        history.save(Some(&identity), &older).await.unwrap();
        history.save(Some(&identity), &transcript("new", "newer")).await.unwrap();

        let ids: Vec<_> = history
            .summaries(Some(&identity))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn import_merge_keeps_existing_entries() {
        let (history, _) = history();
        let identity = alice();
        history.save(Some(&identity), &transcript("c1", "local")).await.unwrap();

        let mut imported = history.export(Some(&identity)).await.unwrap();
        let chats = &mut imported.get_mut("acme-alice").unwrap().chat;
        chats.insert("c1".into(), transcript("c1", "imported"));
        chats.insert("c2".into(), transcript("c2", "extra"));

        history.import(imported.clone(), true).await.unwrap();
        let merged = history.history(Some(&identity)).await.unwrap();
        assert_eq!(merged.chat["c1"].chat_title.as_deref(), Some("local"));
        assert_eq!(merged.chat.len(), 2);

        history.import(imported, false).await.unwrap();
        let replaced = history.history(Some(&identity)).await.unwrap();
        assert_eq!(replaced.chat["c1"].chat_title.as_deref(), Some("imported"));
    }
}
