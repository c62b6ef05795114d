//! Append-only chat transcript.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::Serialize;

use super::{Store, StoreError};

/// One exchange to record.
#[derive(Debug, Clone)]
pub struct NewChatLog {
    /// Asking user.
    pub user_id: i64,
    /// User text.
    pub query: String,
    /// Assistant reply.
    pub response: String,
    /// Whether the emergency override fired.
    pub is_emergency: bool,
    /// Language the reply was given in.
    pub language: String,
}

/// A recorded exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLog {
    /// Row id.
    pub id: i64,
    /// Asking user.
    pub user_id: i64,
    /// User text.
    pub query: String,
    /// Assistant reply.
    pub response: String,
    /// Whether the emergency override fired.
    pub is_emergency: bool,
    /// Reply language.
    pub language: String,
    /// Time of the exchange.
    pub created_at: DateTime<Utc>,
}

fn chat_log_from_row(row: &Row<'_>) -> rusqlite::Result<ChatLog> {
    Ok(ChatLog {
        id: row.get(0)?,
        user_id: row.get(1)?,
        query: row.get(2)?,
        response: row.get(3)?,
        is_emergency: row.get(4)?,
        language: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl Store {
    /// Appends one exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the insert fails.
    pub fn append_chat_log(&self, entry: &NewChatLog) -> Result<ChatLog, StoreError> {
        let conn = self.lock()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO chat_logs (user_id, query, response, is_emergency, language, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.user_id,
                entry.query,
                entry.response,
                entry.is_emergency,
                entry.language,
                created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        if entry.is_emergency {
            tracing::warn!(user_id = entry.user_id, chat_log_id = id, "emergency chat recorded");
        }

        Ok(ChatLog {
            id,
            user_id: entry.user_id,
            query: entry.query.clone(),
            response: entry.response.clone(),
            is_emergency: entry.is_emergency,
            language: entry.language.clone(),
            created_at,
        })
    }

    /// Returns the user's most recent `limit` exchanges in chronological
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chat_history(&self, user_id: i64, limit: u32) -> Result<Vec<ChatLog>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, query, response, is_emergency, language, created_at
             FROM chat_logs
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let mut logs = stmt
            .query_map(params![user_id, limit], chat_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        logs.reverse();
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Role;
    use crate::store::test_support::user;

    fn entry(user_id: i64, query: &str, is_emergency: bool) -> NewChatLog {
        NewChatLog {
            user_id,
            query: query.to_string(),
            response: format!("re: {query}"),
            is_emergency,
            language: "English".to_string(),
        }
    }

    #[test]
    fn test_history_is_chronological_and_limited() {
        let store = Store::in_memory().unwrap();
        let alice = user(&store, "alice", Role::Patient);
        let bob = user(&store, "bob", Role::Patient);

        for query in ["one", "two", "three"] {
            store.append_chat_log(&entry(alice.id, query, false)).unwrap();
        }
        store.append_chat_log(&entry(bob.id, "other", true)).unwrap();

        let all: Vec<String> = store
            .chat_history(alice.id, 50)
            .unwrap()
            .into_iter()
            .map(|log| log.query)
            .collect();
        assert_eq!(all, ["one", "two", "three"]);

        let recent: Vec<String> = store
            .chat_history(alice.id, 2)
            .unwrap()
            .into_iter()
            .map(|log| log.query)
            .collect();
        assert_eq!(recent, ["two", "three"]);

        let bobs = store.chat_history(bob.id, 50).unwrap();
        assert_eq!(bobs.len(), 1);
        assert!(bobs[0].is_emergency);
    }

    #[test]
    fn test_unknown_user_is_rejected() {
        let store = Store::in_memory().unwrap();
        assert!(store.append_chat_log(&entry(31, "hi", false)).is_err());
    }
}
