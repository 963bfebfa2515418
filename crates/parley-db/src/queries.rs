use std::collections::HashMap;

use anyhow::{Result, anyhow};
use rusqlite::{Connection, params};

use parley_types::models::{ChatMessage, FlagUpdate, NewMessage, UserSummary};
use parley_types::{MessageId, UserId};

use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow, now_timestamp};

/// Every message read goes through this projection so the reply preview and
/// sender profile are always resolved in the same query.
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.sender_id, m.receiver_id, m.content, m.is_read,
           m.deleted_for_sender, m.deleted_for_receiver, m.reply_to_id,
           r.sender_id, r.content, u.username, u.avatar, m.created_at, m.updated_at
    FROM messages m
    LEFT JOIN messages r ON r.id = m.reply_to_id
    LEFT JOIN users u ON u.id = m.sender_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str, avatar: Option<&str>) -> Result<UserId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, avatar) VALUES (?1, ?2, ?3)",
                params![username, password_hash, avatar],
            )?;
            Ok(conn.last_insert_rowid() as UserId)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id as i64))
    }

    /// Case-insensitive substring search on usernames, never returning `exclude`.
    pub fn search_users(&self, query: &str, exclude: UserId, limit: u32) -> Result<Vec<UserSummary>> {
        let pattern = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, avatar FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' AND id != ?2
                 ORDER BY username
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(params![pattern, exclude as i64, limit], |row| {
                    Ok(UserSummary {
                        id: row.get::<_, i64>(0)? as UserId,
                        username: row.get(1)?,
                        avatar: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and read back its full projection in one transaction.
    pub fn create_message(&self, new: &NewMessage) -> Result<ChatMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_timestamp();

            tx.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, reply_to_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    new.sender_id as i64,
                    new.receiver_id as i64,
                    new.content,
                    new.reply_to_id.map(|id| id as i64),
                    now,
                ],
            )?;

            let id = tx.last_insert_rowid();
            let message = query_message(&tx, id)?
                .ok_or_else(|| anyhow!("Message {} missing after insert", id))?;

            tx.commit()?;
            Ok(message)
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| query_message(conn, id as i64))
    }

    /// Apply every `Some` flag atomically. Returns the updated message, or
    /// `None` if no such message exists.
    pub fn update_message_flags(&self, id: MessageId, flags: FlagUpdate) -> Result<Option<ChatMessage>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE messages SET
                    is_read = COALESCE(?2, is_read),
                    deleted_for_sender = COALESCE(?3, deleted_for_sender),
                    deleted_for_receiver = COALESCE(?4, deleted_for_receiver),
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    id as i64,
                    flags.is_read,
                    flags.deleted_for_sender,
                    flags.deleted_for_receiver,
                    now_timestamp(),
                ],
            )?;

            if changed == 0 {
                return Ok(None);
            }

            let message = query_message(&tx, id as i64)?;
            tx.commit()?;
            Ok(message)
        })
    }

    pub fn update_message_content(&self, id: MessageId, content: &str) -> Result<Option<ChatMessage>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE messages SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id as i64, content, now_timestamp()],
            )?;

            if changed == 0 {
                return Ok(None);
            }

            let message = query_message(&tx, id as i64)?;
            tx.commit()?;
            Ok(message)
        })
    }

    /// The conversation between `user` and `partner` as `user` sees it,
    /// oldest first.
    pub fn get_conversation(&self, user: UserId, partner: UserId) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2 AND m.deleted_for_sender = 0)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1 AND m.deleted_for_receiver = 0)
                 ORDER BY m.created_at ASC, m.id ASC"
            );
            query_messages(conn, &sql, params![user as i64, partner as i64])
        })
    }

    /// Mark everything `partner` sent to `reader` as read.
    pub fn mark_conversation_read(&self, reader: UserId, partner: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, updated_at = ?3
                 WHERE sender_id = ?2 AND receiver_id = ?1 AND is_read = 0",
                params![reader as i64, partner as i64, now_timestamp()],
            )?;
            Ok(changed)
        })
    }

    /// One row per conversation partner, most recently active first.
    pub fn list_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE (m.sender_id = ?1 AND m.deleted_for_sender = 0)
                    OR (m.receiver_id = ?1 AND m.deleted_for_receiver = 0)
                 ORDER BY m.created_at DESC, m.id DESC"
            );
            let messages = query_messages(conn, &sql, params![user as i64])?;

            let mut order: Vec<UserId> = Vec::new();
            let mut latest: HashMap<UserId, (ChatMessage, u64)> = HashMap::new();

            for message in messages {
                let partner = message.partner_of(user);
                let unread = u64::from(message.receiver_id == user && !message.is_read);

                match latest.get_mut(&partner) {
                    Some((_, count)) => *count += unread,
                    None => {
                        order.push(partner);
                        latest.insert(partner, (message, unread));
                    }
                }
            }

            let mut rows = Vec::with_capacity(order.len());
            for partner_id in order {
                let Some(partner) = query_user(conn, "id = ?1", partner_id as i64)? else {
                    continue;
                };
                if let Some((last_message, unread_count)) = latest.remove(&partner_id) {
                    rows.push(ConversationRow {
                        partner: partner.summary(),
                        last_message,
                        unread_count,
                    });
                }
            }

            Ok(rows)
        })
    }

    /// Soft-delete the whole conversation for `user`. With `everyone`,
    /// messages `user` sent are also hidden from the partner; the partner's
    /// own messages stay visible to the partner either way.
    pub fn delete_conversation(&self, user: UserId, partner: UserId, everyone: bool) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_timestamp();
            let (user, partner) = (user as i64, partner as i64);

            let sent = if everyone {
                "UPDATE messages SET deleted_for_sender = 1, deleted_for_receiver = 1, updated_at = ?3
                 WHERE sender_id = ?1 AND receiver_id = ?2"
            } else {
                "UPDATE messages SET deleted_for_sender = 1, updated_at = ?3
                 WHERE sender_id = ?1 AND receiver_id = ?2"
            };

            let changed = tx.execute(sent, params![user, partner, now])?
                + tx.execute(
                    "UPDATE messages SET deleted_for_receiver = 1, updated_at = ?3
                     WHERE sender_id = ?2 AND receiver_id = ?1",
                    params![user, partner, now],
                )?;

            tx.commit()?;
            Ok(changed)
        })
    }
}

fn query_user(conn: &Connection, filter: &str, key: impl rusqlite::ToSql) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, avatar, created_at FROM users WHERE {filter}");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([key], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                avatar: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<ChatMessage>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], map_message_row).optional()?;
    Ok(row.map(MessageRow::into_message))
}

fn query_messages(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(MessageRow::into_message).collect())
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        is_read: row.get(4)?,
        deleted_for_sender: row.get(5)?,
        deleted_for_receiver: row.get(6)?,
        reply_to_id: row.get(7)?,
        reply_sender_id: row.get(8)?,
        reply_content: row.get(9)?,
        sender_username: row.get(10)?,
        sender_avatar: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, UserId, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "hash", None).unwrap();
        let bob = db.create_user("bob", "hash", Some("bob.png")).unwrap();
        let carol = db.create_user("carol", "hash", None).unwrap();
        (db, alice, bob, carol)
    }

    fn send(db: &Database, from: UserId, to: UserId, content: &str, reply_to_id: Option<MessageId>) -> ChatMessage {
        db.create_message(&NewMessage {
            sender_id: from,
            receiver_id: to,
            content: content.to_string(),
            reply_to_id,
        })
        .unwrap()
    }

    #[test]
    fn create_message_resolves_sender_and_reply() {
        let (db, alice, bob, _) = seeded();
        let first = send(&db, bob, alice, "hello", None);
        let reply = send(&db, alice, bob, "hi back", Some(first.id));

        assert_eq!(reply.reply_to_id, Some(first.id));
        let preview = reply.reply_to.expect("reply preview");
        assert_eq!(preview.content, "hello");
        assert_eq!(preview.sender_id, bob);
        assert_eq!(reply.sender.unwrap().username, "alice");
        assert!(!reply.is_read);
    }

    #[test]
    fn update_flags_reports_missing_message() {
        let (db, _, _, _) = seeded();
        assert!(db.update_message_flags(42, FlagUpdate::mark_read()).unwrap().is_none());
    }

    #[test]
    fn delete_for_me_hides_for_one_side_only() {
        let (db, alice, bob, _) = seeded();
        let msg = send(&db, alice, bob, "secret", None);

        db.update_message_flags(msg.id, FlagUpdate::delete_for(&msg, bob)).unwrap();

        assert_eq!(db.get_conversation(alice, bob).unwrap().len(), 1);
        assert!(db.get_conversation(bob, alice).unwrap().is_empty());
    }

    #[test]
    fn delete_for_everyone_hides_for_both() {
        let (db, alice, bob, _) = seeded();
        let msg = send(&db, alice, bob, "oops", None);

        let updated = db
            .update_message_flags(msg.id, FlagUpdate::delete_for_everyone())
            .unwrap()
            .unwrap();
        assert!(updated.deleted_for_sender && updated.deleted_for_receiver);

        assert!(db.get_conversation(alice, bob).unwrap().is_empty());
        assert!(db.get_conversation(bob, alice).unwrap().is_empty());
        // Rows are retained
        assert!(db.get_message(msg.id).unwrap().is_some());
    }

    #[test]
    fn conversation_list_groups_by_partner() {
        let (db, alice, bob, carol) = seeded();
        send(&db, bob, alice, "one", None);
        send(&db, bob, alice, "two", None);
        send(&db, alice, carol, "hey carol", None);

        let rows = db.list_conversations(alice).unwrap();
        assert_eq!(rows.len(), 2);

        let with_bob = rows.iter().find(|r| r.partner.id == bob).unwrap();
        assert_eq!(with_bob.unread_count, 2);
        assert_eq!(with_bob.last_message.content, "two");

        let with_carol = rows.iter().find(|r| r.partner.id == carol).unwrap();
        assert_eq!(with_carol.unread_count, 0);

        assert_eq!(db.mark_conversation_read(alice, bob).unwrap(), 2);
        let rows = db.list_conversations(alice).unwrap();
        assert!(rows.iter().all(|r| r.unread_count == 0));
    }

    #[test]
    fn delete_conversation_for_me_leaves_partner_view() {
        let (db, alice, bob, _) = seeded();
        send(&db, alice, bob, "a", None);
        send(&db, bob, alice, "b", None);

        assert_eq!(db.delete_conversation(alice, bob, false).unwrap(), 2);
        assert!(db.get_conversation(alice, bob).unwrap().is_empty());
        assert_eq!(db.get_conversation(bob, alice).unwrap().len(), 2);
        assert!(db.list_conversations(alice).unwrap().is_empty());
    }

    #[test]
    fn delete_conversation_for_everyone_only_reaches_callers_messages() {
        let (db, alice, bob, _) = seeded();
        send(&db, alice, bob, "from alice", None);
        send(&db, bob, alice, "from bob", None);

        assert_eq!(db.delete_conversation(bob, alice, true).unwrap(), 2);
        assert!(db.get_conversation(bob, alice).unwrap().is_empty());

        let alice_view = db.get_conversation(alice, bob).unwrap();
        assert_eq!(alice_view.len(), 1);
        assert_eq!(alice_view[0].content, "from alice");
    }

    #[test]
    fn duplicate_username_is_a_constraint_violation() {
        let (db, _, _, _) = seeded();
        let err = db.create_user("alice", "other-hash", None).unwrap_err();
        assert!(crate::is_constraint_violation(&err));

        assert!(!crate::is_constraint_violation(&anyhow::anyhow!("lock poisoned")));
    }

    #[test]
    fn search_excludes_caller_and_escapes_wildcards() {
        let (db, alice, _, _) = seeded();
        let hits = db.search_users("o", alice, 20).unwrap();
        let names: Vec<_> = hits.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);

        assert!(db.search_users("%", alice, 20).unwrap().is_empty());
    }
}
