//! SQLite store.
//!
//! One database file can back many queues and many processes. Each namespace
//! gets its own tables:
//!
//! - `queue`: queued copies (`delivery`, claim marker `locked` / `locked_at`)
//! - `unacked`: leased copies (`expiry`, `owner`)
//! - `messages`: one body per fingerprint, with the attempts counter
//! - `dead`: dead letters, scoped by the dead letter queue name
//!
//! Claims run in two phases. A single conditional `UPDATE` marks up to `n`
//! ready rows with a token that only this claim knows (`locked = '0'` is the
//! compare-and-swap guard, so two pollers never mark the same row). A second
//! transaction moves the marked rows into `unacked`. If that transaction
//! fails the marks are cleared again, and a retry of the same claim (same
//! token) picks up whatever is still marked. A poller dying between the
//! phases leaves rows marked; `release_stale_claims` unmarks them.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};

use crate::domain::{
    DeadLetterId, EntryId, Envelope, Fingerprint, LeaseId, MessageState, QueueCounts,
};
use crate::error::StoreError;
use crate::ports::MessageStore;
use crate::queue::config::QueueNamespace;
use crate::queue::record::{ClaimRequest, ClaimedMessage, DeadLetter, ExpiredLease, NewEntry};

const UNLOCKED: &str = "0";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Table names of one namespace.
#[derive(Debug, Clone)]
struct Tables {
    queue_name: String,
    queue: String,
    unacked: String,
    messages: String,
    dead: String,
}

impl Tables {
    fn new(namespace: &QueueNamespace) -> Self {
        Self {
            queue_name: namespace.queue_name.clone(),
            queue: namespace.queue_table(),
            unacked: namespace.unacked_table(),
            messages: namespace.messages_table(),
            dead: namespace.dead_table(),
        }
    }

    fn create(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {queue} (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                delivery INTEGER NOT NULL,
                locked TEXT NOT NULL DEFAULT '0',
                locked_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS {queue}_delivery ON {queue} (delivery, id);
            CREATE INDEX IF NOT EXISTS {queue}_locked ON {queue} (locked);

            CREATE TABLE IF NOT EXISTS {unacked} (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                expiry INTEGER NOT NULL,
                owner TEXT NOT NULL,
                leased_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {unacked}_expiry ON {unacked} (expiry);

            CREATE TABLE IF NOT EXISTS {messages} (
                fingerprint TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS {dead} (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                body TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                dead_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {dead}_dead_at ON {dead} (dead_at);",
            queue = self.queue,
            unacked = self.unacked,
            messages = self.messages,
            dead = self.dead,
        ))?;
        Ok(())
    }
}

/// `MessageStore` backed by SQLite through rusqlite.
#[derive(Clone)]
pub struct SqliteStore {
    namespace: QueueNamespace,
    tables: Arc<Tables>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file. File databases run in WAL mode so
    /// that readers in other processes do not block pollers.
    pub fn open(path: impl AsRef<Path>, namespace: QueueNamespace) -> Result<Self, StoreError> {
        namespace.validate()?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::with_connection(Arc::new(Mutex::new(conn)), namespace)
    }

    /// Private in-memory database. Only stores sharing this connection (see
    /// `share`) can see its data.
    pub fn open_in_memory(namespace: QueueNamespace) -> Result<Self, StoreError> {
        namespace.validate()?;
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(Arc::new(Mutex::new(conn)), namespace)
    }

    /// Wraps an existing connection and creates the namespace's tables.
    pub fn with_connection(
        conn: Arc<Mutex<Connection>>,
        namespace: QueueNamespace,
    ) -> Result<Self, StoreError> {
        namespace.validate()?;
        let tables = Tables::new(&namespace);
        {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            tables.create(&guard)?;
        }
        tracing::debug!(
            queue = %namespace.queue_name,
            schema_version = namespace.schema_version,
            "sqlite store ready"
        );
        Ok(Self {
            namespace,
            tables: Arc::new(tables),
            conn,
        })
    }

    /// A store for another namespace over the same connection.
    pub fn share(&self, namespace: QueueNamespace) -> Result<Self, StoreError> {
        Self::with_connection(Arc::clone(&self.conn), namespace)
    }

    /// Runs `op` on the blocking pool with the connection locked.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Tables) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let tables = Arc::clone(&self.tables);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard, &tables)
        })
        .await?
    }
}

fn immediate(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn encode(envelope: &Envelope) -> Result<String, StoreError> {
    serde_json::to_string(envelope).map_err(|e| StoreError::Backend(format!("encode body: {e}")))
}

fn decode(fingerprint: &Fingerprint, body: &str) -> Result<Envelope, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        fingerprint: fingerprint.clone(),
        reason: e.to_string(),
    })
}

fn write_queued(tx: &Transaction<'_>, tables: &Tables, entry: &NewEntry) -> Result<(), StoreError> {
    tx.execute(
        &format!(
            "INSERT INTO {} (id, fingerprint, delivery, locked, locked_at)
             VALUES (?1, ?2, ?3, '0', 0)
             ON CONFLICT(fingerprint) DO UPDATE SET delivery = excluded.delivery",
            tables.queue
        ),
        params![
            entry.entry_id.to_key(),
            entry.fingerprint.as_str(),
            millis(entry.deliver_after)
        ],
    )?;
    tx.execute(
        &format!(
            "INSERT INTO {} (fingerprint, kind, body, attempts) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(fingerprint) DO UPDATE
             SET kind = excluded.kind, body = excluded.body, attempts = 0",
            tables.messages
        ),
        params![
            entry.fingerprint.as_str(),
            entry.envelope.kind().as_str(),
            encode(&entry.envelope)?
        ],
    )?;
    Ok(())
}

fn is_live(conn: &Connection, tables: &Tables, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE fingerprint = ?1)
                 OR EXISTS(SELECT 1 FROM {} WHERE fingerprint = ?1)",
            tables.queue, tables.unacked
        ),
        params![fingerprint.as_str()],
        |row| row.get(0),
    )?)
}

/// Removes a lease row that belongs to `lease`. Returns false if it is gone.
fn take_lease(tx: &Transaction<'_>, tables: &Tables, lease: &ExpiredLease) -> Result<bool, StoreError> {
    let removed = tx.execute(
        &format!(
            "DELETE FROM {} WHERE id = ?1 AND fingerprint = ?2",
            tables.unacked
        ),
        params![lease.lease_id.to_key(), lease.fingerprint.as_str()],
    )?;
    Ok(removed > 0)
}

fn count(conn: &Connection, sql: &str, now: Option<i64>) -> Result<usize, StoreError> {
    let n: i64 = match now {
        Some(now) => conn.query_row(sql, params![now], |row| row.get(0))?,
        None => conn.query_row(sql, [], |row| row.get(0))?,
    };
    Ok(n.max(0) as usize)
}

/// Second claim phase: moves the rows marked with `token` into the leased
/// set in one transaction.
fn lease_marked(
    conn: &mut Connection,
    tables: &Tables,
    request: &ClaimRequest,
    token: &str,
    queue_name: &str,
) -> Result<Vec<ClaimedMessage>, StoreError> {
    let now = millis(request.now);
    let tx = immediate(conn)?;
    let rows: Vec<(String, String, i64, Option<String>, Option<i64>)> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT q.id, q.fingerprint, q.delivery, m.body, m.attempts
             FROM {queue} q LEFT JOIN {messages} m ON m.fingerprint = q.fingerprint
             WHERE q.locked = ?1
             ORDER BY q.delivery, q.id",
            queue = tables.queue,
            messages = tables.messages,
        ))?;
        let rows = stmt
            .query_map(params![token], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut lease_ids = request.lease_ids.iter();
    let mut claimed = Vec::with_capacity(rows.len());
    for (entry_key, fp, delivery, body, attempts) in rows {
        let fingerprint = Fingerprint::from_stored(fp);
        let envelope = match body.as_deref().map(|b| decode(&fingerprint, b)) {
            Some(Ok(envelope)) => envelope,
            Some(Err(err)) => {
                tracing::warn!(queue = %queue_name, fingerprint = %fingerprint, error = %err, "dropping message with corrupt body");
                tx.execute(
                    &format!("DELETE FROM {} WHERE id = ?1", tables.queue),
                    params![entry_key],
                )?;
                tx.execute(
                    &format!("DELETE FROM {} WHERE fingerprint = ?1", tables.messages),
                    params![fingerprint.as_str()],
                )?;
                continue;
            }
            None => {
                tracing::warn!(queue = %queue_name, fingerprint = %fingerprint, "dropping queued copy without a message body");
                tx.execute(
                    &format!("DELETE FROM {} WHERE id = ?1", tables.queue),
                    params![entry_key],
                )?;
                continue;
            }
        };
        let Some(&lease_id) = lease_ids.next() else {
            break;
        };

        let expires_at = request.expiry_for(&envelope);
        let inserted = tx.execute(
            &format!(
                "INSERT INTO {} (id, fingerprint, expiry, owner, leased_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(fingerprint) DO NOTHING",
                tables.unacked
            ),
            params![
                lease_id.to_key(),
                fingerprint.as_str(),
                millis(expires_at),
                request.poller.to_key(),
                now
            ],
        )?;
        if inserted == 0 {
            // leased meanwhile by a retry requeue race; hand it back
            tx.execute(
                &format!(
                    "UPDATE {} SET locked = '0', locked_at = 0 WHERE id = ?1",
                    tables.queue
                ),
                params![entry_key],
            )?;
            continue;
        }
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", tables.queue),
            params![entry_key],
        )?;

        claimed.push(ClaimedMessage {
            lease_id,
            fingerprint,
            envelope,
            attempts: attempts.unwrap_or(0).max(0) as u32,
            scheduled_at: from_millis(delivery),
            expires_at,
        });
    }

    // marked twice by a retried claim, or past our lease ids
    unmark(&tx, tables, token)?;
    tx.commit()?;
    Ok(claimed)
}

fn has_marks(conn: &Connection, tables: &Tables, token: &str) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE locked = ?1)", tables.queue),
        params![token],
        |row| row.get(0),
    )?)
}

fn unmark(conn: &Connection, tables: &Tables, token: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        &format!(
            "UPDATE {} SET locked = '0', locked_at = 0 WHERE locked = ?1",
            tables.queue
        ),
        params![token],
    )?)
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn namespace(&self) -> &QueueNamespace {
        &self.namespace
    }

    async fn insert(&self, entry: NewEntry) -> Result<(), StoreError> {
        self.run(move |conn, tables| {
            let tx = immediate(conn)?;
            write_queued(&tx, tables, &entry)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_if_absent(&self, entry: NewEntry) -> Result<bool, StoreError> {
        self.run(move |conn, tables| {
            let tx = immediate(conn)?;
            if is_live(&tx, tables, &entry.fingerprint)? {
                return Ok(false);
            }
            write_queued(&tx, tables, &entry)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn exists_live(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let fingerprint = fingerprint.clone();
        self.run(move |conn, tables| is_live(conn, tables, &fingerprint))
            .await
    }

    async fn states(&self, fingerprint: &Fingerprint) -> Result<Vec<MessageState>, StoreError> {
        let fingerprint = fingerprint.clone();
        self.run(move |conn, tables| {
            let exists = |sql: String, extra: Option<&str>| -> Result<bool, StoreError> {
                let found: bool = match extra {
                    Some(extra) => conn.query_row(
                        &sql,
                        params![fingerprint.as_str(), extra],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row(&sql, params![fingerprint.as_str()], |row| row.get(0))?,
                };
                Ok(found)
            };

            let mut states = Vec::new();
            if exists(
                format!("SELECT EXISTS(SELECT 1 FROM {} WHERE fingerprint = ?1)", tables.queue),
                None,
            )? {
                states.push(MessageState::Queued);
            }
            if exists(
                format!("SELECT EXISTS(SELECT 1 FROM {} WHERE fingerprint = ?1)", tables.unacked),
                None,
            )? {
                states.push(MessageState::Leased);
            }
            if exists(
                format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE fingerprint = ?1 AND queue_name = ?2)",
                    tables.dead
                ),
                Some(tables.queue_name.as_str()),
            )? {
                states.push(MessageState::DeadLettered);
            }
            Ok(states)
        })
        .await
    }

    async fn update_deliver_after(
        &self,
        fingerprint: &Fingerprint,
        deliver_after: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let fingerprint = fingerprint.clone();
        self.run(move |conn, tables| {
            let updated = conn.execute(
                &format!("UPDATE {} SET delivery = ?2 WHERE fingerprint = ?1", tables.queue),
                params![fingerprint.as_str(), millis(deliver_after)],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn claim_ready(&self, request: ClaimRequest) -> Result<Vec<ClaimedMessage>, StoreError> {
        let Some(token) = request.lease_ids.first().map(LeaseId::to_key) else {
            return Ok(Vec::new());
        };
        let queue_name = self.namespace.queue_name.clone();

        self.run(move |conn, tables| {
            let now = millis(request.now);

            // phase 1: mark
            let marked = conn.execute(
                &format!(
                    "UPDATE {queue} SET locked = ?1, locked_at = ?2
                     WHERE locked = '0' AND id IN (
                         SELECT q.id FROM {queue} q
                         WHERE q.delivery <= ?2 AND q.locked = '0'
                           AND NOT EXISTS (SELECT 1 FROM {unacked} u WHERE u.fingerprint = q.fingerprint)
                         ORDER BY q.delivery, q.id
                         LIMIT ?3
                     )",
                    queue = tables.queue,
                    unacked = tables.unacked,
                ),
                params![token, now, request.limit() as i64],
            )?;
            // an earlier try of this claim may have marked rows and failed
            if marked == 0 && !has_marks(conn, tables, &token)? {
                return Ok(Vec::new());
            }

            let leased = lease_marked(conn, tables, &request, &token, &queue_name);
            if leased.is_err() {
                if let Err(err) = unmark(conn, tables, &token) {
                    tracing::warn!(queue = %queue_name, error = %err, "claim markers left behind until lock_ttl");
                }
            }
            leased
        })
        .await
    }

    async fn delete(&self, fingerprint: &Fingerprint, lease_id: LeaseId) -> Result<bool, StoreError> {
        let fingerprint = fingerprint.clone();
        self.run(move |conn, tables| {
            let tx = immediate(conn)?;
            let removed = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE fingerprint = ?1 AND id = ?2",
                    tables.unacked
                ),
                params![fingerprint.as_str(), lease_id.to_key()],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            tx.execute(
                &format!(
                    "DELETE FROM {messages} WHERE fingerprint = ?1
                     AND NOT EXISTS (SELECT 1 FROM {queue} WHERE fingerprint = ?1)",
                    messages = tables.messages,
                    queue = tables.queue,
                ),
                params![fingerprint.as_str()],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredLease>, StoreError> {
        let queue_name = self.namespace.queue_name.clone();
        self.run(move |conn, tables| {
            let rows: Vec<(String, String, i64, Option<String>, Option<i64>)> = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT u.id, u.fingerprint, u.expiry, m.body, m.attempts
                     FROM {unacked} u LEFT JOIN {messages} m ON m.fingerprint = u.fingerprint
                     WHERE u.expiry <= ?1
                     ORDER BY u.expiry, u.id",
                    unacked = tables.unacked,
                    messages = tables.messages,
                ))?;
                let rows = stmt
                    .query_map(params![millis(now)], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let mut expired = Vec::with_capacity(rows.len());
            let mut unreadable = Vec::new();
            for (lease_key, fp, expiry, body, attempts) in rows {
                let fingerprint = Fingerprint::from_stored(fp);
                let lease_id = LeaseId::parse(&lease_key);
                let envelope = body.as_deref().map(|b| decode(&fingerprint, b));
                match (lease_id, envelope) {
                    (Ok(lease_id), Some(Ok(envelope))) => expired.push(ExpiredLease {
                        lease_id,
                        fingerprint,
                        envelope,
                        attempts: attempts.unwrap_or(0).max(0) as u32,
                        expired_at: from_millis(expiry),
                    }),
                    _ => {
                        tracing::warn!(queue = %queue_name, fingerprint = %fingerprint, lease = %lease_key, "dropping unreadable lease");
                        unreadable.push((lease_key, fingerprint));
                    }
                }
            }

            if !unreadable.is_empty() {
                let tx = immediate(conn)?;
                for (lease_key, fingerprint) in unreadable {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE id = ?1", tables.unacked),
                        params![lease_key],
                    )?;
                    tx.execute(
                        &format!(
                            "DELETE FROM {messages} WHERE fingerprint = ?1
                             AND NOT EXISTS (SELECT 1 FROM {queue} WHERE fingerprint = ?1)",
                            messages = tables.messages,
                            queue = tables.queue,
                        ),
                        params![fingerprint.as_str()],
                    )?;
                }
                tx.commit()?;
            }
            Ok(expired)
        })
        .await
    }

    async fn release_lease(
        &self,
        lease: &ExpiredLease,
        entry_id: EntryId,
        deliver_after: DateTime<Utc>,
        attempts: u32,
    ) -> Result<bool, StoreError> {
        let lease = lease.clone();
        self.run(move |conn, tables| {
            let tx = immediate(conn)?;
            if !take_lease(&tx, tables, &lease)? {
                return Ok(false);
            }
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, fingerprint, delivery, locked, locked_at)
                     VALUES (?1, ?2, ?3, '0', 0)
                     ON CONFLICT(fingerprint) DO UPDATE SET delivery = excluded.delivery",
                    tables.queue
                ),
                params![
                    entry_id.to_key(),
                    lease.fingerprint.as_str(),
                    millis(deliver_after)
                ],
            )?;
            // a newer body pushed during the lease wins
            tx.execute(
                &format!(
                    "INSERT INTO {} (fingerprint, kind, body, attempts) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(fingerprint) DO UPDATE SET attempts = excluded.attempts",
                    tables.messages
                ),
                params![
                    lease.fingerprint.as_str(),
                    lease.envelope.kind().as_str(),
                    encode(&lease.envelope)?,
                    i64::from(attempts)
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn remove_and_dead_letter(
        &self,
        lease: &ExpiredLease,
        letter: DeadLetter,
    ) -> Result<bool, StoreError> {
        let lease = lease.clone();
        self.run(move |conn, tables| {
            let tx = immediate(conn)?;
            if !take_lease(&tx, tables, &lease)? {
                return Ok(false);
            }
            tx.execute(
                &format!("DELETE FROM {} WHERE fingerprint = ?1", tables.queue),
                params![lease.fingerprint.as_str()],
            )?;
            tx.execute(
                &format!("DELETE FROM {} WHERE fingerprint = ?1", tables.messages),
                params![lease.fingerprint.as_str()],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, queue_name, fingerprint, body, attempts, dead_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    tables.dead
                ),
                params![
                    letter.id.to_key(),
                    letter.queue_name,
                    letter.fingerprint.as_str(),
                    encode(&letter.envelope)?,
                    i64::from(letter.attempts),
                    millis(letter.dead_at)
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn release_stale_claims(
        &self,
        now: DateTime<Utc>,
        lock_ttl: Duration,
    ) -> Result<usize, StoreError> {
        let cutoff = millis(now).saturating_sub(i64::try_from(lock_ttl.as_millis()).unwrap_or(i64::MAX));
        self.run(move |conn, tables| {
            let released = conn.execute(
                &format!(
                    "UPDATE {} SET locked = ?1, locked_at = 0, delivery = ?2
                     WHERE locked <> ?1 AND locked_at <= ?3",
                    tables.queue
                ),
                params![UNLOCKED, millis(now), cutoff],
            )?;
            Ok(released)
        })
        .await
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<QueueCounts, StoreError> {
        self.run(move |conn, tables| {
            let now = millis(now);
            Ok(QueueCounts {
                depth: count(conn, &format!("SELECT COUNT(*) FROM {}", tables.queue), None)?,
                ready: count(
                    conn,
                    &format!("SELECT COUNT(*) FROM {} WHERE delivery <= ?1", tables.queue),
                    Some(now),
                )?,
                unacked: count(conn, &format!("SELECT COUNT(*) FROM {}", tables.unacked), None)?,
                dead: count(conn, &format!("SELECT COUNT(*) FROM {}", tables.dead), None)?,
                orphaned: count(
                    conn,
                    &format!(
                        "SELECT COUNT(*) FROM {messages} m
                         WHERE NOT EXISTS (SELECT 1 FROM {queue} q WHERE q.fingerprint = m.fingerprint)
                           AND NOT EXISTS (SELECT 1 FROM {unacked} u WHERE u.fingerprint = m.fingerprint)",
                        messages = tables.messages,
                        queue = tables.queue,
                        unacked = tables.unacked,
                    ),
                    None,
                )?,
            })
        })
        .await
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        self.run(move |conn, tables| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, queue_name, fingerprint, body, attempts, dead_at FROM {}
                 ORDER BY dead_at DESC, id DESC LIMIT ?1",
                tables.dead
            ))?;
            let rows: Vec<(String, String, String, String, i64, i64)> = stmt
                .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<Result<_, _>>()?;

            rows.into_iter()
                .map(|(id, queue_name, fp, body, attempts, dead_at)| {
                    let fingerprint = Fingerprint::from_stored(fp);
                    let id = DeadLetterId::parse(&id).map_err(|e| StoreError::Corrupt {
                        fingerprint: fingerprint.clone(),
                        reason: format!("dead letter id: {e}"),
                    })?;
                    let envelope = decode(&fingerprint, &body)?;
                    Ok(DeadLetter {
                        id,
                        queue_name,
                        fingerprint,
                        envelope,
                        attempts: attempts.max(0) as u32,
                        dead_at: from_millis(dead_at),
                    })
                })
                .collect()
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.run(move |conn, tables| {
            let tx = immediate(conn)?;
            tx.execute(&format!("DELETE FROM {}", tables.queue), [])?;
            tx.execute(&format!("DELETE FROM {}", tables.unacked), [])?;
            tx.execute(&format!("DELETE FROM {}", tables.messages), [])?;
            tx.execute(
                &format!("DELETE FROM {} WHERE queue_name = ?1", tables.dead),
                params![tables.queue_name],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

impl SqliteStore {
    /// Claim token of a marked but not yet leased queued copy, if any.
    #[cfg(test)]
    fn claim_marker(&self, fingerprint: &Fingerprint) -> Option<String> {
        use rusqlite::OptionalExtension;

        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .query_row(
                &format!("SELECT locked FROM {} WHERE fingerprint = ?1", self.tables.queue),
                params![fingerprint.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .ok()
            .flatten()
            .filter(|locked| locked != UNLOCKED)
    }

    #[cfg(test)]
    fn mark_claimed(&self, fingerprint: &Fingerprint, token: &str, at: DateTime<Utc>) {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .execute(
                &format!(
                    "UPDATE {} SET locked = ?2, locked_at = ?3 WHERE fingerprint = ?1",
                    self.tables.queue
                ),
                params![fingerprint.as_str(), token, millis(at)],
            )
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageKind, PollerId};
    use crate::error::ConfigError;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn entry(n: u64, deliver_after: DateTime<Utc>) -> NewEntry {
        let envelope = Envelope::new(MessageKind::new("test.v1"), json!({ "n": n }));
        NewEntry {
            entry_id: EntryId::from_ulid(Ulid::new()),
            fingerprint: envelope.fingerprint(),
            envelope,
            deliver_after,
        }
    }

    fn claim(now: DateTime<Utc>, n: usize) -> ClaimRequest {
        ClaimRequest {
            now,
            poller: PollerId::from_ulid(Ulid::new()),
            lease_ids: (0..n).map(|_| LeaseId::from_ulid(Ulid::new())).collect(),
            ack_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn creates_tables_per_namespace() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let other = store
            .share(QueueNamespace {
                queue_name: "other".into(),
                ..QueueNamespace::default()
            })
            .unwrap();

        store.insert(entry(1, at(0))).await.unwrap();

        assert_eq!(store.counts(at(0)).await.unwrap().depth, 1);
        assert_eq!(other.counts(at(0)).await.unwrap().depth, 0);
    }

    #[test]
    fn malformed_namespace_never_reaches_the_database() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let namespace = QueueNamespace {
            queue_name: "x (a TEXT); CREATE TABLE pwned (b TEXT); CREATE TABLE y".into(),
            ..QueueNamespace::default()
        };

        let result = SqliteStore::with_connection(Arc::clone(&conn), namespace);

        assert!(matches!(result, Err(StoreError::Namespace(_))));
        let tables: i64 = conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn zero_schema_version_is_rejected_on_open() {
        let namespace = QueueNamespace {
            schema_version: 0,
            ..QueueNamespace::default()
        };
        assert!(matches!(
            SqliteStore::open_in_memory(namespace),
            Err(StoreError::Namespace(ConfigError::ZeroSchemaVersion))
        ));
    }

    #[tokio::test]
    async fn claim_moves_rows_into_unacked() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let e = entry(1, at(0));
        let fp = e.fingerprint.clone();
        store.insert(e).await.unwrap();

        let claimed = store.claim_ready(claim(at(1), 5)).await.unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].expires_at, at(61));
        assert_eq!(store.states(&fp).await.unwrap(), vec![MessageState::Leased]);
        assert_eq!(store.claim_marker(&fp), None);
    }

    #[tokio::test]
    async fn claimed_rows_of_another_poller_are_skipped() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let e = entry(1, at(0));
        let fp = e.fingerprint.clone();
        store.insert(e).await.unwrap();
        store.mark_claimed(&fp, "someone-else", at(0));

        assert!(store.claim_ready(claim(at(1), 5)).await.unwrap().is_empty());
        assert_eq!(store.claim_marker(&fp).as_deref(), Some("someone-else"));
    }

    #[tokio::test]
    async fn retried_claim_leases_rows_it_marked_before() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let e = entry(1, at(0));
        let fp = e.fingerprint.clone();
        store.insert(e).await.unwrap();
        let request = claim(at(1), 5);
        // first try got as far as marking
        store.mark_claimed(&fp, &request.lease_ids[0].to_key(), at(1));

        let claimed = store.claim_ready(request).await.unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(store.states(&fp).await.unwrap(), vec![MessageState::Leased]);
        assert_eq!(store.claim_marker(&fp), None);
    }

    #[tokio::test]
    async fn failed_lease_phase_clears_its_marks() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let e = entry(1, at(0));
        let fp = e.fingerprint.clone();
        store.insert(e).await.unwrap();
        {
            let guard = store.conn.lock().unwrap();
            guard
                .execute(&format!("DROP TABLE {}", store.tables.messages), [])
                .unwrap();
        }

        assert!(store.claim_ready(claim(at(1), 5)).await.is_err());

        assert_eq!(store.claim_marker(&fp), None);
        assert_eq!(store.states(&fp).await.unwrap(), vec![MessageState::Queued]);
    }

    #[tokio::test]
    async fn stale_claims_are_released_after_lock_ttl() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let e = entry(1, at(0));
        let fp = e.fingerprint.clone();
        store.insert(e).await.unwrap();
        store.mark_claimed(&fp, "crashed-poller", at(0));

        let ttl = Duration::from_secs(20);
        assert_eq!(store.release_stale_claims(at(10), ttl).await.unwrap(), 0);
        assert_eq!(store.release_stale_claims(at(20), ttl).await.unwrap(), 1);
        assert_eq!(store.claim_marker(&fp), None);

        let claimed = store.claim_ready(claim(at(20), 1)).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_body_is_dropped_on_claim() {
        let store = SqliteStore::open_in_memory(QueueNamespace::default()).unwrap();
        let good = entry(1, at(0));
        let bad = entry(2, at(0));
        let bad_fp = bad.fingerprint.clone();
        store.insert(good).await.unwrap();
        store.insert(bad).await.unwrap();
        {
            let guard = store.conn.lock().unwrap();
            guard
                .execute(
                    &format!("UPDATE {} SET body = 'not json' WHERE fingerprint = ?1", store.tables.messages),
                    params![bad_fp.as_str()],
                )
                .unwrap();
        }

        let claimed = store.claim_ready(claim(at(1), 5)).await.unwrap();

        assert_eq!(claimed.len(), 1);
        assert!(store.states(&bad_fp).await.unwrap().is_empty());
        assert_eq!(store.counts(at(1)).await.unwrap().orphaned, 0);
    }

    #[tokio::test]
    async fn two_connections_to_one_file_never_share_a_claim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hopper.db");
        let a = SqliteStore::open(&path, QueueNamespace::default()).unwrap();
        let b = SqliteStore::open(&path, QueueNamespace::default()).unwrap();

        for n in 0..20 {
            a.insert(entry(n, at(0))).await.unwrap();
        }

        let (left, right) = tokio::join!(
            a.claim_ready(claim(at(1), 15)),
            b.claim_ready(claim(at(1), 15)),
        );
        let mut fingerprints: Vec<Fingerprint> = left
            .unwrap()
            .into_iter()
            .chain(right.unwrap())
            .map(|m| m.fingerprint)
            .collect();
        let total = fingerprints.len();
        fingerprints.sort();
        fingerprints.dedup();

        assert_eq!(total, 20);
        assert_eq!(fingerprints.len(), 20);
    }

    #[tokio::test]
    async fn dead_letters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hopper.db");
        let e = entry(1, at(0));
        let fp = e.fingerprint.clone();
        {
            let store = SqliteStore::open(&path, QueueNamespace::default()).unwrap();
            store.insert(e).await.unwrap();
            let claimed = store.claim_ready(claim(at(0), 1)).await.unwrap();
            let lease = ExpiredLease {
                lease_id: claimed[0].lease_id,
                fingerprint: fp.clone(),
                envelope: claimed[0].envelope.clone(),
                attempts: 5,
                expired_at: claimed[0].expires_at,
            };
            let letter = DeadLetter {
                id: DeadLetterId::from_ulid(Ulid::new()),
                queue_name: "default".into(),
                fingerprint: fp.clone(),
                envelope: lease.envelope.clone(),
                attempts: 6,
                dead_at: at(120),
            };
            assert!(store.remove_and_dead_letter(&lease, letter).await.unwrap());
            assert!(!store.remove_and_dead_letter(&lease, store_letter(&fp)).await.unwrap());
        }

        let store = SqliteStore::open(&path, QueueNamespace::default()).unwrap();
        let letters = store.dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 6);
        assert_eq!(letters[0].dead_at, at(120));
        assert_eq!(store.states(&fp).await.unwrap(), vec![MessageState::DeadLettered]);
    }

    fn store_letter(fp: &Fingerprint) -> DeadLetter {
        DeadLetter {
            id: DeadLetterId::from_ulid(Ulid::new()),
            queue_name: "default".into(),
            fingerprint: fp.clone(),
            envelope: Envelope::new(MessageKind::new("test.v1"), json!({})),
            attempts: 6,
            dead_at: at(121),
        }
    }
}
