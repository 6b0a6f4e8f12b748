//! SQLite storage backend

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::blob::ZeroBlob;
use rusqlite::{Connection, MAIN_DB, OptionalExtension, Params, Row, params, params_from_iter};
use tracing::{debug, warn};

use crate::core::{
    ChannelId, Message, MessageId, PagingWindow, PreparedTransaction, RefState, ReferenceInfo,
    TransactionId, Xid, decode_headers, encode_headers,
};
use crate::error::{Result, StoreError};
use crate::storage::backend::{
    Backend, Isolation, ReferenceRow, Statement, StatementKind, StoreStats, StoreTx,
    TaggedReference,
};
use crate::storage::migrations;

const INSERT_REFERENCE: &str = "INSERT INTO mq_message_reference \
     (channel_id, message_id, transaction_id, state, ord, page_ord, delivery_count, reliable) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
const MARK_REFERENCE_REMOVING: &str = "UPDATE mq_message_reference \
     SET transaction_id = ?3, state = '-' \
     WHERE channel_id = ?1 AND message_id = ?2 AND state = 'C'";
const DELETE_REFERENCE: &str = "DELETE FROM mq_message_reference \
     WHERE channel_id = ?1 AND message_id = ?2 AND state = 'C'";
const UPDATE_PAGE_ORDER: &str = "UPDATE mq_message_reference SET page_ord = ?3 \
     WHERE channel_id = ?1 AND message_id = ?2";
const INSERT_MESSAGE: &str = "INSERT INTO mq_message \
     (message_id, reliable, expiration, timestamp, priority, headers, payload, channel_count) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
const UPDATE_MESSAGE_CHANNEL_COUNT: &str =
    "UPDATE mq_message SET channel_count = ?2 WHERE message_id = ?1";
const DELETE_MESSAGE: &str = "DELETE FROM mq_message WHERE message_id = ?1";
const NEXT_REF_ORD: &str = "UPDATE mq_sequence SET next_value = next_value + 1 \
     WHERE name = 'REF_ORD' RETURNING next_value";

/// Connection-level settings for [`SqliteBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteOptions {
    /// Move header and payload bytes through incremental BLOB I/O.
    pub binary_streams: bool,
    pub busy_timeout: Duration,
    /// Upper bound on bound parameters in one `IN (...)` list.
    pub max_batch_params: usize,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            binary_streams: true,
            busy_timeout: Duration::from_millis(5000),
            max_batch_params: 100,
        }
    }
}

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    options: SqliteOptions,
    schema_version: u32,
    isolation: Isolation,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("options", &self.options)
            .field("schema_version", &self.schema_version)
            .field("isolation", &self.isolation)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>, options: SqliteOptions) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened sqlite store");
        Self::from_connection(conn, options)
    }

    pub fn open_in_memory(options: SqliteOptions) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    fn from_connection(conn: Connection, options: SqliteOptions) -> Result<Self> {
        if options.max_batch_params == 0 {
            return Err(StoreError::InvalidArgument(
                "max_batch_params must be greater than 0".to_string(),
            ));
        }
        Self::configure_pragmas(&conn, &options)?;
        let schema_version = migrations::run_migrations(&conn)?;
        let isolation = Self::detect_isolation(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            options,
            schema_version,
            isolation,
        })
    }

    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub const fn options(&self) -> &SqliteOptions {
        &self.options
    }

    fn configure_pragmas(conn: &Connection, options: &SqliteOptions) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.busy_timeout(options.busy_timeout)?;
        Ok(())
    }

    fn detect_isolation(conn: &Connection) -> Result<Isolation> {
        let read_uncommitted: i64 =
            conn.query_row("PRAGMA read_uncommitted;", [], |row| row.get(0))?;
        Ok(if read_uncommitted == 0 {
            Isolation::Serializable
        } else {
            Isolation::ReadUncommitted
        })
    }
}

impl Backend for SqliteBackend {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTx {
            conn,
            options: self.options,
            finished: false,
        }))
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }
}

/// An open `BEGIN IMMEDIATE` transaction holding the connection.
struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    options: SqliteOptions,
    finished: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of abandoned store transaction failed");
            }
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value { "Y" } else { "N" }
}

fn parse_flag(value: &str) -> bool {
    value == "Y"
}

fn exec<P: Params>(conn: &Connection, cached: bool, sql: &str, params: P) -> Result<usize> {
    let rows = if cached {
        conn.prepare_cached(sql)?.execute(params)?
    } else {
        conn.prepare(sql)?.execute(params)?
    };
    Ok(rows)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn reference_info(row: &Row<'_>, offset: usize) -> rusqlite::Result<ReferenceInfo> {
    let reliable: String = row.get(offset + 2)?;
    Ok(ReferenceInfo {
        message_id: row.get(offset)?,
        delivery_count: row.get(offset + 1)?,
        reliable: parse_flag(&reliable),
    })
}

/// Message columns as read from a row, bytes not yet decoded.
struct MessageRow {
    message: Message,
    channel_count: u32,
    headers: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

impl SqliteTx<'_> {
    fn next_ord(&self, cached: bool) -> Result<i64> {
        let ord = if cached {
            self.conn
                .prepare_cached(NEXT_REF_ORD)?
                .query_row([], |row| row.get(0))?
        } else {
            self.conn.query_row(NEXT_REF_ORD, [], |row| row.get(0))?
        };
        Ok(ord)
    }

    fn insert_reference(&self, row: &ReferenceRow, cached: bool) -> Result<usize> {
        let ord = self.next_ord(cached)?;
        exec(
            &self.conn,
            cached,
            INSERT_REFERENCE,
            params![
                row.channel_id,
                row.message_id,
                row.transaction_id,
                row.state.as_code(),
                ord,
                row.page_ord,
                row.delivery_count,
                flag(row.reliable),
            ],
        )
    }

    fn insert_message(&self, message: &Message, channel_count: u32, cached: bool) -> Result<usize> {
        let headers = encode_headers(&message.headers)?;
        let payload = message.payload.as_deref();

        if !self.options.binary_streams {
            return exec(
                &self.conn,
                cached,
                INSERT_MESSAGE,
                params![
                    message.id,
                    flag(message.reliable),
                    message.expiration,
                    message.timestamp,
                    message.priority,
                    headers,
                    payload,
                    channel_count,
                ],
            );
        }

        let rows = exec(
            &self.conn,
            cached,
            INSERT_MESSAGE,
            params![
                message.id,
                flag(message.reliable),
                message.expiration,
                message.timestamp,
                message.priority,
                headers.as_deref().map(zero_blob).transpose()?,
                payload.map(zero_blob).transpose()?,
                channel_count,
            ],
        )?;
        if let Some(bytes) = headers.as_deref() {
            self.write_blob("headers", message.id, bytes)?;
        }
        if let Some(bytes) = payload {
            self.write_blob("payload", message.id, bytes)?;
        }
        Ok(rows)
    }

    fn write_blob(&self, column: &str, message_id: MessageId, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut blob =
            self.conn
                .blob_open(MAIN_DB, "mq_message", column, message_id, false)?;
        blob.write_all(bytes)?;
        Ok(())
    }

    fn read_blob(&self, column: &str, message_id: MessageId, len: Option<i64>) -> Result<Option<Vec<u8>>> {
        let Some(len) = len else {
            return Ok(None);
        };
        if len == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut blob =
            self.conn
                .blob_open(MAIN_DB, "mq_message", column, message_id, true)?;
        let mut bytes = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
        blob.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn load_message_chunk(&self, ids: &[MessageId]) -> Result<Vec<MessageRow>> {
        let byte_columns = if self.options.binary_streams {
            "length(headers), length(payload)"
        } else {
            "headers, payload"
        };
        let sql = format!(
            "SELECT message_id, reliable, expiration, timestamp, priority, channel_count, {byte_columns} \
             FROM mq_message WHERE message_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(ids.iter()))?;

        let mut loaded = Vec::new();
        while let Some(row) = rows.next()? {
            let id: MessageId = row.get(0)?;
            let reliable: String = row.get(1)?;
            let message = Message {
                id,
                reliable: parse_flag(&reliable),
                expiration: row.get(2)?,
                timestamp: row.get(3)?,
                priority: row.get(4)?,
                headers: crate::core::Headers::new(),
                payload: None,
            };
            let channel_count: u32 = row.get(5)?;
            let (headers, payload) = if self.options.binary_streams {
                let headers_len: Option<i64> = row.get(6)?;
                let payload_len: Option<i64> = row.get(7)?;
                (
                    self.read_blob("headers", id, headers_len)?,
                    self.read_blob("payload", id, payload_len)?,
                )
            } else {
                (row.get(6)?, row.get(7)?)
            };
            loaded.push(MessageRow {
                message,
                channel_count,
                headers,
                payload,
            });
        }
        Ok(loaded)
    }

    fn run(&self, statement: &Statement, cached: bool) -> Result<usize> {
        match statement {
            Statement::InsertReference(row) => self.insert_reference(row, cached),
            Statement::MarkReferenceRemoving {
                channel_id,
                message_id,
                transaction_id,
            } => exec(
                &self.conn,
                cached,
                MARK_REFERENCE_REMOVING,
                params![channel_id, message_id, transaction_id],
            ),
            Statement::DeleteReference {
                channel_id,
                message_id,
            } => exec(
                &self.conn,
                cached,
                DELETE_REFERENCE,
                params![channel_id, message_id],
            ),
            Statement::UpdatePageOrder {
                channel_id,
                message_id,
                page_ord,
            } => exec(
                &self.conn,
                cached,
                UPDATE_PAGE_ORDER,
                params![channel_id, message_id, page_ord],
            ),
            Statement::InsertMessage {
                message,
                channel_count,
            } => self.insert_message(message.message(), *channel_count, cached),
            Statement::UpdateMessageChannelCount {
                message_id,
                channel_count,
            } => exec(
                &self.conn,
                cached,
                UPDATE_MESSAGE_CHANNEL_COUNT,
                params![message_id, channel_count],
            ),
            Statement::DeleteMessage { message_id } => {
                exec(&self.conn, cached, DELETE_MESSAGE, params![message_id])
            }
        }
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn zero_blob(bytes: &[u8]) -> Result<ZeroBlob> {
    let len = i32::try_from(bytes.len()).map_err(|_| {
        StoreError::InvalidArgument(format!("blob of {} bytes is too large", bytes.len()))
    })?;
    Ok(ZeroBlob(len))
}

impl StoreTx for SqliteTx<'_> {
    fn execute(&self, statement: &Statement) -> Result<usize> {
        self.run(statement, false)
    }

    fn execute_batch(&self, kind: StatementKind, statements: &[Statement]) -> Result<usize> {
        let mut total = 0;
        for statement in statements {
            if statement.kind() != kind {
                return Err(StoreError::InvalidArgument(format!(
                    "{} statement in a {} batch",
                    statement.kind().name(),
                    kind.name()
                )));
            }
            total += self.run(statement, true)?;
        }
        Ok(total)
    }

    fn commit_pending_adds(&self, transaction_id: TransactionId) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE mq_message_reference SET state = 'C', transaction_id = NULL \
             WHERE transaction_id = ?1 AND state = '+'",
            [transaction_id],
        )?)
    }

    fn delete_pending_removes(&self, transaction_id: TransactionId) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM mq_message_reference WHERE transaction_id = ?1 AND state = '-'",
            [transaction_id],
        )?)
    }

    fn delete_pending_adds(&self, transaction_id: TransactionId) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM mq_message_reference WHERE transaction_id = ?1 AND state = '+'",
            [transaction_id],
        )?)
    }

    fn restore_pending_removes(&self, transaction_id: TransactionId) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE mq_message_reference SET state = 'C', transaction_id = NULL \
             WHERE transaction_id = ?1 AND state = '-'",
            [transaction_id],
        )?)
    }

    fn load_transaction_references(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<TaggedReference>> {
        let mut stmt = self.conn.prepare(
            "SELECT channel_id, message_id, state, page_ord, delivery_count, reliable \
             FROM mq_message_reference WHERE transaction_id = ?1 \
             ORDER BY message_id, channel_id",
        )?;
        let rows = stmt.query_map([transaction_id], |row| {
            Ok((
                row.get::<_, ChannelId>(0)?,
                row.get::<_, MessageId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, i32>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut tagged = Vec::new();
        for row in rows {
            let (channel_id, message_id, state, page_ord, delivery_count, reliable) = row?;
            tagged.push(TaggedReference {
                channel_id,
                message_id,
                state: RefState::from_code(&state)?,
                page_ord,
                delivery_count,
                reliable: parse_flag(&reliable),
            });
        }
        Ok(tagged)
    }

    fn insert_transaction(&self, transaction_id: TransactionId, xid: &Xid) -> Result<usize> {
        Ok(self.conn.execute(
            "INSERT INTO mq_transaction (transaction_id, branch_qual, format_id, global_txid) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                transaction_id,
                xid.branch_qualifier,
                xid.format_id,
                xid.global_transaction_id
            ],
        )?)
    }

    fn delete_transaction(&self, transaction_id: TransactionId) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM mq_transaction WHERE transaction_id = ?1",
            [transaction_id],
        )?)
    }

    fn select_prepared_transactions(&self) -> Result<Vec<PreparedTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, branch_qual, format_id, global_txid \
             FROM mq_transaction ORDER BY transaction_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PreparedTransaction {
                transaction_id: row.get(0)?,
                xid: Xid {
                    branch_qualifier: row.get(1)?,
                    format_id: row.get(2)?,
                    global_transaction_id: row.get(3)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn page_order_bounds(&self, channel_id: ChannelId) -> Result<Option<PagingWindow>> {
        let (min, max): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT MIN(page_ord), MAX(page_ord) FROM mq_message_reference WHERE channel_id = ?1",
            [channel_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max).map(|(min, max)| PagingWindow { min, max }))
    }

    fn load_unpaged_references(&self, channel_id: ChannelId) -> Result<Vec<ReferenceInfo>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT message_id, delivery_count, reliable FROM mq_message_reference \
             WHERE channel_id = ?1 AND page_ord IS NULL AND state <> '+' ORDER BY ord",
        )?;
        let rows = stmt.query_map([channel_id], |row| reference_info(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn load_paged_references(
        &self,
        channel_id: ChannelId,
        first: i64,
        last: i64,
    ) -> Result<Vec<(i64, ReferenceInfo)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT page_ord, message_id, delivery_count, reliable FROM mq_message_reference \
             WHERE channel_id = ?1 AND page_ord BETWEEN ?2 AND ?3 ORDER BY page_ord",
        )?;
        let rows = stmt.query_map(params![channel_id, first, last], |row| {
            Ok((row.get(0)?, reference_info(row, 1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn clear_page_order_range(&self, channel_id: ChannelId, first: i64, last: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE mq_message_reference SET page_ord = NULL \
             WHERE channel_id = ?1 AND page_ord BETWEEN ?2 AND ?3",
            params![channel_id, first, last],
        )?)
    }

    fn shift_page_order(&self, channel_id: ChannelId, by: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE mq_message_reference SET page_ord = page_ord + ?2 \
             WHERE channel_id = ?1 AND page_ord IS NOT NULL",
            params![channel_id, by],
        )?)
    }

    fn load_messages(&self, ids: &[MessageId]) -> Result<Vec<(Message, u32)>> {
        let mut messages = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.options.max_batch_params) {
            for row in self.load_message_chunk(chunk)? {
                let mut message = row.message;
                message.headers = decode_headers(row.headers.as_deref())?;
                message.payload = row.payload;
                messages.push((message, row.channel_count));
            }
        }
        Ok(messages)
    }

    fn select_counter(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT next_id FROM mq_counter WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn insert_counter(&self, name: &str, next_id: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "INSERT INTO mq_counter (name, next_id) VALUES (?1, ?2)",
            params![name, next_id],
        )?)
    }

    fn update_counter(&self, name: &str, next_id: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE mq_counter SET next_id = ?2 WHERE name = ?1",
            params![name, next_id],
        )?)
    }

    fn select_unreliable_channels(&self) -> Result<Vec<ChannelId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT channel_id FROM mq_message_reference \
             WHERE reliable = 'N' ORDER BY channel_id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn decrement_unreliable_channel_counts(&self, channel_id: ChannelId) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE mq_message SET channel_count = channel_count - 1 \
             WHERE message_id IN (SELECT message_id FROM mq_message_reference \
                                  WHERE channel_id = ?1 AND reliable = 'N')",
            [channel_id],
        )?)
    }

    fn delete_unreliable_references(&self) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM mq_message_reference WHERE reliable = 'N'", [])?)
    }

    fn delete_unreferenced_messages(&self) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM mq_message WHERE channel_count <= 0", [])?)
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            messages: self.count("SELECT count(*) FROM mq_message")?,
            references: self.count("SELECT count(*) FROM mq_message_reference")?,
            pending_adds: self
                .count("SELECT count(*) FROM mq_message_reference WHERE state = '+'")?,
            pending_removes: self
                .count("SELECT count(*) FROM mq_message_reference WHERE state = '-'")?,
            paged_references: self
                .count("SELECT count(*) FROM mq_message_reference WHERE page_ord IS NOT NULL")?,
            prepared_transactions: self.count("SELECT count(*) FROM mq_transaction")?,
            counters: self.count("SELECT count(*) FROM mq_counter")?,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}
