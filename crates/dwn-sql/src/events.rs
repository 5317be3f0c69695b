use rusqlite::{params, OptionalExtension};
use tracing::debug;

use dwn_types::{
    matches_any, validate_filters, EventLog, Filter, KeyValues, OpContext, StoreError, StoreResult,
};

use crate::database::{backend, SqlDatabase};

/// [`EventLog`] over the `event_logs` table.
///
/// The autoincrement `watermark` column orders events. Filters are evaluated
/// on the stored `metadata` so any property can be queried, not only the
/// `message_store` columns.
#[derive(Clone, Debug)]
pub struct EventLogSql {
    db: SqlDatabase,
}

impl EventLogSql {
    pub fn new(db: SqlDatabase) -> Self {
        Self { db }
    }
}

fn text_property(indexes: &KeyValues, name: &str) -> Option<String> {
    indexes.get(name).and_then(|v| v.as_str()).map(str::to_string)
}

fn event_type(indexes: &KeyValues) -> Option<String> {
    match (text_property(indexes, "interface"), text_property(indexes, "method")) {
        (Some(interface), Some(method)) => Some(format!("{interface}{method}")),
        (interface, method) => interface.or(method),
    }
}

impl EventLog for EventLogSql {
    fn open(&self) -> StoreResult<()> {
        self.db.open()
    }

    fn close(&self) -> StoreResult<()> {
        self.db.close()
    }

    fn append(&self, ctx: &OpContext, tenant: &str, message_cid: &str, indexes: &KeyValues) -> StoreResult<()> {
        let metadata = serde_json::to_string(indexes).map_err(StoreError::serialization)?;
        self.db.transaction(ctx, |tx| {
            tx.execute(
                "DELETE FROM event_logs WHERE tenant = ?1 AND message_cid = ?2",
                params![tenant, message_cid],
            )
            .map_err(backend)?;
            tx.execute(
                "INSERT INTO event_logs (tenant, event_type, message_cid, data_cid, metadata, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tenant,
                    event_type(indexes),
                    message_cid,
                    text_property(indexes, "dataCid"),
                    metadata,
                    text_property(indexes, "messageTimestamp"),
                ],
            )
            .map_err(backend)?;
            Ok(())
        })?;
        debug!(tenant, message_cid, "event appended");
        Ok(())
    }

    fn query_events(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        cursor: Option<&str>,
    ) -> StoreResult<Vec<String>> {
        validate_filters(filters)?;
        let rows: Vec<(String, String)> = self.db.with_conn(ctx, |conn| {
            let after: i64 = match cursor {
                None => 0,
                Some(message_cid) => conn
                    .query_row(
                        "SELECT watermark FROM event_logs WHERE tenant = ?1 AND message_cid = ?2",
                        params![tenant, message_cid],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(backend)?
                    .ok_or_else(|| StoreError::InvalidCursor(format!("no event for {message_cid}")))?,
            };
            let mut stmt = conn
                .prepare(
                    "SELECT message_cid, metadata FROM event_logs \
                     WHERE tenant = ?1 AND watermark > ?2 ORDER BY watermark ASC",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![tenant, after], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(backend)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(backend)?;
            Ok(rows)
        })?;

        let mut events = Vec::with_capacity(rows.len());
        for (message_cid, metadata) in rows {
            let indexes: KeyValues = serde_json::from_str(&metadata).map_err(StoreError::serialization)?;
            if matches_any(filters, &indexes) {
                events.push(message_cid);
            }
        }
        Ok(events)
    }

    fn delete_events_by_cid(&self, ctx: &OpContext, tenant: &str, message_cids: &[String]) -> StoreResult<()> {
        self.db.transaction(ctx, |tx| {
            for message_cid in message_cids {
                tx.execute(
                    "DELETE FROM event_logs WHERE tenant = ?1 AND message_cid = ?2",
                    params![tenant, message_cid],
                )
                .map_err(backend)?;
            }
            Ok(())
        })?;
        debug!(tenant, count = message_cids.len(), "events deleted");
        Ok(())
    }

    fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        self.db.transaction(ctx, |tx| {
            tx.execute("DELETE FROM event_logs", []).map_err(backend)?;
            Ok(())
        })?;
        debug!("event log cleared");
        Ok(())
    }
}
