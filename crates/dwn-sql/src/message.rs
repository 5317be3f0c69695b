use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::debug;

use dwn_types::{
    decode_message, encode_message, ContentId, Filter, GenericMessage, KeyValues, MessageQueryResult,
    MessageSort, MessageStore, OpContext, Pagination, StoreError, StoreResult,
};

use crate::columns::{column, encode_row, filters_condition};
use crate::database::{backend, SqlDatabase};

/// [`MessageStore`] over the `message_store` table.
///
/// Pagination is offset based: the cursor is the decimal row offset of the
/// next page.
#[derive(Clone, Debug)]
pub struct MessageStoreSql {
    db: SqlDatabase,
}

impl MessageStoreSql {
    pub fn new(db: SqlDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &SqlDatabase {
        &self.db
    }
}

fn decode_offset(cursor: Option<&str>) -> StoreResult<usize> {
    match cursor {
        None => Ok(0),
        Some(token) => token
            .parse()
            .map_err(|e| StoreError::InvalidCursor(format!("{token}: {e}"))),
    }
}

impl MessageStore for MessageStoreSql {
    fn open(&self) -> StoreResult<()> {
        self.db.open()
    }

    fn close(&self) -> StoreResult<()> {
        self.db.close()
    }

    fn put(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message: &GenericMessage,
        indexes: &KeyValues,
    ) -> StoreResult<ContentId> {
        ctx.check()?;
        if indexes.is_empty() {
            return Err(StoreError::EmptyIndexSet);
        }
        let row = encode_row(indexes)?;
        let encoded = encode_message(message)?;

        let mut columns = vec!["tenant", "message_cid", "encoded_message_bytes", "encoded_data"];
        let mut values = vec![
            Value::Text(tenant.to_string()),
            Value::Text(encoded.cid.to_string()),
            Value::Blob(encoded.bytes.clone()),
            encoded.encoded_data.clone().map_or(Value::Null, Value::Text),
        ];
        for (col, value) in row {
            columns.push(col);
            values.push(Value::Text(value));
        }
        let sql = format!(
            "INSERT OR REPLACE INTO message_store ({}) VALUES ({})",
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        self.db.transaction(ctx, |tx| {
            tx.execute(&sql, params_from_iter(values.iter())).map_err(backend)?;
            Ok(())
        })?;
        debug!(tenant, cid = %encoded.cid, size = encoded.bytes.len(), "message stored");
        Ok(encoded.cid)
    }

    fn get(&self, ctx: &OpContext, tenant: &str, cid: &str) -> StoreResult<Option<GenericMessage>> {
        let cid = ContentId::parse(cid)?;
        let row: Option<(Vec<u8>, Option<String>)> = self.db.with_conn(ctx, |conn| {
            conn.query_row(
                "SELECT encoded_message_bytes, encoded_data FROM message_store \
                 WHERE tenant = ?1 AND message_cid = ?2",
                params![tenant, cid.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(backend)
        })?;
        row.map(|(bytes, data)| decode_message(&bytes, data.as_deref()))
            .transpose()
    }

    fn query(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&MessageSort>,
        pagination: Option<&Pagination>,
    ) -> StoreResult<MessageQueryResult> {
        dwn_types::validate_filters(filters)?;
        let sort = sort.copied().unwrap_or_default();
        let sort_column = column(sort.property.as_str())?;
        let direction = sort.direction.as_sql();
        let page_size = pagination.and_then(Pagination::page_size);
        let offset = decode_offset(pagination.and_then(|p| p.cursor.as_deref()))?;

        let mut sql = format!(
            "SELECT encoded_message_bytes, encoded_data FROM message_store \
             WHERE tenant = ? AND {sort_column} IS NOT NULL"
        );
        let mut params = vec![tenant.to_string()];
        if let Some(condition) = filters_condition(filters)? {
            sql.push_str(&format!(" AND ({})", condition.sql));
            params.extend(condition.params);
        }
        sql.push_str(&format!(" ORDER BY {sort_column} {direction}, message_cid {direction}"));
        match page_size {
            Some(size) => {
                // Sizes past SQLite's integer range mean no limit.
                let fetch = i64::try_from(size).map_or(-1, |s| s.saturating_add(1));
                sql.push_str(&format!(" LIMIT {fetch} OFFSET {offset}"));
            }
            None if offset > 0 => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            None => {}
        }

        let mut rows: Vec<(Vec<u8>, Option<String>)> = self.db.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(backend)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(backend)?;
            Ok(rows)
        })?;

        let mut cursor = None;
        if let Some(size) = page_size {
            if rows.len() > size {
                rows.truncate(size);
                cursor = Some((offset + size).to_string());
            }
        }
        let messages = rows
            .iter()
            .map(|(bytes, data)| decode_message(bytes, data.as_deref()))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(MessageQueryResult { messages, cursor })
    }

    fn delete(&self, ctx: &OpContext, tenant: &str, cid: &str) -> StoreResult<()> {
        let cid = ContentId::parse(cid)?;
        let removed = self.db.transaction(ctx, |tx| {
            tx.execute(
                "DELETE FROM message_store WHERE tenant = ?1 AND message_cid = ?2",
                params![tenant, cid.to_string()],
            )
            .map_err(backend)
        })?;
        debug!(tenant, cid = %cid, removed, "message deleted");
        Ok(())
    }

    fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        self.db.transaction(ctx, |tx| {
            tx.execute("DELETE FROM message_store", []).map_err(backend)?;
            Ok(())
        })?;
        debug!("message store cleared");
        Ok(())
    }
}
