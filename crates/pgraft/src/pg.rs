//! PostgreSQL backend: [`GraphStore`] over a `tokio_postgres` client.

use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use crate::error::{GraftError, GraftResult};
use crate::store::{GraphStore, GraphTransaction};
use crate::value::Value;

impl GraphStore for tokio_postgres::Client {
    type Tx<'a> = PgTransaction<'a>;

    async fn begin(&mut self) -> GraftResult<PgTransaction<'_>> {
        let tx = self
            .transaction()
            .await
            .map_err(GraftError::from_db_error)?;
        Ok(PgTransaction { tx })
    }
}

/// A live database transaction holding every write of one graph insertion.
pub struct PgTransaction<'a> {
    tx: tokio_postgres::Transaction<'a>,
}

impl GraphTransaction for PgTransaction<'_> {
    async fn insert_returning(
        &mut self,
        table: &str,
        key_column: Option<&str>,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> GraftResult<Vec<Value>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // Rows with no values at all cannot share a multi-row VALUES list.
        if columns.is_empty() {
            let sql = default_values_sql(table, key_column);
            let mut keys = Vec::new();
            for _ in 0..rows.len() {
                tracing::trace!(%sql, "executing insert");
                if key_column.is_some() {
                    let row = self
                        .tx
                        .query_one(&sql, &[])
                        .await
                        .map_err(GraftError::from_db_error)?;
                    keys.push(key_from_row(&row)?);
                } else {
                    self.tx
                        .execute(&sql, &[])
                        .await
                        .map_err(GraftError::from_db_error)?;
                }
            }
            return Ok(keys);
        }

        let sql = build_insert_sql(table, key_column, columns, rows.len());
        let params: Vec<&(dyn ToSql + Sync)> = rows
            .iter()
            .flat_map(|row| row.iter().map(|v| v as &(dyn ToSql + Sync)))
            .collect();
        tracing::trace!(%sql, params = params.len(), "executing insert");

        if key_column.is_some() {
            let fetched = self
                .tx
                .query(&sql, &params)
                .await
                .map_err(GraftError::from_db_error)?;
            let mut keys = Vec::with_capacity(fetched.len());
            for row in &fetched {
                keys.push(key_from_row(row)?);
            }
            Ok(keys)
        } else {
            self.tx
                .execute(&sql, &params)
                .await
                .map_err(GraftError::from_db_error)?;
            Ok(Vec::new())
        }
    }

    async fn update_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &Value,
        columns: &[String],
        values: Vec<Value>,
    ) -> GraftResult<()> {
        let sql = build_update_sql(table, key_column, columns);
        tracing::trace!(%sql, "executing update");
        let mut params: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect();
        params.push(key as &(dyn ToSql + Sync));

        let affected = self
            .tx
            .execute(&sql, &params)
            .await
            .map_err(GraftError::from_db_error)?;
        if affected == 0 {
            return Err(GraftError::storage(format!(
                "no row in '{table}' with {key_column} = {key}"
            )));
        }
        Ok(())
    }

    async fn commit(self) -> GraftResult<()> {
        self.tx.commit().await.map_err(GraftError::from_db_error)
    }

    async fn rollback(self) -> GraftResult<()> {
        self.tx.rollback().await.map_err(GraftError::from_db_error)
    }
}

pub(crate) fn build_insert_sql(
    table: &str,
    key_column: Option<&str>,
    columns: &[String],
    row_count: usize,
) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut placeholder = 1usize;
    let mut groups = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let row = (0..columns.len())
            .map(|_| {
                let p = format!("${placeholder}");
                placeholder += 1;
                p
            })
            .collect::<Vec<_>>()
            .join(", ");
        groups.push(format!("({row})"));
    }

    let mut sql = format!(
        "INSERT INTO {} ({cols}) VALUES {}",
        quote_ident(table),
        groups.join(", ")
    );
    if let Some(key) = key_column {
        sql.push_str(" RETURNING ");
        sql.push_str(&quote_ident(key));
    }
    sql
}

fn default_values_sql(table: &str, key_column: Option<&str>) -> String {
    let mut sql = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    if let Some(key) = key_column {
        sql.push_str(" RETURNING ");
        sql.push_str(&quote_ident(key));
    }
    sql
}

pub(crate) fn build_update_sql(table: &str, key_column: &str, columns: &[String]) -> String {
    let sets = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {sets} WHERE {} = ${}",
        quote_ident(table),
        quote_ident(key_column),
        columns.len() + 1
    )
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Decode the single returned key column of one row.
fn key_from_row(row: &tokio_postgres::Row) -> GraftResult<Value> {
    let ty = row.columns()[0].type_().clone();
    let value = if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(0)?.map(|v| Value::Int(v as i64))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(0)?.map(|v| Value::Int(v as i64))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(0)?.map(Value::Int)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(0)?.map(|v| Value::Float(v as f64))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(0)?.map(Value::Float)
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR {
        row.try_get::<_, Option<String>>(0)?.map(Value::Text)
    } else if ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(0)?.map(Value::Uuid)
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(0)?
            .map(Value::Timestamp)
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(0)?
            .map(|v| Value::Timestamp(v.and_utc()))
    } else if ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(0)?.map(Value::Date)
    } else if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(0)?.map(Value::Bool)
    } else if ty == Type::JSON || ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(0)?.map(Value::Json)
    } else {
        return Err(GraftError::storage(format!(
            "unsupported key column type '{ty}'"
        )));
    };
    Ok(value.unwrap_or(Value::Null))
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            // Text aimed at a typed column converts here, mirroring what
            // validation accepted.
            Value::Text(s) => {
                if *ty == Type::UUID {
                    uuid::Uuid::parse_str(s)?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    chrono::DateTime::parse_from_rfc3339(s)?
                        .with_timezone(&chrono::Utc)
                        .to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    chrono::DateTime::parse_from_rfc3339(s)?
                        .naive_utc()
                        .to_sql(ty, out)
                } else if *ty == Type::DATE {
                    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    serde_json::Value::String(s.clone()).to_sql(ty, out)
                } else {
                    s.to_sql(ty, out)
                }
            }
            Value::Uuid(u) => u.to_sql(ty, out),
            Value::Timestamp(t) => {
                if *ty == Type::TIMESTAMP {
                    t.naive_utc().to_sql(ty, out)
                } else {
                    t.to_sql(ty, out)
                }
            }
            Value::Date(d) => d.to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_sql_numbers_rows_in_row_major_order() {
        let sql = build_insert_sql(
            "person",
            Some("id"),
            &["name".to_string(), "age".to_string()],
            2,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"person\" (\"name\", \"age\") \
             VALUES ($1, $2), ($3, $4) RETURNING \"id\""
        );
    }

    #[test]
    fn insert_sql_without_key_returns_nothing() {
        let sql = build_insert_sql(
            "person_movie",
            None,
            &["person_id".to_string(), "movie_id".to_string()],
            1,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"person_movie\" (\"person_id\", \"movie_id\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn update_sql_keys_on_the_last_placeholder() {
        let sql = build_update_sql("animal", "id", &["owner_id".to_string()]);
        assert_eq!(
            sql,
            "UPDATE \"animal\" SET \"owner_id\" = $1 WHERE \"id\" = $2"
        );
    }

    #[test]
    fn int_binding_rejects_out_of_range_values() {
        let mut out = BytesMut::new();
        assert!(Value::Int(123).to_sql(&Type::INT2, &mut out).is_ok());
        assert!(Value::Int(70_000).to_sql(&Type::INT2, &mut out).is_err());
        assert!(Value::Int(70_000).to_sql(&Type::INT4, &mut out).is_ok());
        assert!(Value::Int(i64::from(i32::MAX) + 1)
            .to_sql(&Type::INT4, &mut out)
            .is_err());
        assert!(Value::Int(i64::MAX).to_sql(&Type::INT8, &mut out).is_ok());
    }

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
