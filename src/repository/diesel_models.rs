//! Diesel ORM models for the aggregate store tables.
//!
//! The three dimension tables share one shape, so [`DimensionRecord`] is a
//! plain `Queryable` usable against any of them.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};

use crate::models::{DimensionValue, RankedCount};
use crate::schema;

/// Row of `addresses`, `agents` or `paths`.
#[derive(Queryable, Debug, Clone)]
pub struct DimensionRecord {
    pub id: i32,
    pub value: String,
    pub first_seen: String,
}

impl From<DimensionRecord> for DimensionValue {
    fn from(record: DimensionRecord) -> Self {
        DimensionValue {
            id: record.id,
            value: record.value,
            first_seen: record.first_seen,
        }
    }
}

/// Daily aggregate record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::daily_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailyLogRecord {
    pub date: String,
    pub address_id: i32,
    pub agent_id: i32,
    pub path_id: i32,
    pub status: i32,
    pub count: i64,
    pub last_updated: String,
}

/// New daily aggregate for insertion (count starts at 1).
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::daily_logs)]
pub struct NewDailyLog<'a> {
    pub date: &'a str,
    pub address_id: i32,
    pub agent_id: i32,
    pub path_id: i32,
    pub status: i32,
    pub count: i64,
    pub last_updated: &'a str,
}

/// Persistent counter record.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::kv_store)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct KvRecord {
    pub key: String,
    pub value: i64,
    pub updated_at: String,
}

/// Result row of the grouped `(label, total)` report queries.
#[derive(QueryableByName, Debug)]
pub struct LabelTotal {
    #[diesel(sql_type = Text)]
    pub label: String,
    #[diesel(sql_type = BigInt)]
    pub total: i64,
}

impl From<LabelTotal> for RankedCount {
    fn from(row: LabelTotal) -> Self {
        RankedCount::new(row.label, row.total)
    }
}

/// Result row of the window summary query.
#[derive(QueryableByName, Debug)]
pub struct SummaryRow {
    #[diesel(sql_type = BigInt)]
    pub hits: i64,
    #[diesel(sql_type = BigInt)]
    pub addresses: i64,
    #[diesel(sql_type = BigInt)]
    pub agents: i64,
    #[diesel(sql_type = BigInt)]
    pub paths: i64,
}
