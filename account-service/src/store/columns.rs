//! Column layout of each entity table.
//!
//! Every table starts with the record header columns (`id`, `public_id`,
//! `created_at`, `updated_at`); `COLUMNS` lists the rest in bind order.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::QueryAs;
use sqlx::{FromRow, Postgres};

use crate::models::{
    Account, EmailChangeTicket, Entity, Provider, ResetPasswordTicket, Session, VerificationTicket,
};

pub type PgQueryAs<'q, E> = QueryAs<'q, Postgres, E, PgArguments>;

pub trait PgRecord: Entity + for<'r> FromRow<'r, PgRow> + Unpin {
    const COLUMNS: &'static [&'static str];

    /// Bind `COLUMNS` in order.
    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self>;
}

impl PgRecord for Account {
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "username",
        "email",
        "avatar",
        "password_hash",
        "email_verified",
        "suspended",
    ];

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.name)
            .bind(&self.username)
            .bind(&self.email)
            .bind(&self.avatar)
            .bind(&self.password_hash)
            .bind(self.email_verified)
            .bind(self.suspended)
    }
}

impl PgRecord for Session {
    const COLUMNS: &'static [&'static str] = &[
        "account_id",
        "device_id",
        "device_type",
        "user_agent",
        "refresh_token_hash",
        "expires_at",
        "revoked",
        "last_active_at",
    ];

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.account_id)
            .bind(&self.device_id)
            .bind(&self.device_type)
            .bind(&self.user_agent)
            .bind(&self.refresh_token_hash)
            .bind(self.expires_at)
            .bind(self.revoked)
            .bind(self.last_active_at)
    }
}

impl PgRecord for VerificationTicket {
    const COLUMNS: &'static [&'static str] = &["account_id", "code_hash", "expires_at"];

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.account_id)
            .bind(&self.code_hash)
            .bind(self.expires_at)
    }
}

impl PgRecord for ResetPasswordTicket {
    const COLUMNS: &'static [&'static str] = &["account_id", "token_hash", "expires_at"];

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.account_id)
            .bind(&self.token_hash)
            .bind(self.expires_at)
    }
}

impl PgRecord for EmailChangeTicket {
    const COLUMNS: &'static [&'static str] = &[
        "account_id",
        "new_email",
        "token_hash",
        "expires_at",
        "processed",
    ];

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.account_id)
            .bind(&self.new_email)
            .bind(&self.token_hash)
            .bind(self.expires_at)
            .bind(self.processed)
    }
}

impl PgRecord for Provider {
    const COLUMNS: &'static [&'static str] = &["account_id", "sub", "issuer"];

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.account_id)
            .bind(&self.sub)
            .bind(&self.issuer)
    }
}

/// `INSERT ... RETURNING *` for `table`.
pub fn insert_sql<E: PgRecord>(table: &str) -> String {
    let columns = ["public_id", "created_at", "updated_at"]
        .iter()
        .chain(E::COLUMNS.iter())
        .copied()
        .collect::<Vec<_>>();
    let placeholders = (1..=columns.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// `UPDATE ... RETURNING *` keyed by system id; `updated_at` is bound first
/// and the id last.
pub fn update_sql<E: PgRecord>(table: &str) -> String {
    let assignments = std::iter::once("updated_at")
        .chain(E::COLUMNS.iter().copied())
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, i + 1))
        .collect::<Vec<_>>();
    format!(
        "UPDATE {} SET {} WHERE id = ${} RETURNING *",
        table,
        assignments.join(", "),
        assignments.len() + 1
    )
}

/// `WHERE` clause matching every column of a reference.
pub fn reference_filter(columns: &[&str]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            insert_sql::<Provider>("account_provider"),
            "INSERT INTO account_provider (public_id, created_at, updated_at, account_id, sub, issuer) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *"
        );
    }

    #[test]
    fn test_update_sql() {
        assert_eq!(
            update_sql::<VerificationTicket>("account_verification"),
            "UPDATE account_verification SET updated_at = $1, account_id = $2, code_hash = $3, \
             expires_at = $4 WHERE id = $5 RETURNING *"
        );
    }

    #[test]
    fn test_reference_filter() {
        assert_eq!(reference_filter(&["sub", "issuer"]), "sub = $1 AND issuer = $2");
    }
}
