//! Queries shared by the HTTP handlers, the chat relay and the ingestion
//! worker.

use chrono::Utc;
use diesel::dsl::{count_star, sql};
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

use crate::models::{Collection, Message, NewMessage, NewSession, Session, Site, Source, ROLE_USER};
use crate::schema::{collections, messages, sessions, sites};

pub fn find_collection(
    conn: &mut SqliteConnection,
    collection_id: &str,
) -> QueryResult<Option<Collection>> {
    collections::table
        .find(collection_id)
        .first(conn)
        .optional()
}

/// Adds `delta` to the collection's document count. The count never drops
/// below zero.
pub fn adjust_document_count(
    conn: &mut SqliteConnection,
    collection_id: &str,
    delta: i32,
) -> QueryResult<usize> {
    let now = Utc::now().naive_utc();
    let target = collections::table.find(collection_id);
    if delta >= 0 {
        diesel::update(target)
            .set((
                collections::document_count.eq(collections::document_count + delta),
                collections::updated_at.eq(now),
            ))
            .execute(conn)
    } else {
        diesel::update(target.filter(collections::document_count.ge(-delta)))
            .set((
                collections::document_count.eq(collections::document_count + delta),
                collections::updated_at.eq(now),
            ))
            .execute(conn)
    }
}

pub fn find_site(conn: &mut SqliteConnection, site_id: &str) -> QueryResult<Option<Site>> {
    sites::table.find(site_id).first(conn).optional()
}

/// Returns the session named by `session_id` when it belongs to `site_id`,
/// otherwise opens a new one bound to the site.
pub fn resolve_session(
    conn: &mut SqliteConnection,
    site_id: &str,
    session_id: Option<&str>,
) -> QueryResult<Session> {
    if let Some(id) = session_id.filter(|id| !id.trim().is_empty()) {
        let existing = sessions::table
            .find(id)
            .filter(sessions::site_id.eq(site_id))
            .first::<Session>(conn)
            .optional()?;
        if let Some(session) = existing {
            return Ok(session);
        }
    }

    let now = Utc::now().naive_utc();
    let session = NewSession {
        id: Uuid::new_v4().to_string(),
        site_id: Some(site_id.to_string()),
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(sessions::table)
        .values(&session)
        .execute(conn)?;
    sessions::table.find(&session.id).first(conn)
}

pub fn touch_session(conn: &mut SqliteConnection, session_id: &str) -> QueryResult<usize> {
    diesel::update(sessions::table.find(session_id))
        .set(sessions::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)
}

pub fn append_message(
    conn: &mut SqliteConnection,
    session_id: &str,
    role: &str,
    content: &str,
    sources: &[Source],
) -> QueryResult<Message> {
    let sources = if sources.is_empty() {
        None
    } else {
        serde_json::to_string(sources).ok()
    };
    let message = NewMessage {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        sources,
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(messages::table)
        .values(&message)
        .execute(conn)?;
    messages::table.find(&message.id).first(conn)
}

/// Messages of a session in the order they were written.
pub fn session_messages(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> QueryResult<Vec<Message>> {
    messages::table
        .filter(messages::session_id.eq(session_id))
        .order((messages::created_at.asc(), sql::<BigInt>("rowid").asc()))
        .load(conn)
}

pub fn count_collections(conn: &mut SqliteConnection) -> QueryResult<i64> {
    collections::table.select(count_star()).first(conn)
}

pub fn count_sites(conn: &mut SqliteConnection) -> QueryResult<i64> {
    sites::table.select(count_star()).first(conn)
}

pub fn count_user_messages(conn: &mut SqliteConnection) -> QueryResult<i64> {
    messages::table
        .filter(messages::role.eq(ROLE_USER))
        .select(count_star())
        .first(conn)
}
