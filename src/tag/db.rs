//! Database operations for tags.

use rusqlite::{Connection, Row, params_from_iter};
use time::OffsetDateTime;

use crate::{
    Error,
    db::placeholders,
    tag::{Tag, TagData, TagId, TagName},
};

/// Initialize the tag table and indexes.
pub fn create_tag_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS tag (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            color TEXT NOT NULL DEFAULT '',
            icon TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_tag_name ON tag(name) WHERE deleted_at IS NULL;",
    )?;

    Ok(())
}

fn map_unique_violation(error: rusqlite::Error, name: &TagName) -> Error {
    match error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: _,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            _,
        ) => Error::DuplicateTag(name.to_string()),
        error => error.into(),
    }
}

/// Create a tag and return it with its generated ID.
///
/// # Errors
/// Returns [Error::DuplicateTag] if a live tag has the same name.
pub fn create_tag(data: TagData, now: OffsetDateTime, connection: &Connection) -> Result<Tag, Error> {
    connection
        .prepare(
            "INSERT INTO tag (name, color, icon, created_at) VALUES (?1, ?2, ?3, ?4)
             RETURNING id, name, color, icon, created_at, deleted_at",
        )?
        .query_row(
            (data.name.as_ref(), &data.color, &data.icon, now),
            map_row,
        )
        .map_err(|error| map_unique_violation(error, &data.name))
}

/// Retrieve a single live tag by ID.
pub fn get_tag(tag_id: TagId, connection: &Connection) -> Result<Tag, Error> {
    connection
        .prepare(
            "SELECT id, name, color, icon, created_at, deleted_at FROM tag
             WHERE id = :id AND deleted_at IS NULL;",
        )?
        .query_row(&[(":id", &tag_id)], map_row)
        .map_err(|error| error.into())
}

/// Retrieve tags ordered alphabetically by name.
pub fn list_tags(include_deleted: bool, connection: &Connection) -> Result<Vec<Tag>, Error> {
    let query = if include_deleted {
        "SELECT id, name, color, icon, created_at, deleted_at FROM tag ORDER BY name ASC;"
    } else {
        "SELECT id, name, color, icon, created_at, deleted_at FROM tag
         WHERE deleted_at IS NULL ORDER BY name ASC;"
    };

    connection
        .prepare(query)?
        .query_map([], map_row)?
        .map(|maybe_tag| maybe_tag.map_err(|error| error.into()))
        .collect()
}

/// Update a live tag. Returns [Error::NotFound] if the tag doesn't exist.
pub fn update_tag(tag_id: TagId, data: TagData, connection: &Connection) -> Result<Tag, Error> {
    let rows_affected = connection
        .execute(
            "UPDATE tag SET name = ?1, color = ?2, icon = ?3 WHERE id = ?4 AND deleted_at IS NULL",
            (data.name.as_ref(), &data.color, &data.icon, tag_id),
        )
        .map_err(|error| map_unique_violation(error, &data.name))?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    get_tag(tag_id, connection)
}

/// Soft delete a tag. Returns [Error::NotFound] if the tag doesn't exist.
///
/// Transactions keep their reference to the tag.
pub fn delete_tag(tag_id: TagId, now: OffsetDateTime, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE tag SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (now, tag_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Check that every ID in `tag_ids` is a live tag.
///
/// # Errors
/// Returns [Error::InvalidArgument] naming the first unknown tag.
pub fn ensure_tags_exist(tag_ids: &[TagId], connection: &Connection) -> Result<(), Error> {
    if tag_ids.is_empty() {
        return Ok(());
    }

    let query = format!(
        "SELECT id FROM tag WHERE deleted_at IS NULL AND id IN ({})",
        placeholders(tag_ids.len())
    );
    let found: Vec<TagId> = connection
        .prepare(&query)?
        .query_map(params_from_iter(tag_ids), |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    match tag_ids.iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(Error::InvalidArgument(format!(
            "tag {missing} does not exist"
        ))),
        None => Ok(()),
    }
}

fn map_row(row: &Row) -> Result<Tag, rusqlite::Error> {
    let raw_name: String = row.get(1)?;

    Ok(Tag {
        id: row.get(0)?,
        name: TagName::new_unchecked(&raw_name),
        color: row.get(2)?,
        icon: row.get(3)?,
        created_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}
