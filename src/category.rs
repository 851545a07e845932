//! Categories group transactions by purpose, e.g. "Groceries" or "Rent".

use axum::{Extension, Json, extract::State};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    auth::AuthContext,
    clock::now_utc,
};

/// Database identifier for a category.
pub type CategoryId = i64;

/// A named group of transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// The ID of the category.
    pub id: CategoryId,
    /// The name, unique among live categories. Case sensitive.
    pub name: String,
    /// When the category was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the category was deleted.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// Initialize the category table.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS category (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_category_name
            ON category(name) WHERE deleted_at IS NULL;",
    )?;

    Ok(())
}

fn validate_name(name: &str) -> Result<&str, Error> {
    let name = name.trim();

    if name.is_empty() {
        Err(Error::InvalidArgument(
            "category name cannot be empty".to_owned(),
        ))
    } else {
        Ok(name)
    }
}

fn map_unique_violation(error: rusqlite::Error, name: &str) -> Error {
    match error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: _,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            _,
        ) => Error::DuplicateCategory(name.to_owned()),
        error => error.into(),
    }
}

/// Create a category.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if `name` is empty,
/// - [Error::DuplicateCategory] if a live category has the same name,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_category(
    name: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Category, Error> {
    let name = validate_name(name)?;

    connection
        .prepare(
            "INSERT INTO category (name, created_at) VALUES (?1, ?2)
             RETURNING id, name, created_at, deleted_at",
        )?
        .query_row((name, now), map_category_row)
        .map_err(|error| map_unique_violation(error, name))
}

/// Rename a live category.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if `name` is empty,
/// - [Error::NotFound] if there is no live category with the ID,
/// - [Error::DuplicateCategory] if another live category has the name,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_category(
    category_id: CategoryId,
    name: &str,
    connection: &Connection,
) -> Result<Category, Error> {
    let name = validate_name(name)?;

    let rows_affected = connection
        .execute(
            "UPDATE category SET name = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            (name, category_id),
        )
        .map_err(|error| map_unique_violation(error, name))?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    get_category(category_id, connection)
}

/// Soft delete a category.
///
/// # Errors
/// Returns [Error::NotFound] if there is no live category with the ID.
pub fn delete_category(
    category_id: CategoryId,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE category SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (now, category_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Retrieve a live category.
///
/// # Errors
/// Returns [Error::NotFound] if the category does not exist or was deleted.
pub fn get_category(category_id: CategoryId, connection: &Connection) -> Result<Category, Error> {
    connection
        .prepare(
            "SELECT id, name, created_at, deleted_at FROM category
             WHERE id = :id AND deleted_at IS NULL",
        )?
        .query_row(&[(":id", &category_id)], map_category_row)
        .map_err(|error| error.into())
}

/// Retrieve categories ordered alphabetically by name.
pub fn list_categories(
    include_deleted: bool,
    connection: &Connection,
) -> Result<Vec<Category>, Error> {
    let query = if include_deleted {
        "SELECT id, name, created_at, deleted_at FROM category ORDER BY name ASC, id ASC"
    } else {
        "SELECT id, name, created_at, deleted_at FROM category
         WHERE deleted_at IS NULL ORDER BY name ASC, id ASC"
    };

    connection
        .prepare(query)?
        .query_map([], map_category_row)?
        .map(|maybe_category| maybe_category.map_err(|error| error.into()))
        .collect()
}

fn map_category_row(row: &Row) -> Result<Category, rusqlite::Error> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        deleted_at: row.get(3)?,
    })
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// The request body for creating a category.
#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    /// The name of the new category.
    pub name: String,
}

/// The request body for renaming a category.
#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    /// The category to rename.
    pub id: CategoryId,
    /// The new name.
    pub name: String,
}

/// The request body for deleting a category.
#[derive(Debug, Deserialize)]
pub struct DeleteCategoryRequest {
    /// The category to delete.
    pub id: CategoryId,
}

/// The request body for listing categories.
#[derive(Debug, Default, Deserialize)]
pub struct ListCategoriesRequest {
    /// Whether deleted categories are included.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Handle category creation.
pub async fn create_category_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<Json<Category>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    create_category(&request.name, now_utc(), &connection).map(Json)
}

/// Handle category renames.
pub async fn update_category_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpdateCategoryRequest>,
) -> Result<Json<Category>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    update_category(request.id, &request.name, &connection).map(Json)
}

/// Handle category deletion.
pub async fn delete_category_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<DeleteCategoryRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    delete_category(request.id, now_utc(), &connection).map(Json)
}

/// List the categories.
pub async fn list_categories_endpoint(
    State(state): State<AppState>,
    Json(request): Json<ListCategoriesRequest>,
) -> Result<Json<Vec<Category>>, Error> {
    let connection = state.db.read()?;

    list_categories(request.include_deleted, &connection).map(Json)
}

#[cfg(test)]
mod category_store_tests {
    use time::macros::datetime;

    use crate::{Error, test_utils::get_test_connection};

    use super::{create_category, delete_category, get_category, list_categories, update_category};

    #[test]
    fn create_category_succeeds() {
        let connection = get_test_connection();

        let category = create_category(" Groceries ", datetime!(2025-01-01 0:00 UTC), &connection)
            .expect("could not create category");

        assert!(category.id > 0);
        assert_eq!(category.name, "Groceries");
        assert_eq!(get_category(category.id, &connection), Ok(category));
    }

    #[test]
    fn names_are_unique_and_case_sensitive() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_category("Rent", now, &connection).unwrap();

        assert_eq!(
            create_category("Rent", now, &connection),
            Err(Error::DuplicateCategory("Rent".to_owned()))
        );
        assert!(create_category("rent", now, &connection).is_ok());
    }

    #[test]
    fn empty_name_is_invalid() {
        let connection = get_test_connection();

        let result = create_category("  ", datetime!(2025-01-01 0:00 UTC), &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn update_renames_category() {
        let connection = get_test_connection();
        let category = create_category("Rnet", datetime!(2025-01-01 0:00 UTC), &connection).unwrap();

        let updated = update_category(category.id, "Rent", &connection).unwrap();

        assert_eq!(updated.name, "Rent");
        assert_eq!(update_category(999, "Rent", &connection), Err(Error::NotFound));
    }

    #[test]
    fn deleted_categories_are_hidden_unless_requested() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        let category = create_category("Fuel", now, &connection).unwrap();
        create_category("Food", now, &connection).unwrap();

        delete_category(category.id, now, &connection).unwrap();

        assert_eq!(get_category(category.id, &connection), Err(Error::NotFound));
        assert_eq!(list_categories(false, &connection).unwrap().len(), 1);
        assert_eq!(list_categories(true, &connection).unwrap().len(), 2);
        assert_eq!(delete_category(category.id, now, &connection), Err(Error::NotFound));
    }
}
