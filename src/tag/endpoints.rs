//! JSON handlers for tags.

use axum::{Extension, Json, extract::State};
use serde::Deserialize;

use crate::{
    AppState, Error,
    auth::AuthContext,
    clock::now_utc,
    tag::{Tag, TagData, TagId, create_tag, delete_tag, list_tags, update_tag},
};

/// The request body for updating a tag.
#[derive(Debug, Deserialize)]
pub struct UpdateTagRequest {
    /// The tag to update.
    pub id: TagId,
    /// The new fields.
    #[serde(flatten)]
    pub data: TagData,
}

/// The request body for deleting a tag.
#[derive(Debug, Deserialize)]
pub struct DeleteTagRequest {
    /// The tag to delete.
    pub id: TagId,
}

/// The request body for listing tags.
#[derive(Debug, Default, Deserialize)]
pub struct ListTagsRequest {
    /// Whether deleted tags are included.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Handle tag creation.
pub async fn create_tag_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(data): Json<TagData>,
) -> Result<Json<Tag>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    create_tag(data, now_utc(), &connection).map(Json)
}

/// Handle tag updates.
pub async fn update_tag_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpdateTagRequest>,
) -> Result<Json<Tag>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    update_tag(request.id, request.data, &connection).map(Json)
}

/// Handle tag deletion.
pub async fn delete_tag_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<DeleteTagRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    delete_tag(request.id, now_utc(), &connection).map(Json)
}

/// List tags alphabetically.
pub async fn list_tags_endpoint(
    State(state): State<AppState>,
    Json(request): Json<ListTagsRequest>,
) -> Result<Json<Vec<Tag>>, Error> {
    let connection = state.db.read()?;

    list_tags(request.include_deleted, &connection).map(Json)
}

#[cfg(test)]
mod tag_endpoint_tests {
    use axum::{Router, http::StatusCode, middleware, routing::post};
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use time::Duration;

    use crate::{
        AppState,
        auth::{TokenType, UserID, auth_middleware},
        clock::now_utc,
    };

    use super::{create_tag_endpoint, delete_tag_endpoint, list_tags_endpoint};

    fn server(state: AppState) -> (TestServer, String) {
        let token = state
            .tokens
            .generate_token(UserID::new(1), TokenType::Web, Duration::hours(1), now_utc())
            .unwrap()
            .token;
        let app = Router::new()
            .route("/create", post(create_tag_endpoint))
            .route("/delete", post(delete_tag_endpoint))
            .route("/list", post(list_tags_endpoint))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);

        (TestServer::try_new(app).unwrap(), token)
    }

    #[tokio::test]
    async fn duplicate_tag_is_a_conflict() {
        let (server, token) = server(AppState::for_tests());
        server
            .post("/create")
            .authorization_bearer(&token)
            .json(&json!({ "name": "holiday" }))
            .await
            .assert_status_ok();

        let response = server
            .post("/create")
            .authorization_bearer(&token)
            .json(&json!({ "name": "holiday" }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["code"], "conflict");
    }

    #[tokio::test]
    async fn deleted_tag_is_not_listed() {
        let (server, token) = server(AppState::for_tests());
        let tag = server
            .post("/create")
            .authorization_bearer(&token)
            .json(&json!({ "name": "holiday", "color": "#ff8800" }))
            .await
            .json::<Value>();

        server
            .post("/delete")
            .authorization_bearer(&token)
            .json(&json!({ "id": tag["id"] }))
            .await
            .assert_status_ok();

        let live = server.post("/list").json(&json!({})).await;
        let all = server
            .post("/list")
            .json(&json!({ "include_deleted": true }))
            .await;

        live.assert_json(&json!([]));
        assert_eq!(all.json::<Vec<Value>>().len(), 1);
    }
}
