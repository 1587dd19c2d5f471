use crate::{
    api::{AppState, Error, ErrorEnvelope},
    domain::{Account, AccountRepository, AccountRepositoryError, AccountUpdate, NewAccount},
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::Method,
    routing::get,
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::{debug, instrument, warn};
use utoipa::{OpenApi, ToSchema};

#[derive(OpenApi)]
#[openapi(
    paths(list_accounts, create_account, get_account, update_account, delete_account),
    components(schemas(Account, CreateAccountRequest, UpdateAccountRequest, ErrorEnvelope))
)]
pub struct ApiDoc;

pub fn app<R>() -> Router<AppState<R>>
where
    R: AccountRepository,
{
    Router::new()
        .route(
            "/account",
            get(list_accounts::<R>)
                .post(create_account::<R>)
                .delete(delete_account_without_id)
                .fallback(method_not_allowed),
        )
        .route(
            "/account/:id",
            get(get_account::<R>)
                .put(update_account::<R>)
                .delete(delete_account::<R>)
                .fallback(method_not_allowed),
        )
}

/// The client-supplied fields for creating an account.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    pub first_name: String,
    pub last_name: String,
}

impl From<CreateAccountRequest> for NewAccount {
    fn from(CreateAccountRequest { first_name, last_name }: CreateAccountRequest) -> Self {
        NewAccount::new(first_name, last_name)
    }
}

/// The client-supplied fields for updating an account.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateAccountRequest {
    pub first_name: String,
    pub last_name: String,
    pub balance: i64,
}

impl From<UpdateAccountRequest> for AccountUpdate {
    fn from(
        UpdateAccountRequest {
            first_name,
            last_name,
            balance,
        }: UpdateAccountRequest,
    ) -> Self {
        AccountUpdate {
            first_name,
            last_name,
            balance,
        }
    }
}

#[utoipa::path(
    get,
    path = "/account",
    responses(
        (status = 200, description = "All accounts ordered by ID", body = [Account]),
        (status = 500, description = "Storage failure", body = ErrorEnvelope)
    )
)]
#[instrument(skip(app_state))]
async fn list_accounts<R>(State(app_state): State<AppState<R>>) -> Result<Json<Vec<Account>>, Error>
where
    R: AccountRepository,
{
    let repository = &app_state.account_repository;
    let accounts = with_deadline(app_state.request_timeout, async {
        repository.accounts().await?.try_collect::<Vec<_>>().await
    })
    .await?;

    debug!(count = accounts.len(), "listed accounts");
    Ok(Json(accounts))
}

#[utoipa::path(
    post,
    path = "/account",
    request_body = CreateAccountRequest,
    responses(
        (status = 200, description = "The created account", body = Account),
        (status = 400, description = "Malformed or rejected request body", body = ErrorEnvelope),
        (status = 500, description = "Storage failure", body = ErrorEnvelope),
        (status = 504, description = "Deadline elapsed, nothing was stored", body = ErrorEnvelope)
    )
)]
#[instrument(skip(app_state, request))]
async fn create_account<R>(
    State(app_state): State<AppState<R>>,
    request: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<Json<Account>, Error>
where
    R: AccountRepository,
{
    let Json(request) = request.map_err(|rejection| Error::Validation(rejection.body_text()))?;

    let account = with_deadline(
        app_state.request_timeout,
        app_state.account_repository.create_account(request.into()),
    )
    .await?;

    debug!(id = account.id, "created account");
    Ok(Json(account))
}

#[utoipa::path(
    get,
    path = "/account/{id}",
    params(("id" = i64, Path, description = "Account ID")),
    responses(
        (status = 200, description = "The account", body = Account),
        (status = 400, description = "Invalid account ID", body = ErrorEnvelope),
        (status = 404, description = "Unknown account ID", body = ErrorEnvelope)
    )
)]
#[instrument(skip(app_state, id))]
async fn get_account<R>(
    State(app_state): State<AppState<R>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Account>, Error>
where
    R: AccountRepository,
{
    let id = account_id(id)?;

    let account = with_deadline(
        app_state.request_timeout,
        app_state.account_repository.account_by_id(id),
    )
    .await?;

    Ok(Json(account))
}

#[utoipa::path(
    put,
    path = "/account/{id}",
    params(("id" = i64, Path, description = "Account ID")),
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "The updated account", body = Account),
        (status = 400, description = "Invalid account ID or request body", body = ErrorEnvelope),
        (status = 404, description = "Unknown account ID", body = ErrorEnvelope)
    )
)]
#[instrument(skip(app_state, id, request))]
async fn update_account<R>(
    State(app_state): State<AppState<R>>,
    id: Result<Path<i64>, PathRejection>,
    request: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<Json<Account>, Error>
where
    R: AccountRepository,
{
    let id = account_id(id)?;
    let Json(request) = request.map_err(|rejection| Error::Validation(rejection.body_text()))?;

    let account = with_deadline(
        app_state.request_timeout,
        app_state
            .account_repository
            .update_account(id, request.into()),
    )
    .await?;

    debug!(id, "updated account");
    Ok(Json(account))
}

#[utoipa::path(
    delete,
    path = "/account/{id}",
    params(("id" = i64, Path, description = "Account ID")),
    responses(
        (status = 200, description = "The deleted account", body = Account),
        (status = 400, description = "Invalid account ID", body = ErrorEnvelope),
        (status = 404, description = "Unknown account ID", body = ErrorEnvelope)
    )
)]
#[instrument(skip(app_state, id))]
async fn delete_account<R>(
    State(app_state): State<AppState<R>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Account>, Error>
where
    R: AccountRepository,
{
    let id = account_id(id)?;

    let account = with_deadline(
        app_state.request_timeout,
        app_state.account_repository.delete_account(id),
    )
    .await?;

    debug!(id, "deleted account");
    Ok(Json(account))
}

async fn delete_account_without_id() -> Error {
    Error::Validation("account ID missing, use DELETE /account/{id}".to_string())
}

async fn method_not_allowed(method: Method) -> Error {
    Error::MethodNotAllowed(method)
}

fn account_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, Error> {
    id.map(|Path(id)| id)
        .map_err(|rejection| Error::Validation(rejection.body_text()))
}

/// Run a repository call under the per-request deadline. An elapsed deadline drops the call, which
/// rolls back its uncommitted transaction; the server side `statement_timeout` aborts the statement.
async fn with_deadline<F, T>(timeout: Duration, call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, AccountRepositoryError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| {
            warn!(?timeout, "deadline elapsed");
            Error::Timeout
        })?
        .map_err(Error::from)
}
