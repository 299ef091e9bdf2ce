//! Connection types, connections and conversions, all on the `e-tapp` page.
use actix_web::{delete, get, post, route, web, HttpRequest, HttpResponse};

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::handlers::enforce;
use crate::models::*;
use crate::permissions::E_TAPP_POLICY;
use crate::state::AppState;
use crate::store::{blocking, ConnectionStore, StoreResult};

fn type_detail(types: &[ConnectionType], id: i32) -> Option<ConnectionType> {
    types.iter().find(|t| t.id == id).cloned()
}

fn with_types<T, R>(
    store: &dyn ConnectionStore,
    rows: Vec<T>,
    describe: fn(T, &[ConnectionType]) -> R,
) -> StoreResult<Vec<R>> {
    let types = store.list_connection_types()?;
    Ok(rows.into_iter().map(|row| describe(row, &types)).collect())
}

fn with_type<T, R>(store: &dyn ConnectionStore, row: T, describe: fn(T, &[ConnectionType]) -> R) -> StoreResult<R> {
    let types = store.list_connection_types()?;
    Ok(describe(row, &types))
}

fn describe_connection(connection: Connection, types: &[ConnectionType]) -> ConnectionResponse {
    let connection_type_detail = type_detail(types, connection.connection_type_id);
    ConnectionResponse { connection, connection_type_detail }
}

fn describe_conversion(conversion: Conversion, types: &[ConnectionType]) -> ConversionResponse {
    ConversionResponse {
        from_connection_type_detail: type_detail(types, conversion.from_connection_type_id),
        to_connection_type_detail: type_detail(types, conversion.to_connection_type_id),
        conversion,
    }
}

fn check_name(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{}: This field may not be blank.", field)));
    }
    Ok(())
}

// Connection types

#[get("/connection-types/")]
async fn list_connection_types(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let store = state.connections.clone();
    Ok(HttpResponse::Ok().json(blocking(move || store.list_connection_types()).await?))
}

#[post("/connection-types/")]
async fn create_connection_type(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    body: web::Json<NewConnectionType>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let new_type = body.into_inner();
    check_name("name", &new_type.name)?;
    let store = state.connections.clone();
    let created = blocking(move || store.create_connection_type(new_type)).await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/connection-types/{id}/")]
async fn get_connection_type(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let store = state.connections.clone();
    Ok(HttpResponse::Ok().json(blocking(move || store.get_connection_type(id)).await?))
}

#[route("/connection-types/{id}/", method = "PUT", method = "PATCH")]
async fn update_connection_type(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ConnectionTypeChanges>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    if let Some(name) = &changes.name {
        check_name("name", name)?;
    }
    let store = state.connections.clone();
    Ok(HttpResponse::Ok().json(blocking(move || store.update_connection_type(id, changes)).await?))
}

#[delete("/connection-types/{id}/")]
async fn delete_connection_type(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let store = state.connections.clone();
    blocking(move || store.delete_connection_type(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

// Connections

#[get("/connections/")]
async fn list_connections(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    filter: web::Query<ConnectionFilter>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let store = state.connections.clone();
    let filter = filter.into_inner();
    let rows = blocking(move || {
        let connections = store.list_connections(&filter)?;
        with_types(store.as_ref(), connections, describe_connection)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[post("/connections/")]
async fn create_connection(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    body: web::Json<CreateConnectionRequest>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let new_connection = body.into_inner().into_new(Some(user.0.id)).map_err(ApiError::ValidationError)?;
    check_name("file_number", &new_connection.file_number)?;
    let store = state.connections.clone();
    let created = blocking(move || {
        let connection = store.create_connection(new_connection)?;
        with_type(store.as_ref(), connection, describe_connection)
    })
    .await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/connections/{id}/")]
async fn get_connection(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let store = state.connections.clone();
    let found = blocking(move || {
        let connection = store.get_connection(id)?;
        with_type(store.as_ref(), connection, describe_connection)
    })
    .await?;
    Ok(HttpResponse::Ok().json(found))
}

#[route("/connections/{id}/", method = "PUT", method = "PATCH")]
async fn update_connection(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ConnectionChanges>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    changes.validate().map_err(ApiError::ValidationError)?;
    let store = state.connections.clone();
    let updated = blocking(move || {
        let connection = store.update_connection(id, changes)?;
        with_type(store.as_ref(), connection, describe_connection)
    })
    .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/connections/{id}/")]
async fn delete_connection(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let store = state.connections.clone();
    blocking(move || store.delete_connection(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

// Conversions

#[get("/conversions/")]
async fn list_conversions(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    filter: web::Query<ConversionFilter>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let store = state.connections.clone();
    let filter = filter.into_inner();
    let rows = blocking(move || {
        let conversions = store.list_conversions(&filter)?;
        with_types(store.as_ref(), conversions, describe_conversion)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[post("/conversions/")]
async fn create_conversion(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    body: web::Json<CreateConversionRequest>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let new_conversion = body.into_inner().into_new(Some(user.0.id));
    check_name("file_number", &new_conversion.file_number)?;
    let store = state.connections.clone();
    let created = blocking(move || {
        let conversion = store.create_conversion(new_conversion)?;
        with_type(store.as_ref(), conversion, describe_conversion)
    })
    .await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/conversions/{id}/")]
async fn get_conversion(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let store = state.connections.clone();
    let found = blocking(move || {
        let conversion = store.get_conversion(id)?;
        with_type(store.as_ref(), conversion, describe_conversion)
    })
    .await?;
    Ok(HttpResponse::Ok().json(found))
}

#[route("/conversions/{id}/", method = "PUT", method = "PATCH")]
async fn update_conversion(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ConversionChanges>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    let store = state.connections.clone();
    let updated = blocking(move || {
        let conversion = store.update_conversion(id, changes)?;
        with_type(store.as_ref(), conversion, describe_conversion)
    })
    .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/conversions/{id}/")]
async fn delete_conversion(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, E_TAPP_POLICY, &req).await?;
    let id = path.into_inner();
    let store = state.connections.clone();
    blocking(move || store.delete_conversion(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_connection_types)
        .service(create_connection_type)
        .service(get_connection_type)
        .service(update_connection_type)
        .service(delete_connection_type)
        .service(list_connections)
        .service(create_connection)
        .service(get_connection)
        .service(update_connection)
        .service(delete_connection)
        .service(list_conversions)
        .service(create_conversion)
        .service(get_conversion)
        .service(update_conversion)
        .service(delete_conversion);
}
