use crate::db::Database;
use crate::language::LanguageGuard;
use crate::models::{ApiError, TranslationItemDto, ValidationErrors};
use actix_web::{error, http::header, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

/// Full path of the translation item collection. The guard re-matches it against the request URI.
pub const TRANSLATION_ITEMS_PATH: &str = "/api/{language}/{collection:(?i:translationitems)}";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub struct LanguagePath {
    /// Language code: en, sv
    pub language: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub struct ItemPath {
    /// Language code: en, sv
    pub language: String,
    /// Translation item key
    pub key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/api/health", web::get().to(health_check))
        .service(
            web::scope(TRANSLATION_ITEMS_PATH)
                .guard(LanguageGuard::new(TRANSLATION_ITEMS_PATH))
                .route("", web::get().to(get_translation_items))
                .route("", web::post().to(create_translation_item))
                .route("/{key}", web::get().to(get_translation_item))
                .route("/{key}", web::delete().to(delete_translation_item)),
        );
}

/**
 * json_config
 * 请求体无法解析为 DTO 时，与字段校验失败一样返回 400 + 字段错误映射（字段名为 `body`）。
 */
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        let mut errors = ValidationErrors::default();
        errors.add("body", err.to_string());
        error::InternalError::from_response(err, HttpResponse::BadRequest().json(errors)).into()
    })
}

fn database_error(operation: &str, err: anyhow::Error) -> HttpResponse {
    log::error!("Database error while {}: {:?}", operation, err);
    HttpResponse::InternalServerError().json(ApiError::database(&err))
}

fn item_location(language: &str, key: &str) -> String {
    format!(
        "api/{}/translationItems/{}",
        language,
        urlencoding::encode(key)
    )
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthCheckResponse))
)]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthCheckResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Get all translation items for a language.
#[utoipa::path(
    get,
    path = "/api/{language}/translationitems",
    tag = "translationitems",
    params(LanguagePath),
    responses((status = 200, description = "Items stored for the language", body = [TranslationItemDto]))
)]
pub async fn get_translation_items(
    path: web::Path<LanguagePath>,
    db: web::Data<Arc<Database>>,
) -> impl Responder {
    let language = path.into_inner().language;

    match db.list_translation_items(&language).await {
        Ok(items) => {
            let dtos: Vec<TranslationItemDto> =
                items.iter().map(TranslationItemDto::from_entity).collect();
            HttpResponse::Ok().json(dtos)
        }
        Err(e) => database_error("listing translation items", e),
    }
}

/// Get a translation item by key for a language.
#[utoipa::path(
    get,
    path = "/api/{language}/translationitems/{key}",
    tag = "translationitems",
    params(ItemPath),
    responses(
        (status = 200, description = "Item found", body = TranslationItemDto),
        (status = 404, description = "No item with this key in this language")
    )
)]
pub async fn get_translation_item(
    path: web::Path<ItemPath>,
    db: web::Data<Arc<Database>>,
) -> impl Responder {
    let ItemPath { language, key } = path.into_inner();

    match db.get_translation_item(&language, &key).await {
        Ok(Some(item)) => HttpResponse::Ok().json(TranslationItemDto::from_entity(&item)),
        Ok(None) => HttpResponse::NotFound().finish(),
        Err(e) => database_error("fetching translation item", e),
    }
}

/// Create a translation item for a language.
#[utoipa::path(
    post,
    path = "/api/{language}/translationitems",
    tag = "translationitems",
    params(LanguagePath),
    request_body = TranslationItemDto,
    responses(
        (status = 201, description = "Item created", body = TranslationItemDto),
        (status = 400, description = "Invalid fields or duplicate key", body = ValidationErrors)
    )
)]
pub async fn create_translation_item(
    path: web::Path<LanguagePath>,
    body: web::Json<TranslationItemDto>,
    db: web::Data<Arc<Database>>,
) -> impl Responder {
    let language = path.into_inner().language;
    let dto = body.into_inner();

    // Keys are unique across every language, not just the one in the route.
    let mut errors = dto.validate();
    match db.translation_key_exists(&dto.key).await {
        Ok(true) => errors.add_duplicate_key(),
        Ok(false) => {}
        Err(e) => return database_error("checking translation key", e),
    }

    if !errors.is_empty() {
        log::warn!("Rejected translation item for {}: {:?}", language, errors);
        return HttpResponse::BadRequest().json(errors);
    }

    match db.insert_translation_item(dto.into_entity(&language)).await {
        Ok(Some(item)) => {
            log::info!("Created translation item {} ({})", item.key, item.language);
            HttpResponse::Created()
                .insert_header((header::LOCATION, item_location(&language, &item.key)))
                .json(TranslationItemDto::from_entity(&item))
        }
        Ok(None) => {
            // Lost the race between the existence check and the insert.
            errors.add_duplicate_key();
            log::warn!("Rejected translation item for {}: {:?}", language, errors);
            HttpResponse::BadRequest().json(errors)
        }
        Err(e) => database_error("creating translation item", e),
    }
}

/// Delete a translation item by key for a language.
#[utoipa::path(
    delete,
    path = "/api/{language}/translationitems/{key}",
    tag = "translationitems",
    params(ItemPath),
    responses(
        (status = 200, description = "Item deleted"),
        (status = 404, description = "No item with this key in this language")
    )
)]
pub async fn delete_translation_item(
    path: web::Path<ItemPath>,
    db: web::Data<Arc<Database>>,
) -> impl Responder {
    let ItemPath { language, key } = path.into_inner();

    match db.delete_translation_item(&language, &key).await {
        Ok(true) => {
            log::info!("Deleted translation item {} ({})", key, language);
            HttpResponse::Ok().finish()
        }
        Ok(false) => HttpResponse::NotFound().finish(),
        Err(e) => database_error("deleting translation item", e),
    }
}
