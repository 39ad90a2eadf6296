mod config;
mod db;
mod handlers;
mod language;
mod models;

use crate::config::Config;
use crate::db::Database;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(title = "Translation API", version = "v1"),
    paths(
        handlers::health_check,
        handlers::get_translation_items,
        handlers::get_translation_item,
        handlers::create_translation_item,
        handlers::delete_translation_item
    ),
    components(schemas(
        models::ApiError,
        models::TranslationItemDto,
        models::ValidationErrors,
        handlers::HealthCheckResponse
    ))
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    dotenv::from_filename(format!("{}/.env.local", manifest_dir)).ok();
    dotenv::from_filename(format!("{}/.env", manifest_dir)).ok();
    dotenv::from_filename(".env.local").ok();
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(startup_error)?;
    let db = Database::new(&config).map_err(startup_error)?;
    log::info!("Using {} storage backend", db.backend_name());

    if config.bootstrap_schema {
        db.bootstrap_schema().await.map_err(startup_error)?;
        log::info!("Database schema bootstrapped");
    }

    let db = Arc::new(db);
    let bind_address = config.bind_address();
    log::info!("Starting Translation API server at http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(db.clone()))
            .wrap(Logger::default())
            .wrap(cors)
            .service(SwaggerUi::new("/api/docs/{_:.*}").url("/api/openapi.json", ApiDoc::openapi()))
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn startup_error(err: anyhow::Error) -> std::io::Error {
    log::error!("Startup failed: {:#}", err);
    std::io::Error::other(format!("{:#}", err))
}
