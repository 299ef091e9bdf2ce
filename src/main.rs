use actix_web::{web, App, HttpServer};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::Connection;
use log::{error, info, warn};
use std::sync::Arc;

use utilityops::cache::SystemClock;
use utilityops::config::{AppConfig, StorageBackend, DB_INIT_SQL};
use utilityops::handlers;
use utilityops::logger::setup_logger;
use utilityops::mailer::create_mailer;
use utilityops::middleware::RequestLogger;
use utilityops::services::UserService;
use utilityops::state::AppState;

fn postgres_state(config: AppConfig) -> AppState {
    let db_url = config.database_url.clone().expect("DATABASE_URL must be set");
    info!("Connecting to database");

    // Initialize database schema
    let mut conn = PgConnection::establish(&db_url)
        .expect("Failed to establish connection for migrations");
    conn.batch_execute(DB_INIT_SQL)
        .expect("Failed to execute database initialization script");
    info!("Database initialization complete.");

    let manager = ConnectionManager::<PgConnection>::new(db_url);
    let pool = r2d2::Pool::builder()
        .build(manager)
        .expect("Failed to create database connection pool");

    let mailer = create_mailer(&config);
    AppState::with_pg(pool, config, mailer)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    setup_logger();

    // Load and validate configuration
    let config = AppConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Configuration validation error: {}", e);
        panic!("Invalid configuration: {}", e);
    }

    let host = config.host.clone();
    let port = config.port;
    let workers = config.workers;

    let state = match config.storage_backend {
        StorageBackend::Postgres => postgres_state(config),
        StorageBackend::Memory => {
            warn!("Using the in-memory store; records are lost on restart");
            let mailer = create_mailer(&config);
            AppState::in_memory(config, Arc::new(SystemClock), mailer)
        }
    };
    let state = web::Data::new(state);

    if let Err(e) = UserService::ensure_superuser(&state).await {
        error!("Failed to seed superuser: {}", e);
    }

    info!("Starting HTTP server at http://{}:{}", host, port);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(state.clone())
            .service(web::scope("/api").configure(handlers::configure))
    })
    .keep_alive(std::time::Duration::from_secs(75))
    .shutdown_timeout(30);

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server.bind((host, port))?.run().await
}
