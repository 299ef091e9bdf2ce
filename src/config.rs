use diesel::r2d2::{self, ConnectionManager};
use diesel::pg::PgConnection;
use std::env;
use std::str::FromStr;
use log::warn;

// Type aliases
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

// Database initialization SQL. Constraint names are matched by the store's
// error mapping, keep them in sync with store::pg.
pub const DB_INIT_SQL: &str = r#"
-- Create tables if they don't exist
CREATE TABLE IF NOT EXISTS role (
    id SERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL CONSTRAINT role_name_key UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS permission (
    id SERIAL PRIMARY KEY,
    role_id INTEGER NOT NULL,
    page VARCHAR(100) NOT NULL,
    can_view BOOLEAN NOT NULL DEFAULT FALSE,
    can_add BOOLEAN NOT NULL DEFAULT FALSE,
    can_edit BOOLEAN NOT NULL DEFAULT FALSE,
    can_delete BOOLEAN NOT NULL DEFAULT FALSE,
    is_login_page BOOLEAN NOT NULL DEFAULT FALSE,
    CONSTRAINT permission_role_page_key UNIQUE (role_id, page)
);

CREATE UNIQUE INDEX IF NOT EXISTS permission_one_login_page
    ON permission (role_id) WHERE is_login_page;

CREATE TABLE IF NOT EXISTS app_user (
    id SERIAL PRIMARY KEY,
    email VARCHAR(254) NOT NULL CONSTRAINT app_user_email_key UNIQUE,
    username VARCHAR(150) NOT NULL CONSTRAINT app_user_username_key UNIQUE,
    first_name VARCHAR(150) NOT NULL DEFAULT '',
    last_name VARCHAR(150) NOT NULL DEFAULT '',
    avatar VARCHAR(255),
    role_id INTEGER,
    is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
    is_staff BOOLEAN NOT NULL DEFAULT FALSE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    password_hash VARCHAR(255) NOT NULL,
    date_joined TIMESTAMP NOT NULL DEFAULT NOW(),
    last_login TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS area (
    id SERIAL PRIMARY KEY,
    area_name VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS complaint (
    id SERIAL PRIMARY KEY,
    area_id INTEGER NOT NULL,
    serial_no VARCHAR(20) NOT NULL CONSTRAINT complaint_serial_no_key UNIQUE,
    complaint_type VARCHAR(255) NOT NULL,
    ticket_number VARCHAR(20) NOT NULL CONSTRAINT complaint_ticket_number_key UNIQUE,
    name VARCHAR(255) NOT NULL,
    date DATE NOT NULL DEFAULT CURRENT_DATE,
    address TEXT NOT NULL,
    phone_number VARCHAR(15) NOT NULL,
    department VARCHAR(255) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'processing',
    created_by INTEGER
);

CREATE TABLE IF NOT EXISTS connection_type (
    id SERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL CONSTRAINT connection_type_name_key UNIQUE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS connection (
    id SERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    address TEXT NOT NULL,
    file_number VARCHAR(100) NOT NULL CONSTRAINT connection_file_number_key UNIQUE,
    area VARCHAR(255) NOT NULL,
    connection_type_id INTEGER NOT NULL,
    status VARCHAR(30) NOT NULL DEFAULT 'assistant_engineer',
    created_by INTEGER,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS conversion (
    id SERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    address TEXT NOT NULL,
    file_number VARCHAR(100) NOT NULL CONSTRAINT conversion_file_number_key UNIQUE,
    area VARCHAR(255) NOT NULL,
    from_connection_type_id INTEGER NOT NULL,
    to_connection_type_id INTEGER NOT NULL,
    created_by INTEGER,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS valve (
    id SERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    size VARCHAR(50) NOT NULL,
    full_open_condition VARCHAR(255) NOT NULL,
    current_condition VARCHAR(255) NOT NULL,
    remarks TEXT NOT NULL DEFAULT '',
    previous_position VARCHAR(255),
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    location_type VARCHAR(20) NOT NULL DEFAULT 'coordinates',
    location_link VARCHAR(500),
    created_by INTEGER
);

CREATE TABLE IF NOT EXISTS valve_log (
    id SERIAL PRIMARY KEY,
    valve_id INTEGER NOT NULL,
    user_id INTEGER,
    changed_field VARCHAR(100) NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    timestamp TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS expiring_entry (
    key VARCHAR(255) PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at TIMESTAMP NOT NULL
);

-- Add foreign keys if not exist
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_permission_role'
    ) THEN
        ALTER TABLE permission ADD CONSTRAINT fk_permission_role
        FOREIGN KEY (role_id) REFERENCES role(id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_app_user_role'
    ) THEN
        ALTER TABLE app_user ADD CONSTRAINT fk_app_user_role
        FOREIGN KEY (role_id) REFERENCES role(id) ON DELETE SET NULL;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_complaint_area'
    ) THEN
        ALTER TABLE complaint ADD CONSTRAINT fk_complaint_area
        FOREIGN KEY (area_id) REFERENCES area(id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_complaint_created_by'
    ) THEN
        ALTER TABLE complaint ADD CONSTRAINT fk_complaint_created_by
        FOREIGN KEY (created_by) REFERENCES app_user(id) ON DELETE SET NULL;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_connection_type'
    ) THEN
        ALTER TABLE connection ADD CONSTRAINT fk_connection_type
        FOREIGN KEY (connection_type_id) REFERENCES connection_type(id) ON DELETE RESTRICT;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_connection_created_by'
    ) THEN
        ALTER TABLE connection ADD CONSTRAINT fk_connection_created_by
        FOREIGN KEY (created_by) REFERENCES app_user(id) ON DELETE SET NULL;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_conversion_from_type'
    ) THEN
        ALTER TABLE conversion ADD CONSTRAINT fk_conversion_from_type
        FOREIGN KEY (from_connection_type_id) REFERENCES connection_type(id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_conversion_to_type'
    ) THEN
        ALTER TABLE conversion ADD CONSTRAINT fk_conversion_to_type
        FOREIGN KEY (to_connection_type_id) REFERENCES connection_type(id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_conversion_created_by'
    ) THEN
        ALTER TABLE conversion ADD CONSTRAINT fk_conversion_created_by
        FOREIGN KEY (created_by) REFERENCES app_user(id) ON DELETE SET NULL;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_valve_created_by'
    ) THEN
        ALTER TABLE valve ADD CONSTRAINT fk_valve_created_by
        FOREIGN KEY (created_by) REFERENCES app_user(id) ON DELETE SET NULL;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_valve_log_valve'
    ) THEN
        ALTER TABLE valve_log ADD CONSTRAINT fk_valve_log_valve
        FOREIGN KEY (valve_id) REFERENCES valve(id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'fk_valve_log_user'
    ) THEN
        ALTER TABLE valve_log ADD CONSTRAINT fk_valve_log_user
        FOREIGN KEY (user_id) REFERENCES app_user(id) ON DELETE SET NULL;
    END IF;
END $$;

CREATE INDEX IF NOT EXISTS expiring_entry_expires_at_idx ON expiring_entry (expires_at);
"#;

const DEFAULT_JWT_SECRET: &str = "your_jwt_secret_key_here";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("Unknown STORAGE_BACKEND '{}'", other)),
        }
    }
}

// Config
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub database_url: Option<String>,
    pub storage_backend: StorageBackend,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub bcrypt_cost: u32,
    pub frontend_url: String,
    pub default_from_email: String,
    pub mail_relay_url: Option<String>,
    /// Seeds a superuser at startup when both are set and the email is unused.
    pub superuser_email: Option<String>,
    pub superuser_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: None,
            database_url: None,
            storage_backend: StorageBackend::Postgres,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            access_token_minutes: 60,
            refresh_token_days: 7,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            frontend_url: "http://localhost:3000".to_string(),
            default_from_email: "no-reply@localhost".to_string(),
            mail_relay_url: None,
            superuser_email: None,
            superuser_password: None,
        }
    }
}

fn parsed<T: FromStr>(name: &str, fallback: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}='{}'", name, raw);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(val) => val,
            Err(e) => {
                warn!("Failed to load JWT_SECRET: {}", e);
                warn!("Using default JWT secret - THIS IS NOT SECURE FOR PRODUCTION!");
                defaults.jwt_secret.clone()
            }
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}, falling back to postgres", e);
                StorageBackend::Postgres
            }),
            Err(_) => defaults.storage_backend,
        };

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port),
            workers: env::var("WORKERS").ok().and_then(|v| v.parse::<usize>().ok()),
            database_url: env::var("DATABASE_URL").ok(),
            storage_backend,
            jwt_secret,
            access_token_minutes: parsed("ACCESS_TOKEN_MINUTES", defaults.access_token_minutes),
            refresh_token_days: parsed("REFRESH_TOKEN_DAYS", defaults.refresh_token_days),
            bcrypt_cost: parsed("BCRYPT_COST", defaults.bcrypt_cost),
            frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            default_from_email: env::var("DEFAULT_FROM_EMAIL").unwrap_or(defaults.default_from_email),
            mail_relay_url: env::var("MAIL_RELAY_URL").ok().filter(|url| !url.trim().is_empty()),
            superuser_email: env::var("SUPERUSER_EMAIL").ok().filter(|email| !email.trim().is_empty()),
            superuser_password: env::var("SUPERUSER_PASSWORD").ok().filter(|pw| !pw.is_empty()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret == DEFAULT_JWT_SECRET {
            warn!("Using default JWT secret is not secure for production!");
        }

        if self.access_token_minutes <= 0 {
            return Err("ACCESS_TOKEN_MINUTES must be positive".to_string());
        }

        if self.refresh_token_days <= 0 {
            return Err("REFRESH_TOKEN_DAYS must be positive".to_string());
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err("BCRYPT_COST must be between 4 and 31".to_string());
        }

        if self.storage_backend == StorageBackend::Postgres && self.database_url.is_none() {
            return Err("DATABASE_URL must be set for the postgres backend".to_string());
        }

        if self.superuser_email.is_some() != self.superuser_password.is_some() {
            return Err("SUPERUSER_EMAIL and SUPERUSER_PASSWORD must be set together".to_string());
        }

        if self.workers == Some(0) {
            return Err("WORKERS must be positive".to_string());
        }

        Ok(())
    }

    /// The login page linked from provisioning emails.
    pub fn login_url(&self) -> String {
        format!("{}/login", self.frontend_url.trim_end_matches('/'))
    }
}
