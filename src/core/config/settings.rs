use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_number, parse_positive_u64, parse_store_backend,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, RuntimeSettings, SchedulerSettings,
    SecuritySettings, ServerHost, ServerPort, ServerSettings, Settings, StoreBackend,
    StoreSettings, TelemetrySettings,
};

const SUPPORTED_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("ATTEMPTS_HOST", "0.0.0.0");
        let port = env_or_default("ATTEMPTS_PORT", "8000");

        let environment = parse_environment(
            env_optional("ATTEMPTS_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config =
            env_optional("ATTEMPTS_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Exam Attempts API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");
        let default_list_limit = parse_positive_u64(
            "DEFAULT_LIST_LIMIT",
            env_or_default("DEFAULT_LIST_LIMIT", "100"),
        )? as i64;

        let secret_from_env = env_optional("SECRET_KEY");
        if strict_config && secret_from_env.is_none() {
            return Err(ConfigError::MissingSecret("SECRET_KEY"));
        }
        let secret_key = match secret_from_env {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };
        let algorithm = env_or_default("ALGORITHM", "HS256").to_ascii_uppercase();

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let backend = parse_store_backend(env_optional("ATTEMPT_STORE"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_number("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "attempts");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "exam_attempts");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_number(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "20"),
        )?;
        let migrations_dir = env_or_default("MIGRATIONS_DIR", "migrations");

        let sweep_interval_seconds = parse_positive_u64(
            "SCHEDULER_SWEEP_INTERVAL_SECONDS",
            env_or_default("SCHEDULER_SWEEP_INTERVAL_SECONDS", "30"),
        )?;

        let log_level = env_or_default("ATTEMPTS_LOG_LEVEL", "info");
        let json =
            env_optional("ATTEMPTS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str, default_list_limit },
            security: SecuritySettings { secret_key, algorithm },
            cors: CorsSettings { origins: cors_origins },
            store: StoreSettings { backend },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
                migrations_dir,
            },
            scheduler: SchedulerSettings { sweep_interval_seconds },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn scheduler(&self) -> &SchedulerSettings {
        &self.scheduler
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_ALGORITHMS.contains(&self.security.algorithm.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "ALGORITHM",
                value: self.security.algorithm.clone(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if !self.api.api_v1_str.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "API_V1_STR",
                value: self.api.api_v1_str.clone(),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.store.backend == StoreBackend::Postgres
            && self.database.database_url.is_none()
            && self.database.postgres_password.is_empty()
        {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        if self.store.backend == StoreBackend::Memory && self.runtime.environment.is_production() {
            return Err(ConfigError::InvalidValue {
                field: "ATTEMPT_STORE",
                value: StoreBackend::Memory.as_str().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::types::Environment;
    use crate::test_support;

    #[tokio::test]
    async fn load_uses_defaults_for_optional_values() {
        let _lock = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::remove_var("SCHEDULER_SWEEP_INTERVAL_SECONDS");
        std::env::remove_var("DEFAULT_LIST_LIMIT");

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.scheduler().sweep_interval_seconds, 30);
        assert_eq!(settings.api().default_list_limit, 100);
        assert_eq!(settings.api().api_v1_str, "/api/v1");
        assert_eq!(settings.security().algorithm, "HS256");
        assert_eq!(settings.runtime().environment, Environment::Test);
    }

    #[tokio::test]
    async fn strict_mode_requires_secret_key() {
        let _lock = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("ATTEMPTS_STRICT_CONFIG", "1");
        std::env::remove_var("SECRET_KEY");

        let result = Settings::load();

        std::env::remove_var("ATTEMPTS_STRICT_CONFIG");
        assert!(matches!(result, Err(ConfigError::MissingSecret("SECRET_KEY"))));
    }

    #[tokio::test]
    async fn strict_mode_requires_database_credentials_for_postgres() {
        let _lock = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("ATTEMPTS_STRICT_CONFIG", "true");
        std::env::set_var("ATTEMPT_STORE", "postgres");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("POSTGRES_PASSWORD");

        let result = Settings::load();

        std::env::remove_var("ATTEMPTS_STRICT_CONFIG");
        std::env::set_var("ATTEMPT_STORE", "memory");
        assert!(matches!(result, Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"))));
    }

    #[tokio::test]
    async fn rejects_unsupported_algorithm() {
        let _lock = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("ALGORITHM", "RS256");

        let result = Settings::load();

        std::env::set_var("ALGORITHM", "HS256");
        assert!(matches!(result, Err(ConfigError::InvalidValue { field: "ALGORITHM", .. })));
    }
}
