//! logger.rs
//! Configuración del logger usando env_logger.

/// Filtro por defecto: info para la app, sin el ruido de cada query de sqlx.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

pub fn init_logger() {
    let log_env = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_env))
        .format_timestamp_secs()
        .init();
}

/// Para tests: puede llamarse muchas veces, sólo el primero inicializa.
#[cfg(test)]
pub fn init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_FILTER))
        .is_test(true)
        .try_init();
}
