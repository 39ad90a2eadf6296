use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    // Storage
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub bootstrap_schema: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: match env::var("PORT") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("PORT is not a valid port number: {}", raw))?,
                Err(_) => 8080,
            },

            database_url: non_empty_var("DATABASE_URL"),
            supabase_url: non_empty_var("SUPABASE_URL"),
            supabase_key: non_empty_var("SUPABASE_KEY"),
            bootstrap_schema: flag_var("DB_BOOTSTRAP"),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag_var(name: &str) -> bool {
    matches!(
        env::var(name),
        Ok(v) if v.eq_ignore_ascii_case("1") || v.eq_ignore_ascii_case("true")
    )
}
