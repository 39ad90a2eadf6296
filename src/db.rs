use crate::config::Config;
use crate::models::TranslationItem;
use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Url};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

const TABLE: &str = "TranslationItems";
const MEMORY_DATABASE_URL: &str = "memory";

pub struct Database {
    supabase: Option<SupabaseDatabase>,
    postgres: Option<PgPool>,
    memory: Option<MemoryStore>,
}

struct SupabaseDatabase {
    client: Client,
    supabase_url: String,
    supabase_key: String,
}

#[derive(Default)]
struct MemoryStore {
    items: RwLock<Vec<TranslationItem>>,
}

fn is_retryable_db_error(err: &anyhow::Error) -> bool {
    let msg = format!("{:?}", err).to_ascii_lowercase();
    msg.contains("pool timed out")
        || msg.contains("operation timed out")
        || msg.contains("connection timed out")
        || msg.contains("connection refused")
        || msg.contains("error connecting")
        || msg.contains("prepared statement")
}

/**
 * escape_like
 * PostgREST 的 ilike 会把 `%` `_` 当作通配符，这里转义后只做大小写无关的等值比较。
 */
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Splits a schema script on `;`, skipping `--` comments and semicolons inside quotes.
fn split_sql_statements(input: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if !in_single && chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                current.push('\n');
            }
            '\'' => {
                in_single = !in_single;
                current.push(c);
            }
            ';' if !in_single => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

async fn list_pg(pool: &PgPool, language: &str) -> Result<Vec<TranslationItem>> {
    let rows = sqlx::query_as::<_, TranslationItem>(
        "SELECT key, language, value \
         FROM \"TranslationItems\" \
         WHERE lower(language) = lower($1)",
    )
    .persistent(false)
    .bind(language)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn get_pg(pool: &PgPool, language: &str, key: &str) -> Result<Option<TranslationItem>> {
    let row = sqlx::query_as::<_, TranslationItem>(
        "SELECT key, language, value \
         FROM \"TranslationItems\" \
         WHERE key = $1 AND language = $2 \
         LIMIT 1",
    )
    .persistent(false)
    .bind(key)
    .bind(language)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

async fn key_exists_pg(pool: &PgPool, key: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM \"TranslationItems\" WHERE key = $1)")
            .persistent(false)
            .bind(key)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

impl MemoryStore {
    async fn list(&self, language: &str) -> Vec<TranslationItem> {
        let wanted = language.to_lowercase();
        self.items
            .read()
            .await
            .iter()
            .filter(|item| item.language.to_lowercase() == wanted)
            .cloned()
            .collect()
    }

    async fn get(&self, language: &str, key: &str) -> Option<TranslationItem> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.key == key && item.language == language)
            .cloned()
    }

    async fn key_exists(&self, key: &str) -> bool {
        self.items.read().await.iter().any(|item| item.key == key)
    }

    async fn insert(&self, item: TranslationItem) -> Option<TranslationItem> {
        let mut items = self.items.write().await;
        if items.iter().any(|existing| existing.key == item.key) {
            return None;
        }
        items.push(item.clone());
        Some(item)
    }

    async fn delete(&self, language: &str, key: &str) -> bool {
        let mut items = self.items.write().await;
        match items
            .iter()
            .position(|item| item.key == key && item.language == language)
        {
            Some(idx) => {
                items.remove(idx);
                true
            }
            None => false,
        }
    }
}

impl SupabaseDatabase {
    fn table_url(&self) -> Result<Url> {
        let url = Url::parse(&format!("{}/rest/v1/{}", self.supabase_url, TABLE))?;
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.supabase_key)
            .header("Authorization", format!("Bearer {}", self.supabase_key))
            .header("Accept", "application/json")
    }

    async fn fetch_rows(&self, url: Url, what: &str) -> Result<Vec<TranslationItem>> {
        let response = self.request(Method::GET, url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to fetch {}: {}. Body: {}",
                what,
                status,
                body
            ));
        }

        let rows: Vec<TranslationItem> = response.json().await?;
        Ok(rows)
    }

    async fn list(&self, language: &str) -> Result<Vec<TranslationItem>> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("select", "key,language,value")
            .append_pair("language", &format!("ilike.{}", escape_like(language)));
        self.fetch_rows(url, "translation items").await
    }

    async fn get(&self, language: &str, key: &str) -> Result<Option<TranslationItem>> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("select", "key,language,value")
            .append_pair("key", &format!("eq.{}", key))
            .append_pair("language", &format!("eq.{}", language))
            .append_pair("limit", "1");
        let rows = self.fetch_rows(url, "translation item").await?;
        Ok(rows.into_iter().next())
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("select", "key,language,value")
            .append_pair("key", &format!("eq.{}", key))
            .append_pair("limit", "1");
        let rows = self.fetch_rows(url, "translation key").await?;
        Ok(!rows.is_empty())
    }

    async fn insert(&self, item: &TranslationItem) -> Result<Option<TranslationItem>> {
        let mut url = self.table_url()?;
        url.query_pairs_mut().append_pair("on_conflict", "key");

        let response = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation,resolution=ignore-duplicates")
            .json(&[item])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to create translation item: {}. Body: {}",
                status,
                body
            ));
        }

        let rows: Vec<TranslationItem> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, language: &str, key: &str) -> Result<bool> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("key", &format!("eq.{}", key))
            .append_pair("language", &format!("eq.{}", language));

        let response = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to delete translation item: {}. Body: {}",
                status,
                body
            ));
        }

        let rows: Vec<TranslationItem> = response.json().await?;
        Ok(!rows.is_empty())
    }
}

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        if config.database_url.as_deref() == Some(MEMORY_DATABASE_URL) {
            return Ok(Self::in_memory());
        }

        let supabase = match (&config.supabase_url, &config.supabase_key) {
            (Some(supabase_url), Some(supabase_key)) => {
                let client = Client::builder()
                    .connect_timeout(Duration::from_secs(3))
                    .timeout(Duration::from_secs(8))
                    .http1_only()
                    .build()
                    .context("Failed to build HTTP client")?;
                Some(SupabaseDatabase {
                    client,
                    supabase_url: supabase_url.trim_end_matches('/').to_string(),
                    supabase_key: supabase_key.clone(),
                })
            }
            _ => None,
        };

        let postgres = match &config.database_url {
            Some(url) => {
                let options = PgConnectOptions::from_str(url)
                    .context("DATABASE_URL is not a valid Postgres connection string")?
                    .statement_cache_capacity(0);
                Some(
                    PgPoolOptions::new()
                        .max_connections(10)
                        .min_connections(1)
                        .acquire_timeout(Duration::from_secs(8))
                        .test_before_acquire(true)
                        .connect_lazy_with(options),
                )
            }
            None => None,
        };

        if postgres.is_none() && supabase.is_none() {
            anyhow::bail!("DATABASE_URL or (SUPABASE_URL + SUPABASE_KEY) must be set");
        }

        Ok(Self {
            supabase,
            postgres,
            memory: None,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            supabase: None,
            postgres: None,
            memory: Some(MemoryStore::default()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        if self.memory.is_some() {
            "memory"
        } else if self.postgres.is_some() && self.supabase.is_some() {
            "postgres (supabase fallback)"
        } else if self.postgres.is_some() {
            "postgres"
        } else {
            "supabase"
        }
    }

    fn supabase(&self) -> Result<&SupabaseDatabase> {
        self.supabase
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No database configured"))
    }

    /**
     * read_pg
     * 在 Postgres 上执行只读查询：可重试错误先重试一次；若配置了 Supabase 则直接降级（返回 None）。
     */
    async fn read_pg<T, F, Fut>(&self, query: F) -> Option<Result<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retried = false;
        loop {
            match query().await {
                Ok(value) => return Some(Ok(value)),
                Err(e) if is_retryable_db_error(&e) && self.supabase.is_some() => {
                    log::warn!("Postgres unavailable, falling back to Supabase: {:#}", e);
                    return None;
                }
                Err(e) if is_retryable_db_error(&e) && !retried => {
                    log::warn!("Retrying Postgres query after: {:#}", e);
                    retried = true;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    pub async fn list_translation_items(&self, language: &str) -> Result<Vec<TranslationItem>> {
        if let Some(memory) = &self.memory {
            return Ok(memory.list(language).await);
        }

        if let Some(pool) = &self.postgres {
            if let Some(result) = self.read_pg(|| list_pg(pool, language)).await {
                return result;
            }
        }

        self.supabase()?.list(language).await
    }

    pub async fn get_translation_item(
        &self,
        language: &str,
        key: &str,
    ) -> Result<Option<TranslationItem>> {
        if let Some(memory) = &self.memory {
            return Ok(memory.get(language, key).await);
        }

        if let Some(pool) = &self.postgres {
            if let Some(result) = self.read_pg(|| get_pg(pool, language, key)).await {
                return result;
            }
        }

        self.supabase()?.get(language, key).await
    }

    /// Any language counts: keys are unique across the whole table.
    pub async fn translation_key_exists(&self, key: &str) -> Result<bool> {
        if let Some(memory) = &self.memory {
            return Ok(memory.key_exists(key).await);
        }

        if let Some(pool) = &self.postgres {
            if let Some(result) = self.read_pg(|| key_exists_pg(pool, key)).await {
                return result;
            }
        }

        self.supabase()?.key_exists(key).await
    }

    /// Insert-if-absent. `None` means another item already owns the key.
    pub async fn insert_translation_item(
        &self,
        item: TranslationItem,
    ) -> Result<Option<TranslationItem>> {
        if let Some(memory) = &self.memory {
            return Ok(memory.insert(item).await);
        }

        if let Some(pool) = &self.postgres {
            let row = sqlx::query_as::<_, TranslationItem>(
                "INSERT INTO \"TranslationItems\" (key, language, value) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING \
                 RETURNING key, language, value",
            )
            .persistent(false)
            .bind(&item.key)
            .bind(&item.language)
            .bind(&item.value)
            .fetch_optional(pool)
            .await?;
            return Ok(row);
        }

        self.supabase()?.insert(&item).await
    }

    pub async fn delete_translation_item(&self, language: &str, key: &str) -> Result<bool> {
        if let Some(memory) = &self.memory {
            return Ok(memory.delete(language, key).await);
        }

        if let Some(pool) = &self.postgres {
            let res = sqlx::query("DELETE FROM \"TranslationItems\" WHERE key = $1 AND language = $2")
                .persistent(false)
                .bind(key)
                .bind(language)
                .execute(pool)
                .await?;
            return Ok(res.rows_affected() > 0);
        }

        self.supabase()?.delete(language, key).await
    }

    /**
     * bootstrap_schema
     * 直连 Postgres 时执行 database_schema.sql 建表（开发环境使用）；内存存储无需建表。
     */
    pub async fn bootstrap_schema(&self) -> Result<()> {
        if self.memory.is_some() {
            return Ok(());
        }

        let pool = self
            .postgres
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Postgres is not configured"))?;

        let sql = include_str!("../database_schema.sql");
        for stmt in split_sql_statements(sql) {
            sqlx::query(&stmt)
                .persistent(false)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to run schema statement: {}", stmt))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, language: &str, value: &str) -> TranslationItem {
        TranslationItem {
            key: key.to_string(),
            language: language.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("en"), "en");
        assert_eq!(escape_like("e_%"), "e\\_\\%");
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "-- comment; not a statement\nCREATE TABLE a (v text DEFAULT ';');\n\nCREATE INDEX i ON a (v);\n";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (v text DEFAULT ';')");
        assert_eq!(statements[1], "CREATE INDEX i ON a (v)");
    }

    #[test]
    fn test_bundled_schema_statements() {
        let statements = split_sql_statements(include_str!("../database_schema.sql"));
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"TranslationItems\""));
    }

    #[test]
    fn test_new_requires_a_backend() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: None,
            supabase_url: None,
            supabase_key: None,
            bootstrap_schema: false,
        };
        assert!(Database::new(&config).is_err());

        let config = Config {
            database_url: Some("memory".to_string()),
            ..config
        };
        assert_eq!(Database::new(&config).unwrap().backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_insert_is_insert_if_absent() {
        let db = Database::in_memory();
        let first = db
            .insert_translation_item(item("greeting", "en", "Hello"))
            .await
            .unwrap();
        assert_eq!(first, Some(item("greeting", "en", "Hello")));

        let second = db
            .insert_translation_item(item("greeting", "sv", "Hej"))
            .await
            .unwrap();
        assert_eq!(second, None);
        assert!(db.translation_key_exists("greeting").await.unwrap());
        assert!(!db.translation_key_exists("farewell").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_list_is_case_insensitive_and_ordered() {
        let db = Database::in_memory();
        for it in [
            item("b", "en", "B"),
            item("a", "sv", "A"),
            item("c", "EN", "C"),
        ] {
            db.insert_translation_item(it).await.unwrap();
        }

        let keys: Vec<String> = db
            .list_translation_items("en")
            .await
            .unwrap()
            .into_iter()
            .map(|it| it.key)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_memory_get_and_delete_are_exact() {
        let db = Database::in_memory();
        db.insert_translation_item(item("greeting", "en", "Hello"))
            .await
            .unwrap();

        assert!(db.get_translation_item("EN", "greeting").await.unwrap().is_none());
        assert!(db.get_translation_item("en", "Greeting").await.unwrap().is_none());
        assert!(!db.delete_translation_item("sv", "greeting").await.unwrap());

        assert!(db.delete_translation_item("en", "greeting").await.unwrap());
        assert!(db.get_translation_item("en", "greeting").await.unwrap().is_none());
        assert!(!db.delete_translation_item("en", "greeting").await.unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_is_noop_for_memory() {
        assert!(Database::in_memory().bootstrap_schema().await.is_ok());
    }
}
