use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
    /// Shared secret the session gateway presents as `Authorization: Bearer`.
    /// Unset or empty disables the check.
    pub service_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Share of the final fit score taken by the embedding similarity.
    pub semantic_weight: f64,
    pub default_limit: usize,
    pub max_limit: usize,
    pub embedding_cache_size: usize,
    /// `hashing` or `none`.
    pub embedding_provider: String,
    pub embedding_dims: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub purge_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: Option<SecurityConfig>,
    pub api: ApiConfig,
    pub matching: MatchingConfig,
    pub audit: AuditConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl AppConfig {
    /// The service token, if one is configured and non-empty.
    pub fn service_token(&self) -> Option<&str> {
        self.security
            .as_ref()
            .and_then(|s| s.service_token.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Clamps a requested page size into `1..=max_page_size`, falling back to the default.
    pub fn page_size(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(n) if n > 0 => n.min(self.api.max_page_size),
            _ => self.api.default_page_size,
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: carelink.toml (in CWD)
        .add_source(::config::File::with_name("carelink").required(false));

    if let Ok(custom_path) = std::env::var("CARELINK_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("CARELINK").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Database
    if cfg.database.max_connections == 0 {
        return Err(anyhow::anyhow!("database.max_connections must be > 0"));
    }

    // Paging
    if cfg.api.default_page_size <= 0 || cfg.api.max_page_size <= 0 {
        return Err(anyhow::anyhow!("api page sizes must be > 0"));
    }
    if cfg.api.default_page_size > cfg.api.max_page_size {
        return Err(anyhow::anyhow!("api.default_page_size must be <= api.max_page_size"));
    }

    // Matching
    let w = cfg.matching.semantic_weight;
    if !w.is_finite() || !(0.0..=1.0).contains(&w) {
        return Err(anyhow::anyhow!("matching.semantic_weight must be in 0.0..=1.0, got {}", w));
    }
    if cfg.matching.default_limit == 0 || cfg.matching.max_limit == 0 {
        return Err(anyhow::anyhow!("matching limits must be > 0"));
    }
    if cfg.matching.default_limit > cfg.matching.max_limit {
        return Err(anyhow::anyhow!("matching.default_limit must be <= matching.max_limit"));
    }
    if cfg.matching.embedding_cache_size == 0 {
        return Err(anyhow::anyhow!("matching.embedding_cache_size must be > 0"));
    }
    match cfg.matching.embedding_provider.as_str() {
        "none" => {}
        "hashing" if cfg.matching.embedding_dims > 0 => {}
        "hashing" => return Err(anyhow::anyhow!("matching.embedding_dims must be > 0")),
        other => return Err(anyhow::anyhow!("unknown matching.embedding_provider '{}'", other)),
    }

    // Audit
    if cfg.audit.retention_days == 0 {
        return Err(anyhow::anyhow!("audit.retention_days must be > 0"));
    }
    if cfg.audit.purge_interval_secs < 60 {
        return Err(anyhow::anyhow!("audit.purge_interval_secs must be >= 60"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // sqlite:///C:/... on Windows: drop the leading '/' before a drive letter
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
