//! # CLI Command Implementations

use super::DataFormat;
use crate::api::{self, AppState, HttpOEmbedProvider};
use crate::config::Config;
use crate::snapshot::{load_or_create_store, load_store, save_store};
use freshpress_core::{FreshPressError, MemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maximum file size for JSON import (256 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Where the configuration and the snapshot live.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config: PathBuf,
    pub data: Option<PathBuf>,
}

impl Paths {
    /// Load the configuration, applying the `--data` override.
    pub fn load_config(&self) -> Result<Config, FreshPressError> {
        let mut config = Config::load(&self.config)?;
        if let Some(data) = &self.data {
            config.storage.snapshot = data.clone();
        }
        Ok(config)
    }
}

/// Validate file path for reading: resolves `..` and symlinks, and requires
/// a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, FreshPressError> {
    let canonical = path.canonicalize().map_err(|e| {
        FreshPressError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(FreshPressError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Validate output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, FreshPressError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        FreshPressError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(FreshPressError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| FreshPressError::IoError("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

pub async fn cmd_serve(paths: &Paths, host: &str, port: u16) -> Result<(), FreshPressError> {
    let config = paths.load_config()?;
    let store = load_or_create_store(&config.storage.snapshot, &config.site.home)?;
    let provider = HttpOEmbedProvider::from_config(&config.oembed)?;
    let state = AppState::new(&config, store, Arc::new(provider))?;

    println!("FreshPress Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Site:     {}", config.site.name);
    println!("  Home:     {}", config.site.home);
    println!("  Snapshot: {}", config.storage.snapshot.display());
    println!("  Users:    {}", config.users.len());
    println!();
    println!("Endpoints:");
    println!("  ANY  /wp-json/{{route}}  - REST API");
    println!("  GET  /health            - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, state.clone()).await?;

    if let Some(path) = &state.snapshot {
        let store = state.store.lock().await;
        save_store(path, &store)?;
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Key derived from the clock and process id, printed once for the
/// operator to copy.
fn generate_api_key() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seed = format!("{}:{}:{:p}", nanos, std::process::id(), &nanos);
    let digest = blake3::hash(seed.as_bytes()).to_hex();
    let short: String = digest.chars().take(32).collect();
    format!("fp_{}", short)
}

pub fn cmd_init(paths: &Paths, force: bool) -> Result<(), FreshPressError> {
    if paths.config.exists() && !force {
        return Err(FreshPressError::ConfigError(format!(
            "'{}' already exists. Use --force to overwrite.",
            paths.config.display()
        )));
    }
    let config_path = validate_output_path(&paths.config)?;
    let api_key = generate_api_key();
    let mut config = Config::starter(api_key.clone());
    if let Some(data) = &paths.data {
        config.storage.snapshot = data.clone();
    }
    std::fs::write(&config_path, config.to_toml()?)
        .map_err(|e| FreshPressError::IoError(format!("Failed to write config: {}", e)))?;

    let snapshot = match config.storage.snapshot.is_relative() {
        true => config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&config.storage.snapshot),
        false => config.storage.snapshot.clone(),
    };
    let mut store = MemoryStore::new(&config.site.home);
    for user in &config.users {
        store.insert_user(user.to_user());
    }
    save_store(&snapshot, &store)?;

    println!("Initialized FreshPress site");
    println!("  Config:   {}", config_path.display());
    println!("  Snapshot: {}", snapshot.display());
    println!("  Admin API key: {}", api_key);
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub fn cmd_status(paths: &Paths, json_mode: bool) -> Result<(), FreshPressError> {
    let config = paths.load_config()?;
    let store = load_or_create_store(&config.storage.snapshot, &config.site.home)?;
    let stats = store.stats();

    if json_mode {
        let output = serde_json::json!({
            "site": config.site.name,
            "home": config.site.home,
            "snapshot": config.storage.snapshot.to_string_lossy(),
            "posts": stats.posts,
            "comments": stats.comments,
            "terms": stats.terms,
            "users": stats.users,
            "meta": stats.meta,
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        return Ok(());
    }

    println!("FreshPress Status");
    println!("=================");
    println!("Site:     {}", config.site.name);
    println!("Home:     {}", config.site.home);
    println!("Snapshot: {}", config.storage.snapshot.display());
    println!();
    println!("Posts:    {}", stats.posts);
    println!("Comments: {}", stats.comments);
    println!("Terms:    {}", stats.terms);
    println!("Users:    {}", stats.users);
    println!("Meta:     {}", stats.meta);
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

pub fn cmd_export(paths: &Paths, output: &Path, format: DataFormat) -> Result<(), FreshPressError> {
    let config = paths.load_config()?;
    let store = load_or_create_store(&config.storage.snapshot, &config.site.home)?;
    let output = validate_output_path(output)?;
    match format {
        DataFormat::Snapshot => save_store(&output, &store)?,
        DataFormat::Json => {
            let text = serde_json::to_string_pretty(&store)
                .map_err(|e| FreshPressError::SerializationError(e.to_string()))?;
            std::fs::write(&output, text)
                .map_err(|e| FreshPressError::IoError(format!("Failed to write export: {}", e)))?;
        }
    }
    println!("Exported store to {}", output.display());
    Ok(())
}

pub fn cmd_import(paths: &Paths, input: &Path, format: DataFormat) -> Result<(), FreshPressError> {
    let config = paths.load_config()?;
    let input = validate_file_path(input)?;
    let store = match format {
        DataFormat::Snapshot => load_store(&input)?,
        DataFormat::Json => {
            let metadata = std::fs::metadata(&input)
                .map_err(|e| FreshPressError::IoError(format!("Cannot read file metadata: {}", e)))?;
            if metadata.len() > MAX_IMPORT_FILE_SIZE {
                return Err(FreshPressError::SerializationError(format!(
                    "File size {} bytes exceeds maximum allowed {} bytes",
                    metadata.len(),
                    MAX_IMPORT_FILE_SIZE
                )));
            }
            let text = std::fs::read_to_string(&input)
                .map_err(|e| FreshPressError::IoError(format!("Failed to read import: {}", e)))?;
            serde_json::from_str::<MemoryStore>(&text)
                .map_err(|e| FreshPressError::SerializationError(e.to_string()))?
        }
    };
    save_store(&config.storage.snapshot, &store)?;
    let stats = store.stats();
    println!(
        "Imported {} posts, {} comments and {} terms into {}",
        stats.posts,
        stats.comments,
        stats.terms,
        config.storage.snapshot.display()
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn init_then_export_and_import_json() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            config: dir.path().join("freshpress.toml"),
            data: None,
        };
        cmd_init(&paths, false).unwrap();
        assert!(cmd_init(&paths, false).is_err());

        let config = paths.load_config().unwrap();
        assert_eq!(config.users.len(), 1);
        assert!(config.users[0].api_key.starts_with("fp_"));
        let store = load_store(&config.storage.snapshot).unwrap();
        assert_eq!(store.stats().users, 1);

        let exported = dir.path().join("export.json");
        cmd_export(&paths, &exported, DataFormat::Json).unwrap();
        std::fs::remove_file(&config.storage.snapshot).unwrap();
        cmd_import(&paths, &exported, DataFormat::Json).unwrap();
        assert_eq!(load_store(&config.storage.snapshot).unwrap(), store);
    }

    #[test]
    fn data_flag_overrides_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("freshpress.toml");
        std::fs::write(&config_path, "").unwrap();
        let paths = Paths {
            config: config_path,
            data: Some(dir.path().join("other.snap")),
        };
        assert_eq!(paths.load_config().unwrap().storage.snapshot, dir.path().join("other.snap"));
    }

    #[test]
    fn generated_keys_are_long_enough() {
        assert!(generate_api_key().len() >= crate::config::MIN_API_KEY_LEN);
    }
}
