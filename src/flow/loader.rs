//! JSON flow files on disk: one `<flow_id>.json` per flow.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::LoadError;

use super::definition::{FlowConfig, FlowDefinition};
use super::registry::{FlowRegistry, FlowSummary};

fn io_err(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Path of a flow file inside `dir`.
pub fn flow_path(dir: &Path, flow_id: &str) -> PathBuf {
    dir.join(format!("{flow_id}.json"))
}

async fn read_config(path: &Path) -> Result<FlowConfig, LoadError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| io_err(path, e))?;
    serde_json::from_str(&raw).map_err(|source| LoadError::Json {
        path: path.display().to_string(),
        source,
    })
}

async fn read_definition(path: &Path) -> Result<FlowDefinition, LoadError> {
    let config = read_config(path).await?;
    FlowDefinition::from_config(config).map_err(|source| LoadError::Invalid {
        path: path.display().to_string(),
        source,
    })
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| io_err(dir, e))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(dir, e))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load and validate a single flow by id.
pub async fn load_flow(dir: &Path, flow_id: &str) -> Result<FlowDefinition, LoadError> {
    let path = flow_path(dir, flow_id);
    let definition = read_definition(&path).await?;
    if definition.flow_id() != flow_id {
        return Err(LoadError::IdMismatch {
            path: path.display().to_string(),
            declared: definition.flow_id().to_string(),
            expected: flow_id.to_string(),
        });
    }
    Ok(definition)
}

/// Load every `*.json` file in `dir` into a fresh registry.
///
/// Any malformed or invalid file fails the whole load.
pub async fn load_dir(dir: &Path) -> Result<FlowRegistry, LoadError> {
    let mut registry = FlowRegistry::new();
    for path in json_files(dir).await? {
        let definition = read_definition(&path).await?;
        registry
            .register(definition)
            .map_err(|source| LoadError::Invalid {
                path: path.display().to_string(),
                source,
            })?;
    }
    tracing::info!(dir = %dir.display(), flows = registry.len(), "Loaded flows");
    Ok(registry)
}

/// Write a flow as pretty JSON, creating `dir` if needed.
pub async fn save_flow(dir: &Path, definition: &FlowDefinition) -> Result<PathBuf, LoadError> {
    fs::create_dir_all(dir).await.map_err(|e| io_err(dir, e))?;
    let path = flow_path(dir, definition.flow_id());
    let json = serde_json::to_string_pretty(&definition.to_config()).map_err(|source| {
        LoadError::Json {
            path: path.display().to_string(),
            source,
        }
    })?;
    fs::write(&path, json).await.map_err(|e| io_err(&path, e))?;
    tracing::debug!(path = %path.display(), "Saved flow");
    Ok(path)
}

/// Summaries of the flow files in `dir`.
///
/// A missing directory yields an empty list; unreadable files are skipped.
pub async fn list_flow_files(dir: &Path) -> Vec<FlowSummary> {
    if fs::metadata(dir).await.is_err() {
        return Vec::new();
    }
    let paths = match json_files(dir).await {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!("Failed to list flow directory: {}", e);
            return Vec::new();
        }
    };

    let mut summaries = Vec::new();
    for path in paths {
        match read_config(&path).await {
            Ok(config) => summaries.push(FlowSummary {
                flow_id: config.flow_id,
                name: config.name,
                description: config.description,
            }),
            Err(e) => tracing::warn!("Skipping flow file: {}", e),
        }
    }
    summaries
}
