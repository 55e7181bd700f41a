//! Module loading through spawned workers
//!
//! Covers both link variants with modules described by files on disk, and
//! the ways a load can fail before the worker ever becomes ready.

use anyhow::Result;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

use chunkworker_execution::{Backend, Controller, ControllerConfig, ExecutionError};
use chunkworker_runtime::{ModuleLoader, ModuleRegistry, ModuleSource};

fn write_file(contents: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

fn locator(file: &NamedTempFile) -> String {
    file.path().display().to_string()
}

fn controller(source: ModuleSource) -> Controller {
    let registry = Arc::new(ModuleRegistry::with_builtin_modules());
    Controller::new(
        ControllerConfig::new(source),
        Backend::thread(Arc::new(ModuleLoader::new(registry))),
    )
}

#[tokio::test]
async fn test_externally_linked_module_uses_palette() -> Result<()> {
    let palette = vec![3u8, 1, 4, 1, 5];
    let binary = write_file(&palette)?;
    let manifest = write_file(
        json!({
            "name": "islands",
            "version": "2.1.0",
            "entry": "terrain",
            "resource_sha256": hex::encode(Sha256::digest(&palette)),
        })
        .to_string()
        .as_bytes(),
    )?;

    let handle = controller(ModuleSource::externally_linked(
        locator(&manifest),
        locator(&binary),
    ))
    .spawn()
    .await?;

    let module = handle.module().clone();
    assert_eq!(module.name, "islands");
    assert_eq!(module.version, "2.1.0");
    assert_eq!(module.variant, "externally_linked");
    assert_eq!(module.resource_bytes, palette.len());

    handle.configure(json!({ "seed": 42, "chunk_size": 4 })).await?;
    let chunk = handle.submit(json!({ "x": 2, "y": -1 })).await?;
    let materials = chunk["materials"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    assert_eq!(materials.len(), 16);
    assert!(materials
        .iter()
        .filter_map(|m| m.as_u64())
        .all(|m| palette.contains(&(m as u8))));

    handle.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_self_initializing_manifest_from_file() -> Result<()> {
    let manifest = write_file(json!({ "name": "plains", "entry": "terrain" }).to_string().as_bytes())?;

    let handle = controller(ModuleSource::self_initializing(locator(&manifest)))
        .spawn()
        .await?;
    assert_eq!(handle.module().name, "plains");
    assert_eq!(handle.module().variant, "self_initializing");
    assert_eq!(handle.module().resource_bytes, 0);

    handle.configure(json!({ "seed": 1 })).await?;
    let chunk = handle.submit(json!({ "x": 0, "y": 0 })).await?;
    assert!(chunk.get("materials").is_none());

    handle.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_checksum_mismatch_fails_spawn() -> Result<()> {
    let binary = write_file(&[9, 9, 9])?;
    let manifest = write_file(
        json!({
            "name": "tampered",
            "entry": "terrain",
            "resource_sha256": hex::encode(Sha256::digest(b"something else")),
        })
        .to_string()
        .as_bytes(),
    )?;

    let result = controller(ModuleSource::externally_linked(
        locator(&manifest),
        locator(&binary),
    ))
    .spawn()
    .await;

    match result {
        Err(ExecutionError::ModuleLoad { message, retryable }) => {
            assert!(message.contains("checksum"), "unexpected message: {}", message);
            assert!(!retryable);
        }
        other => panic!("expected a module load failure, got {:?}", other.map(|h| h.id().to_string())),
    }
    Ok(())
}

#[tokio::test]
async fn test_load_failures_are_reported_before_ready() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("missing.json").display().to_string();

    let cases = vec![
        (ModuleSource::self_initializing("builtin:volcano"), false),
        (ModuleSource::self_initializing("ftp://modules.example/terrain"), false),
        (ModuleSource::self_initializing(missing), true),
    ];

    for (source, expect_retryable) in cases {
        let description = source.to_string();
        let error = match controller(source).spawn().await {
            Ok(handle) => {
                handle.dispose().await;
                panic!("{} should not load", description);
            }
            Err(e) => e,
        };

        assert!(
            matches!(error, ExecutionError::ModuleLoad { .. }),
            "{}: {:?}",
            description,
            error
        );
        assert_eq!(error.is_retryable(), expect_retryable, "{}", description);
        assert!(error.requires_respawn());
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_palette_is_rejected_at_start() -> Result<()> {
    let binary = write_file(b"")?;
    let manifest = write_file(
        json!({
            "name": "barren",
            "entry": "terrain",
            "resource_sha256": hex::encode(Sha256::digest(b"")),
        })
        .to_string()
        .as_bytes(),
    )?;

    let result = controller(ModuleSource::externally_linked(
        locator(&manifest),
        locator(&binary),
    ))
    .spawn()
    .await;
    assert!(matches!(result, Err(ExecutionError::ModuleLoad { .. })));
    Ok(())
}
