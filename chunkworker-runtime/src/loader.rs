//! Executable module loading
//!
//! A module is described by a JSON [`ModuleManifest`] whose `entry` names an
//! executor factory in the [`ModuleRegistry`]. The manifest either carries
//! its binary resource inline (self-initializing) or is linked against a
//! separately fetched binary (externally linked). Either way the caller gets
//! a [`ModuleHandle`] once the module's start routine has run.

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use chunkworker_ipc::ModuleInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::error::{ConfigurationError, ModuleLoadError};
use crate::executor::{DynExecutor, ExecutorFactory, ModuleContext};
use crate::registry::ModuleRegistry;

const BUILTIN_SCHEME: &str = "builtin:";

/// Where a module asset lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLocator {
    /// Module compiled into the worker binary, `builtin:<entry>`
    Builtin(String),
    File(PathBuf),
    Http(Url),
}

impl ModuleLocator {
    pub fn parse(locator: &str) -> Result<Self, ModuleLoadError> {
        let unsupported = || ModuleLoadError::UnsupportedLocator(locator.to_string());

        if locator.trim().is_empty() {
            return Err(unsupported());
        }

        if let Some(entry) = locator.strip_prefix(BUILTIN_SCHEME) {
            if entry.is_empty() {
                return Err(unsupported());
            }
            return Ok(ModuleLocator::Builtin(entry.to_string()));
        }

        if !locator.contains("://") {
            return Ok(ModuleLocator::File(PathBuf::from(locator)));
        }

        let url = Url::parse(locator).map_err(|_| unsupported())?;
        match url.scheme() {
            "http" | "https" => Ok(ModuleLocator::Http(url)),
            "file" => url
                .to_file_path()
                .map(ModuleLocator::File)
                .map_err(|_| unsupported()),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for ModuleLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleLocator::Builtin(entry) => write!(f, "{}{}", BUILTIN_SCHEME, entry),
            ModuleLocator::File(path) => write!(f, "{}", path.display()),
            ModuleLocator::Http(url) => write!(f, "{}", url),
        }
    }
}

/// Which loading variant a module uses; also the loader's cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ModuleSource {
    /// One artifact carrying everything it needs
    SelfInitializing { locator: String },
    /// Code and binary resource fetched separately and bound by the loader
    ExternallyLinked { code: String, binary: String },
}

impl ModuleSource {
    pub fn self_initializing(locator: impl Into<String>) -> Self {
        ModuleSource::SelfInitializing {
            locator: locator.into(),
        }
    }

    pub fn externally_linked(code: impl Into<String>, binary: impl Into<String>) -> Self {
        ModuleSource::ExternallyLinked {
            code: code.into(),
            binary: binary.into(),
        }
    }

    /// Select the variant from a code locator and an optional binary locator
    pub fn from_locators(code: impl Into<String>, binary: Option<String>) -> Self {
        match binary {
            Some(binary) => Self::externally_linked(code, binary),
            None => Self::self_initializing(code),
        }
    }

    pub fn variant(&self) -> LinkVariant {
        match self {
            ModuleSource::SelfInitializing { .. } => LinkVariant::SelfInitializing,
            ModuleSource::ExternallyLinked { .. } => LinkVariant::ExternallyLinked,
        }
    }

    pub fn code_locator(&self) -> &str {
        match self {
            ModuleSource::SelfInitializing { locator } => locator,
            ModuleSource::ExternallyLinked { code, .. } => code,
        }
    }

    pub fn binary_locator(&self) -> Option<&str> {
        match self {
            ModuleSource::SelfInitializing { .. } => None,
            ModuleSource::ExternallyLinked { binary, .. } => Some(binary),
        }
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::SelfInitializing { locator } => write!(f, "{}", locator),
            ModuleSource::ExternallyLinked { code, binary } => write!(f, "{} + {}", code, binary),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkVariant {
    SelfInitializing,
    ExternallyLinked,
}

impl LinkVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkVariant::SelfInitializing => "self_initializing",
            LinkVariant::ExternallyLinked => "externally_linked",
        }
    }
}

/// Module artifact format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Registered executor factory this module instantiates
    pub entry: String,
    /// Inline binary resource, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Expected SHA-256 of the binary resource, hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_sha256: Option<String>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl ModuleManifest {
    pub fn parse(locator: &str, bytes: &[u8]) -> Result<Self, ModuleLoadError> {
        let manifest: ModuleManifest =
            serde_json::from_slice(bytes).map_err(|e| ModuleLoadError::Manifest {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;

        if manifest.name.trim().is_empty() || manifest.entry.trim().is_empty() {
            return Err(ModuleLoadError::Manifest {
                locator: locator.to_string(),
                reason: "name and entry must not be empty".to_string(),
            });
        }

        Ok(manifest)
    }

    /// Manifest for a module compiled into this binary
    pub fn builtin(entry: &str) -> Self {
        Self {
            name: entry.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            entry: entry.to_string(),
            resource: None,
            resource_sha256: None,
        }
    }

    pub fn decode_inline_resource(&self) -> Result<Option<Bytes>, ModuleLoadError> {
        self.resource
            .as_deref()
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map(Bytes::from)
                    .map_err(|e| ModuleLoadError::Resource(e.to_string()))
            })
            .transpose()
    }

    /// Check a resource against `resource_sha256`, if the manifest declares one
    pub fn verify_resource(&self, resource: &[u8]) -> Result<(), ModuleLoadError> {
        let Some(expected) = self.resource_sha256.as_deref() else {
            return Ok(());
        };

        let actual = hex::encode(Sha256::digest(resource));
        if actual.eq_ignore_ascii_case(expected.trim()) {
            Ok(())
        } else {
            Err(ModuleLoadError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

struct LoadedModule {
    manifest: ModuleManifest,
    factory: Arc<dyn ExecutorFactory>,
    context: ModuleContext,
    variant: LinkVariant,
    loaded_at: DateTime<Utc>,
}

/// A loaded and started module; cheap to clone
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<LoadedModule>,
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        &self.inner.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.inner.manifest.version
    }

    pub fn entry(&self) -> &str {
        &self.inner.manifest.entry
    }

    pub fn variant(&self) -> LinkVariant {
        self.inner.variant
    }

    pub fn context(&self) -> &ModuleContext {
        &self.inner.context
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.inner.loaded_at
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: self.name().to_string(),
            version: self.version().to_string(),
            entry: self.entry().to_string(),
            variant: self.variant().as_str().to_string(),
            resource_bytes: self.context().resource().map(|r| r.len()).unwrap_or(0),
        }
    }

    /// Construct an executor from a configuration payload
    pub fn instantiate(&self, config: JsonValue) -> Result<Box<dyn DynExecutor>, ConfigurationError> {
        self.inner.factory.create(config, &self.inner.context)
    }

    pub fn same_instance(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("entry", &self.entry())
            .field("variant", &self.variant())
            .finish()
    }
}

/// Fetches, links and starts modules, caching handles by source
pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
    cache: Mutex<HashMap<ModuleSource, ModuleHandle>>,
    http: reqwest::Client,
}

impl ModuleLoader {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self::with_client(registry, reqwest::Client::new())
    }

    pub fn with_client(registry: Arc<ModuleRegistry>, http: reqwest::Client) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
            http,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Load a module, returning the cached handle when the source was loaded before
    pub async fn load(&self, source: &ModuleSource) -> Result<ModuleHandle, ModuleLoadError> {
        if let Some(handle) = self.cache.lock().await.get(source) {
            debug!("Module cache hit for {}", source);
            return Ok(handle.clone());
        }

        let handle = match source {
            ModuleSource::SelfInitializing { locator } => {
                self.load_self_initializing(locator).await?
            }
            ModuleSource::ExternallyLinked { code, binary } => {
                self.load_externally_linked(code, binary).await?
            }
        };

        info!(
            "Loaded module {} v{} ({}) from {}",
            handle.name(),
            handle.version(),
            handle.variant().as_str(),
            source
        );

        // A concurrent load of the same source may have finished first
        let mut cache = self.cache.lock().await;
        Ok(cache.entry(source.clone()).or_insert(handle).clone())
    }

    pub async fn is_cached(&self, source: &ModuleSource) -> bool {
        self.cache.lock().await.contains_key(source)
    }

    pub async fn invalidate(&self, source: &ModuleSource) -> bool {
        self.cache.lock().await.remove(source).is_some()
    }

    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    async fn load_self_initializing(&self, locator: &str) -> Result<ModuleHandle, ModuleLoadError> {
        let locator = ModuleLocator::parse(locator)?;
        let manifest = self.load_manifest(&locator).await?;

        let resource = manifest.decode_inline_resource()?;
        if let Some(ref resource) = resource {
            manifest.verify_resource(resource)?;
        }

        self.instantiate(manifest, resource, LinkVariant::SelfInitializing)
    }

    async fn load_externally_linked(
        &self,
        code: &str,
        binary: &str,
    ) -> Result<ModuleHandle, ModuleLoadError> {
        let code = ModuleLocator::parse(code)?;
        let binary = ModuleLocator::parse(binary)?;
        if let ModuleLocator::Builtin(_) = binary {
            return Err(ModuleLoadError::UnsupportedLocator(binary.to_string()));
        }

        let (manifest, resource) =
            tokio::try_join!(self.load_manifest(&code), self.fetch(&binary))?;

        if manifest.resource.is_some() {
            return Err(ModuleLoadError::Manifest {
                locator: code.to_string(),
                reason: "externally linked module must not embed a resource".to_string(),
            });
        }

        // Bind the binary to the code before the start routine sees it
        manifest.verify_resource(&resource)?;
        debug!("Linked {} bytes from {} to {}", resource.len(), binary, manifest.name);

        self.instantiate(manifest, Some(resource), LinkVariant::ExternallyLinked)
    }

    async fn load_manifest(&self, locator: &ModuleLocator) -> Result<ModuleManifest, ModuleLoadError> {
        match locator {
            ModuleLocator::Builtin(entry) => Ok(ModuleManifest::builtin(entry)),
            _ => {
                let bytes = self.fetch(locator).await?;
                ModuleManifest::parse(&locator.to_string(), &bytes)
            }
        }
    }

    fn instantiate(
        &self,
        manifest: ModuleManifest,
        resource: Option<Bytes>,
        variant: LinkVariant,
    ) -> Result<ModuleHandle, ModuleLoadError> {
        let factory = self
            .registry
            .get(&manifest.entry)
            .ok_or_else(|| ModuleLoadError::UnknownEntry(manifest.entry.clone()))?;

        let context = ModuleContext::new(&manifest.name, &manifest.version, resource);
        factory
            .start(&context)
            .map_err(|reason| ModuleLoadError::Start {
                module: manifest.name.clone(),
                reason,
            })?;

        Ok(ModuleHandle {
            inner: Arc::new(LoadedModule {
                manifest,
                factory,
                context,
                variant,
                loaded_at: Utc::now(),
            }),
        })
    }

    async fn fetch(&self, locator: &ModuleLocator) -> Result<Bytes, ModuleLoadError> {
        let fetch_error = |reason: String| ModuleLoadError::Fetch {
            locator: locator.to_string(),
            reason,
        };

        match locator {
            ModuleLocator::Builtin(_) => Err(ModuleLoadError::UnsupportedLocator(locator.to_string())),
            ModuleLocator::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| fetch_error(e.to_string())),
            ModuleLocator::Http(url) => {
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| fetch_error(e.to_string()))?;

                response.bytes().await.map_err(|e| fetch_error(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
