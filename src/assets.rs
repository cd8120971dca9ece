use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    composite,
    error::{TeatroError, TeatroResult},
    model::{LayerConfig, SceneOrigin},
    raster::ImageRef,
};

/// A decoded sprite, ready to draw. Premultiplied RGBA8, row-major,
/// tightly packed.
#[derive(Clone, Debug)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Arc<Vec<u8>>,
}

impl PreparedImage {
    pub fn as_image_ref(&self) -> ImageRef<'_> {
        ImageRef {
            width: self.width,
            height: self.height,
            data: &self.rgba8_premul,
        }
    }
}

/// Where sprite bytes come from. The host supplies an implementation for
/// its asset origin (HTTP, filesystem, bundle); the path it receives is
/// relative to the asset base, e.g.
/// `users/default/sprites/boat/boat.png` or `sounds/waves.mp3`.
pub trait SpriteProvider {
    fn fetch(&self, path: &str) -> TeatroResult<Vec<u8>>;
}

/// Filesystem-backed provider used by tests and local embedding. Counts
/// fetches per path so load-dedup is observable.
pub struct FsSpriteProvider {
    root: PathBuf,
    fetch_counts: std::cell::RefCell<HashMap<String, u32>>,
}

impl FsSpriteProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            fetch_counts: std::cell::RefCell::new(HashMap::new()),
        }
    }

    pub fn fetch_count(&self, path: &str) -> u32 {
        self.fetch_counts.borrow().get(path).copied().unwrap_or(0)
    }
}

impl SpriteProvider for FsSpriteProvider {
    fn fetch(&self, path: &str) -> TeatroResult<Vec<u8>> {
        *self
            .fetch_counts
            .borrow_mut()
            .entry(path.to_string())
            .or_insert(0) += 1;

        // Cache-buster queries have no meaning on a filesystem.
        let bare = path.split('?').next().unwrap_or(path);
        std::fs::read(self.root.join(bare))
            .map_err(|e| TeatroError::asset(format!("read '{bare}': {e}")))
    }
}

pub fn sprite_path(scope: &str, name: &str) -> String {
    format!("users/{scope}/sprites/{name}/{name}.png")
}

pub fn metadata_path(scope: &str, name: &str) -> String {
    format!("users/{scope}/sprites/{name}/{name}.prompt.json")
}

pub fn sound_path(file: &str) -> String {
    format!("sounds/{file}")
}

struct CacheEntry {
    image: Option<Arc<PreparedImage>>,
    /// Scope the image resolved from; sidecar metadata is looked up there.
    scope: Option<String>,
}

/// Resolves and caches sprite images. Each sprite name is fetched and
/// decoded at most once for the loader's lifetime; a missing sprite is
/// cached as missing so it is not re-requested every frame.
pub struct SpriteLoader<P: SpriteProvider> {
    provider: P,
    /// When set, looked up before the scope fallback chain.
    override_scope: Option<String>,
    origin: SceneOrigin,
    cache: HashMap<String, CacheEntry>,
    cache_buster: u64,
}

impl<P: SpriteProvider> SpriteLoader<P> {
    pub fn new(provider: P, origin: SceneOrigin) -> Self {
        Self {
            provider,
            override_scope: None,
            origin,
            cache: HashMap::new(),
            cache_buster: 0,
        }
    }

    pub fn with_override_scope(mut self, scope: impl Into<String>) -> Self {
        self.override_scope = Some(scope.into());
        self
    }

    pub fn set_origin(&mut self, origin: SceneOrigin) {
        self.origin = origin;
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn scope_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        if let Some(s) = &self.override_scope {
            order.push(s.clone());
        }
        match self.origin {
            SceneOrigin::Default => {
                order.push("default".to_string());
                order.push("community".to_string());
            }
            SceneOrigin::Community => {
                order.push("community".to_string());
                order.push("default".to_string());
            }
        }
        order.dedup();
        order
    }

    /// Resolve a sprite image. `Ok(None)` means the sprite is missing in
    /// every scope; the layer is constructed without an image and skipped
    /// at draw time.
    pub fn load_sprite(&mut self, name: &str) -> TeatroResult<Option<Arc<PreparedImage>>> {
        if let Some(entry) = self.cache.get(name) {
            return Ok(entry.image.clone());
        }

        for scope in self.scope_order() {
            let path = sprite_path(&scope, name);
            match self.fetch_with_retry(&path) {
                Ok(bytes) => {
                    let image = Arc::new(decode_png_premul(&bytes)?);
                    self.cache.insert(
                        name.to_string(),
                        CacheEntry {
                            image: Some(image.clone()),
                            scope: Some(scope),
                        },
                    );
                    return Ok(Some(image));
                }
                Err(e) => {
                    tracing::debug!(sprite = name, scope = %scope, error = %e, "sprite not in scope");
                }
            }
        }

        tracing::warn!(sprite = name, "sprite missing in all scopes; layer will be skipped");
        self.cache.insert(
            name.to_string(),
            CacheEntry {
                image: None,
                scope: None,
            },
        );
        Ok(None)
    }

    fn fetch_with_retry(&mut self, path: &str) -> TeatroResult<Vec<u8>> {
        match self.provider.fetch(path) {
            Ok(bytes) => Ok(bytes),
            Err(first) => {
                self.cache_buster += 1;
                let busted = format!("{path}?cb={}", self.cache_buster);
                self.provider.fetch(&busted).map_err(|retry| {
                    TeatroError::asset(format!("fetch '{path}' failed twice: {first}; {retry}"))
                })
            }
        }
    }

    /// Merge the sprite's sidecar metadata document under the
    /// scene-provided config. The scene is authoritative field by field;
    /// optional fields the scene leaves unset and empty lists are taken
    /// from the sidecar. Any failure leaves the config unchanged.
    pub fn fetch_and_merge_metadata(&mut self, config: &LayerConfig) -> LayerConfig {
        let scope = match self
            .cache
            .get(&config.sprite_name)
            .and_then(|e| e.scope.clone())
        {
            Some(s) => s,
            None => return config.clone(),
        };

        let path = metadata_path(&scope, &config.sprite_name);
        let bytes = match self.provider.fetch(&path) {
            Ok(b) => b,
            Err(_) => return config.clone(),
        };
        let sidecar: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(sprite = %config.sprite_name, error = %e, "sidecar metadata is not valid JSON");
                return config.clone();
            }
        };

        match merge_config(config, &sidecar) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!(sprite = %config.sprite_name, error = %e, "sidecar metadata merge failed");
                config.clone()
            }
        }
    }
}

fn merge_config(config: &LayerConfig, sidecar: &serde_json::Value) -> TeatroResult<LayerConfig> {
    let serde_json::Value::Object(sidecar) = sidecar else {
        return Err(TeatroError::asset("sidecar metadata must be a JSON object"));
    };

    let overlay = serde_json::to_value(config)
        .map_err(|e| TeatroError::asset(format!("config serialize: {e}")))?;
    let serde_json::Value::Object(overlay) = overlay else {
        return Err(TeatroError::asset("layer config must serialize to an object"));
    };

    let mut merged = sidecar.clone();
    for (k, v) in overlay {
        let unset = v.is_null() || matches!(&v, serde_json::Value::Array(a) if a.is_empty());
        if unset && merged.contains_key(&k) {
            continue;
        }
        merged.insert(k, v);
    }

    serde_json::from_value(serde_json::Value::Object(merged))
        .map_err(|e| TeatroError::asset(format!("merged config deserialize: {e}")))
}

/// Decode a PNG into premultiplied RGBA8.
pub fn decode_png_premul(bytes: &[u8]) -> TeatroResult<PreparedImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| TeatroError::asset(format!("image decode: {e}")))?
        .to_rgba8();
    let (width, height) = img.dimensions();

    let mut data = img.into_raw();
    for px in data.chunks_exact_mut(4) {
        let p = composite::premul(px[0], px[1], px[2], px[3]);
        px.copy_from_slice(&p);
    }

    Ok(PreparedImage {
        width,
        height,
        rgba8_premul: Arc::new(data),
    })
}
