//! Administrative boundary loading, reprojection and caching.
//!
//! Boundary files are read once, reprojected into the sensor CRS and held as
//! an immutable [`BoundarySet`]. Any failure along the way is reported as
//! [`BoundaryError::Unavailable`] so callers can carry on without outlines.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use geo::{BoundingRect, MultiPolygon, Rect};
use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::BoundaryConfig;
use crate::core::geojson::load_geojson_boundaries;
use crate::core::loaders::{BoundaryFeature, BoundarySource};
use crate::core::shapefile::{load_shapefile_boundaries, shapefile_parts};
use crate::core::transforms::{reproject_multi_polygon, Crs};

/// Property names tried, in order, when no label property is configured.
const LABEL_PROPERTIES: &[&str] = &["name", "NAME", "Name", "ward_name", "WARD_NAME"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundaryError {
    #[error("boundary source '{path}' unavailable: {reason}")]
    Unavailable { path: PathBuf, reason: String },
}

impl BoundaryError {
    fn unavailable(path: &Path, reason: impl ToString) -> Self {
        BoundaryError::Unavailable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BoundaryError>;

/// One labelled area, already in the target CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPolygon {
    pub label: String,
    pub geometry: MultiPolygon<f64>,
}

/// Reprojected boundary polygons in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundarySet {
    pub source: PathBuf,
    /// CRS the file was read in.
    pub source_crs: Crs,
    /// CRS of every polygon in `polygons`.
    pub crs: Crs,
    pub polygons: Vec<BoundaryPolygon>,
}

impl BoundarySet {
    #[inline]
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Bounding box of all polygons.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.polygons
            .iter()
            .filter_map(|p| p.geometry.bounding_rect())
            .reduce(merge_rects)
    }
}

pub(crate) fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
        (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
    )
}

/// Supported boundary file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryFormat {
    GeoJson,
    Shapefile,
}

impl BoundaryFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "geojson" | "json" => Some(BoundaryFormat::GeoJson),
            "shp" => Some(BoundaryFormat::Shapefile),
            _ => None,
        }
    }
}

/// Pick a display label for a feature.
///
/// Tries the configured property, the common name properties, any property
/// ending in `NM` or `NAME`, the feature id, and finally `boundary {n}` with
/// `n` the 1-based record position in the file.
pub fn resolve_label(feature: &BoundaryFeature, name_property: Option<&str>) -> String {
    let non_empty = |key: &str| {
        feature
            .properties
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    name_property
        .and_then(|key| non_empty(key))
        .or_else(|| LABEL_PROPERTIES.iter().find_map(|key| non_empty(key)))
        .or_else(|| {
            feature
                .properties
                .keys()
                .filter(|key| {
                    let upper = key.to_ascii_uppercase();
                    upper.ends_with("NM") || upper.ends_with("NAME")
                })
                .find_map(|key| non_empty(key))
        })
        .or_else(|| feature.id.clone().filter(|id| !id.is_empty()))
        .unwrap_or_else(|| format!("boundary {}", feature.position + 1))
}

fn read_source(path: &Path) -> Result<BoundarySource> {
    if !path.is_file() {
        return Err(BoundaryError::unavailable(path, "file not found"));
    }
    match BoundaryFormat::from_path(path) {
        Some(BoundaryFormat::GeoJson) => {
            load_geojson_boundaries(path).map_err(|e| BoundaryError::unavailable(path, e))
        }
        Some(BoundaryFormat::Shapefile) => {
            load_shapefile_boundaries(path).map_err(|e| BoundaryError::unavailable(path, e))
        }
        None => Err(BoundaryError::unavailable(
            path,
            "unrecognised extension (expected .geojson, .json or .shp)",
        )),
    }
}

/// Load boundary polygons from `path` and reproject them into `target`.
///
/// The source CRS is the configured override, else the CRS the file
/// declares, else WGS84. Polygons are reprojected in parallel but keep their
/// file order.
///
/// # Errors
///
/// Every failure (missing file, unreadable content, unknown CRS) is returned
/// as [`BoundaryError::Unavailable`].
pub fn load_boundaries(path: &Path, config: &BoundaryConfig, target: Crs) -> Result<BoundarySet> {
    let source = read_source(path)?;

    let source_crs = match config.source_crs.as_deref() {
        Some(identifier) => {
            Crs::parse(identifier).map_err(|e| BoundaryError::unavailable(path, e))?
        }
        None => source.declared_crs.unwrap_or(Crs::Wgs84),
    };

    let name_property = config.name_property.as_deref();
    let polygons: Vec<BoundaryPolygon> = source
        .features
        .into_par_iter()
        .map(|feature| BoundaryPolygon {
            label: resolve_label(&feature, name_property),
            geometry: reproject_multi_polygon(&feature.geometry, source_crs, target),
        })
        .collect();

    info!(
        "Loaded {} boundary polygons from {} ({} -> {})",
        polygons.len(),
        path.display(),
        source_crs,
        target
    );

    Ok(BoundarySet {
        source: path.to_path_buf(),
        source_crs,
        crs: target,
        polygons,
    })
}

/// Identity of a boundary source on disk plus the settings that shape the
/// loaded set. Any difference means the cached set is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    files: Vec<(PathBuf, u64, Option<SystemTime>)>,
    name_property: Option<String>,
    source_crs: Option<String>,
}

impl Fingerprint {
    fn of(path: &Path, config: &BoundaryConfig) -> Result<Self> {
        let parts = match BoundaryFormat::from_path(path) {
            Some(BoundaryFormat::Shapefile) => shapefile_parts(path),
            _ => vec![path.to_path_buf()],
        };

        let mut files = Vec::with_capacity(parts.len());
        for part in parts {
            let meta = fs::metadata(&part).map_err(|e| BoundaryError::unavailable(path, e))?;
            files.push((part, meta.len(), meta.modified().ok()));
        }

        Ok(Self {
            files,
            name_property: config.name_property.clone(),
            source_crs: config.source_crs.clone(),
        })
    }
}

struct CacheEntry {
    fingerprint: Fingerprint,
    set: Arc<BoundarySet>,
}

/// Reprojected boundary sets keyed by source path and target CRS.
///
/// Entries are immutable; a changed source replaces its entry wholesale.
#[derive(Default)]
pub struct BoundaryCache {
    entries: RwLock<HashMap<(PathBuf, Crs), CacheEntry>>,
}

static GLOBAL_CACHE: Lazy<BoundaryCache> = Lazy::new(BoundaryCache::new);

impl BoundaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache shared by every render.
    pub fn global() -> &'static BoundaryCache {
        &GLOBAL_CACHE
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Return the cached set for `(path, target)`, loading it if absent or
    /// if the source changed since it was cached.
    pub fn get_or_load(
        &self,
        path: &Path,
        config: &BoundaryConfig,
        target: Crs,
    ) -> Result<Arc<BoundarySet>> {
        let key = (path.to_path_buf(), target);
        let fingerprint = match Fingerprint::of(path, config) {
            Ok(fp) => fp,
            Err(e) => {
                self.entries.write().remove(&key);
                return Err(e);
            }
        };

        if let Some(entry) = self.entries.read().get(&key) {
            if entry.fingerprint == fingerprint {
                debug!("boundary cache hit: {} ({})", path.display(), target);
                return Ok(Arc::clone(&entry.set));
            }
        }

        debug!("boundary cache miss: {} ({})", path.display(), target);
        let set = Arc::new(load_boundaries(path, config, target)?);
        self.entries.write().insert(
            key,
            CacheEntry {
                fingerprint,
                set: Arc::clone(&set),
            },
        );
        Ok(set)
    }
}
