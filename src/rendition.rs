//! Named renditions, rendition sets, and the catalog that resolves them.
//!
//! A [`Rendition`] is a name plus a parameter map. A [`RenditionSet`] groups
//! renditions for responsive `srcset` output. The [`Catalog`] is built once
//! from configuration: every rendition inherits unset keys from the
//! [`RenderDefaults`] (except `width` and `height`), and every set is
//! resolved to concrete renditions up front, so lookups after construction
//! can only fail on unknown names.

use crate::imaging::{OutputFormat, ParamValue, Params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Keys a rendition never inherits from the defaults.
const NOT_INHERITED: &[&str] = &["width", "height"];

/// Prefix of the flattened watermark keys, inherited as one group.
const WATERMARK_PREFIX: &str = "watermark_";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Unknown rendition \"{name}\". Available renditions: {}", .available.join(", "))]
    UnknownRendition { name: String, available: Vec<String> },
    #[error("Unknown rendition set \"{name}\". Available sets: {}", .available.join(", "))]
    UnknownSet { name: String, available: Vec<String> },
    #[error("Rendition set \"{set}\" references unknown rendition \"{rendition}\"")]
    InvalidSet { set: String, rendition: String },
    #[error("Rendition \"{rendition}\" has no parameter \"{parameter}\"")]
    UnknownParameter { rendition: String, parameter: String },
}

/// Parameters every rendition falls back to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderDefaults {
    params: Params,
}

impl RenderDefaults {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Default output format, `webp` unless configured.
    pub fn format(&self) -> OutputFormat {
        self.params.format().unwrap_or(OutputFormat::Webp)
    }
}

/// A named, immutable set of rendering parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendition {
    name: String,
    #[serde(skip)]
    format: OutputFormat,
    params: Params,
}

impl Rendition {
    /// Build a rendition. A missing or invalid `format` resolves to `webp`.
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self::with_default_format(name, params, OutputFormat::Webp)
    }

    fn with_default_format(
        name: impl Into<String>,
        mut params: Params,
        fallback: OutputFormat,
    ) -> Self {
        let format = params.format().unwrap_or(fallback);
        params.set("format", format.as_str());
        Self {
            name: name.into(),
            format,
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// A parameter that must exist (a `null` value counts as existing).
    pub fn get(&self, key: &str) -> Result<&ParamValue, CatalogError> {
        self.params
            .raw(key)
            .ok_or_else(|| CatalogError::UnknownParameter {
                rendition: self.name.clone(),
                parameter: key.to_string(),
            })
    }

    pub fn has(&self, key: &str) -> bool {
        self.params.contains(key)
    }

    /// Parameter names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.params.keys().collect()
    }
}

impl std::fmt::Display for Rendition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A set as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SetDefinition {
    pub renditions: Vec<String>,
    pub media_queries: Vec<String>,
}

/// A resolved group of renditions with their media queries.
#[derive(Debug, Clone, PartialEq)]
pub struct RenditionSet {
    name: String,
    renditions: Vec<Arc<Rendition>>,
    media_queries: Vec<String>,
}

impl RenditionSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member renditions in configured order.
    pub fn renditions(&self) -> &[Arc<Rendition>] {
        &self.renditions
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Rendition>> {
        self.renditions.iter().find(|r| r.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.renditions.iter().map(|r| r.name()).collect()
    }

    pub fn media_queries(&self) -> &[String] {
        &self.media_queries
    }
}

/// Registry of every rendition and set.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    renditions: BTreeMap<String, Arc<Rendition>>,
    sets: BTreeMap<String, RenditionSet>,
    defaults: RenderDefaults,
}

impl Catalog {
    /// Resolve renditions against `defaults` and sets against renditions.
    pub fn new(
        renditions: impl IntoIterator<Item = (String, Params)>,
        sets: impl IntoIterator<Item = (String, SetDefinition)>,
        defaults: RenderDefaults,
    ) -> Result<Self, CatalogError> {
        let renditions: BTreeMap<String, Arc<Rendition>> = renditions
            .into_iter()
            .map(|(name, params)| {
                let params = inherit(params, defaults.params());
                let rendition = Rendition::with_default_format(&name, params, defaults.format());
                (name, Arc::new(rendition))
            })
            .collect();

        let mut resolved = BTreeMap::new();
        for (name, definition) in sets {
            let members = definition
                .renditions
                .iter()
                .map(|member| {
                    renditions
                        .get(member)
                        .cloned()
                        .ok_or_else(|| CatalogError::InvalidSet {
                            set: name.clone(),
                            rendition: member.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            resolved.insert(
                name.clone(),
                RenditionSet {
                    name,
                    renditions: members,
                    media_queries: definition.media_queries,
                },
            );
        }

        Ok(Self {
            renditions,
            sets: resolved,
            defaults,
        })
    }

    pub fn defaults(&self) -> &RenderDefaults {
        &self.defaults
    }

    pub fn get(&self, name: &str) -> Result<Arc<Rendition>, CatalogError> {
        self.renditions
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownRendition {
                name: name.to_string(),
                available: self.list(),
            })
    }

    pub fn get_set(&self, name: &str) -> Result<&RenditionSet, CatalogError> {
        self.sets.get(name).ok_or_else(|| CatalogError::UnknownSet {
            name: name.to_string(),
            available: self.list_sets(),
        })
    }

    /// Rendition names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.renditions.keys().cloned().collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.renditions.contains_key(name)
    }

    /// Set names, sorted.
    pub fn list_sets(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    pub fn has_set(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    pub fn renditions(&self) -> impl Iterator<Item = &Arc<Rendition>> {
        self.renditions.values()
    }
}

/// Fill unset keys from the defaults. Watermark keys travel together: a
/// rendition with its own watermark path inherits none of them.
fn inherit(mut params: Params, defaults: &Params) -> Params {
    let own_watermark = params.get("watermark_path").is_some();
    for (key, value) in defaults.iter() {
        if NOT_INHERITED.contains(&key) || value.is_null() {
            continue;
        }
        if key.starts_with(WATERMARK_PREFIX) {
            if !own_watermark {
                params.set(key, value.clone());
            }
            continue;
        }
        if params.get(key).is_none() {
            params.set(key, value.clone());
        }
    }
    params
}
