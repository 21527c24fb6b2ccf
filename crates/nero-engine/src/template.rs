//! Object templates: named recipes for an entity's capability components.
//!
//! A template file is a JSON object mapping template names to
//! [`ObjectTemplate`]s:
//!
//! ```json
//! {
//!   "crate":  { "scene": { "half_extents": [0.5, 0.5, 0.5], "collision_mask": 1 } },
//!   "walker": {
//!     "scene": { "half_extents": [0.4, 1.0, 0.4], "kind": 2, "collision_mask": 1 },
//!     "ai": { "wander": { "speed": 1.5, "seed": 7 } }
//!   },
//!   "hunter": { "ai": { "named": "hunter" } }
//! }
//! ```
//!
//! `named` AI entries are resolved against factories registered with
//! [`TemplateRegistry::register_ai`], which is how custom brains are plugged
//! in without a file format for them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use anyhow::Context;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use nero_sim::component::{AiObject, BoxSceneObject};
use nero_sim::entity::{SceneSpawn, TemplateSource};
use nero_sim::state::EntityState;

use crate::wander::{WanderAi, WanderParams};

// ---------------------------------------------------------------------------
// Template data
// ---------------------------------------------------------------------------

/// Render/footprint section of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneTemplate {
    /// Unscaled box half extents.
    pub half_extents: Vec3,
    /// Render node kind, stored in the low bits of the render handle.
    #[serde(default)]
    pub kind: u32,
    /// Collision mask ORed into the entity's own.
    #[serde(default)]
    pub collision_mask: u32,
}

/// AI section of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiTemplate {
    Wander(WanderParams),
    /// A factory registered under this name.
    Named(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiTemplate>,
}

// ---------------------------------------------------------------------------
// TemplateRegistry
// ---------------------------------------------------------------------------

/// Builds an AI component for an entity.
pub type AiFactory = Box<dyn Fn(&EntityState) -> Box<dyn AiObject>>;

/// Named templates and AI factories.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, ObjectTemplate>,
    ai_factories: HashMap<String, AiFactory>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template.
    pub fn insert(&mut self, name: impl Into<String>, template: ObjectTemplate) {
        let name = name.into();
        if self.templates.insert(name.clone(), template).is_some() {
            tracing::debug!(template = %name, "template replaced");
        }
    }

    /// Register an AI factory for `{"ai": {"named": name}}` entries.
    pub fn register_ai(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&EntityState) -> Box<dyn AiObject> + 'static,
    ) {
        self.ai_factories.insert(name.into(), Box::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<&ObjectTemplate> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Merge templates from a JSON document. Returns how many were read.
    pub fn load_json_str(&mut self, json: &str) -> anyhow::Result<usize> {
        let parsed: BTreeMap<String, ObjectTemplate> =
            serde_json::from_str(json).context("failed to parse object templates")?;
        let count = parsed.len();
        for (name, template) in parsed {
            self.insert(name, template);
        }
        tracing::info!(count, "object templates loaded");
        Ok(count)
    }

    /// Merge templates from a JSON file.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read template file {}", path.display()))?;
        self.load_json_str(&text)
            .with_context(|| format!("in template file {}", path.display()))
    }
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<&String> = self.ai_factories.keys().collect();
        factories.sort();
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .field("ai_factories", &factories)
            .finish()
    }
}

impl TemplateSource for TemplateRegistry {
    fn scene_object(&self, template: &str, _initial: &EntityState) -> Option<SceneSpawn> {
        let scene = self.templates.get(template)?.scene.as_ref()?;
        Some(SceneSpawn {
            object: Box::new(BoxSceneObject::new(scene.half_extents, scene.kind)),
            collision_mask: scene.collision_mask,
        })
    }

    fn ai_object(&self, template: &str, initial: &EntityState) -> Option<Box<dyn AiObject>> {
        match self.templates.get(template)?.ai.as_ref()? {
            AiTemplate::Wander(params) => Some(Box::new(WanderAi::new(*params))),
            AiTemplate::Named(name) => match self.ai_factories.get(name) {
                Some(factory) => Some(factory(initial)),
                None => {
                    tracing::warn!(template, ai = %name, "no ai factory registered");
                    None
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
