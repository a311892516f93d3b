//! Administrative entity hierarchy.
//!
//! The core only navigates the tree through the read-only [`Hierarchy`]
//! trait. [`EntityTree`] is an in-memory implementation loaded from a
//! YAML/JSON export of the tree.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SurvError};

/// Levels of the administrative tree, shallowest first.
pub const LEVELS: [Level; 4] = [Level::Country, Level::Province, Level::Zone, Level::Area];

/// An administrative level. Comparisons go through [`Level::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Country,
    Province,
    Zone,
    Area,
}

impl Level {
    /// Depth in [`LEVELS`]; the country is 0.
    #[must_use]
    pub fn rank(self) -> usize {
        match self {
            Level::Country => 0,
            Level::Province => 1,
            Level::Zone => 2,
            Level::Area => 3,
        }
    }

    #[must_use]
    pub fn from_rank(rank: usize) -> Option<Level> {
        LEVELS.get(rank).copied()
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Level::Country => "Country",
            Level::Province => "Province",
            Level::Zone => "Health zone",
            Level::Area => "Health area",
        }
    }

    /// `true` if `self` sits strictly below `other` in the tree.
    #[must_use]
    pub fn is_deeper_than(self, other: Level) -> bool {
        self.rank() > other.rank()
    }
}

/// A node of the administrative tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Read-only navigation over the entity tree.
pub trait Hierarchy {
    fn entity(&self, id: &str) -> Option<&Entity>;

    fn root(&self) -> Option<&Entity>;

    /// Direct children, in a stable order.
    fn children(&self, id: &str) -> Vec<&Entity>;

    /// Ancestors from the root down to the parent of `id`.
    fn ancestors(&self, id: &str) -> Vec<&Entity> {
        let mut chain = Vec::new();
        let mut current = self.entity(id).and_then(|e| e.parent.as_deref());
        while let Some(parent_id) = current {
            match self.entity(parent_id) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent.parent.as_deref();
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// The ancestor (or `id` itself) sitting at `level`.
    fn ancestor_at(&self, id: &str, level: Level) -> Option<&Entity> {
        let entity = self.entity(id)?;
        if entity.level == level {
            return Some(entity);
        }
        self.ancestors(id).into_iter().find(|e| e.level == level)
    }

    /// All descendants of `id` at `level`, breadth first.
    fn descendants_at(&self, id: &str, level: Level) -> Vec<&Entity> {
        let mut found = Vec::new();
        let mut queue: VecDeque<&Entity> = self.children(id).into_iter().collect();
        while let Some(node) = queue.pop_front() {
            if node.level == level {
                found.push(node);
                continue;
            }
            if level.is_deeper_than(node.level) {
                queue.extend(self.children(&node.id));
            }
        }
        found
    }
}

/// In-memory entity tree.
#[derive(Debug, Clone, Default)]
pub struct EntityTree {
    entities: HashMap<String, Entity>,
    children: HashMap<String, Vec<String>>,
    root: Option<String>,
}

impl EntityTree {
    /// Build a tree, checking that it has exactly one root, that every parent
    /// exists and that children sit deeper than their parent.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Hierarchy`] describing the first inconsistency.
    pub fn new(entities: Vec<Entity>) -> Result<Self> {
        let mut tree = EntityTree::default();

        for entity in entities {
            if tree.entities.contains_key(&entity.id) {
                return Err(SurvError::Hierarchy(format!(
                    "duplicate entity id '{}'",
                    entity.id
                )));
            }
            if entity.parent.is_none() {
                if let Some(existing) = &tree.root {
                    return Err(SurvError::Hierarchy(format!(
                        "multiple roots: '{existing}' and '{}'",
                        entity.id
                    )));
                }
                tree.root = Some(entity.id.clone());
            }
            tree.entities.insert(entity.id.clone(), entity);
        }

        for entity in tree.entities.values() {
            let Some(parent_id) = &entity.parent else {
                continue;
            };
            let parent = tree.entities.get(parent_id).ok_or_else(|| {
                SurvError::Hierarchy(format!(
                    "entity '{}' references unknown parent '{parent_id}'",
                    entity.id
                ))
            })?;
            if !entity.level.is_deeper_than(parent.level) {
                return Err(SurvError::Hierarchy(format!(
                    "entity '{}' ({:?}) is not below its parent '{}' ({:?})",
                    entity.id, entity.level, parent.id, parent.level
                )));
            }
            tree.children
                .entry(parent_id.clone())
                .or_default()
                .push(entity.id.clone());
        }

        for ids in tree.children.values_mut() {
            ids.sort_by(|a, b| {
                let name_a = tree.entities.get(a).map(|e| e.name.as_str());
                let name_b = tree.entities.get(b).map(|e| e.name.as_str());
                name_a.cmp(&name_b).then_with(|| a.cmp(b))
            });
        }

        if tree.root.is_none() && !tree.entities.is_empty() {
            return Err(SurvError::Hierarchy("tree has no root".to_string()));
        }

        Ok(tree)
    }

    /// Load a tree from a YAML (or JSON) list of entities.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Io`] if the file cannot be read,
    /// [`SurvError::Serialization`] if it cannot be parsed, or
    /// [`SurvError::Hierarchy`] if the tree is inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a tree from YAML (JSON is accepted as well).
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_yaml(content: &str) -> Result<Self> {
        let entities: Vec<Entity> =
            serde_yaml::from_str(content).map_err(|e| SurvError::Serialization(e.to_string()))?;
        Self::new(entities)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Hierarchy for EntityTree {
    fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    fn root(&self) -> Option<&Entity> {
        self.root.as_deref().and_then(|id| self.entities.get(id))
    }

    fn children(&self, id: &str) -> Vec<&Entity> {
        self.children
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| self.entities.get(c)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, level: Level, parent: Option<&str>) -> Entity {
        Entity {
            id: id.to_string(),
            name: id.to_uppercase(),
            level,
            parent: parent.map(str::to_string),
            code: None,
        }
    }

    fn sample_tree() -> EntityTree {
        EntityTree::new(vec![
            entity("rdc", Level::Country, None),
            entity("kinshasa", Level::Province, Some("rdc")),
            entity("katanga", Level::Province, Some("rdc")),
            entity("gombe", Level::Zone, Some("kinshasa")),
            entity("limete", Level::Zone, Some("kinshasa")),
            entity("lubumbashi", Level::Zone, Some("katanga")),
            entity("gombe-a", Level::Area, Some("gombe")),
        ])
        .unwrap()
    }

    #[test]
    fn levels_are_ranked_by_depth() {
        assert_eq!(Level::Country.rank(), 0);
        assert_eq!(Level::Area.rank(), 3);
        assert!(Level::Zone.is_deeper_than(Level::Province));
        assert!(!Level::Province.is_deeper_than(Level::Province));
        assert_eq!(Level::from_rank(2), Some(Level::Zone));
        assert_eq!(Level::from_rank(9), None);
    }

    #[test]
    fn level_serializes_snake_case() {
        let json = serde_json::to_string(&Level::Province).unwrap();
        assert_eq!(json, "\"province\"");
    }

    #[test]
    fn children_are_sorted_by_name() {
        let tree = sample_tree();
        let ids: Vec<&str> = tree.children("rdc").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["katanga", "kinshasa"]);
        assert_eq!(tree.root().map(|e| e.id.as_str()), Some("rdc"));
    }

    #[test]
    fn ancestors_run_from_root() {
        let tree = sample_tree();
        let ids: Vec<&str> = tree
            .ancestors("gombe-a")
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["rdc", "kinshasa", "gombe"]);
        assert_eq!(
            tree.ancestor_at("gombe-a", Level::Province).map(|e| e.id.as_str()),
            Some("kinshasa")
        );
    }

    #[test]
    fn descendants_at_skips_intermediate_levels() {
        let tree = sample_tree();
        let zones: Vec<&str> = tree
            .descendants_at("rdc", Level::Zone)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(zones, vec!["lubumbashi", "gombe", "limete"]);
        assert!(tree.descendants_at("gombe", Level::Province).is_empty());
    }

    #[test]
    fn rejects_child_not_below_parent() {
        let err = EntityTree::new(vec![
            entity("rdc", Level::Country, None),
            entity("bad", Level::Country, Some("rdc")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("not below"));
    }

    #[test]
    fn rejects_unknown_parent_and_duplicates() {
        assert!(EntityTree::new(vec![
            entity("rdc", Level::Country, None),
            entity("x", Level::Zone, Some("nowhere")),
        ])
        .is_err());
        assert!(EntityTree::new(vec![
            entity("rdc", Level::Country, None),
            entity("rdc", Level::Country, None),
        ])
        .is_err());
    }

    #[test]
    fn loads_from_yaml() {
        let yaml = r"
- id: rdc
  name: RDC
  level: country
- id: kinshasa
  name: Kinshasa
  level: province
  parent: rdc
";
        let tree = EntityTree::from_yaml(yaml).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.entity("kinshasa").map(|e| e.level), Some(Level::Province));
    }
}
