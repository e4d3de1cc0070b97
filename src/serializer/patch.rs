//! Graph patching: upgrades an [`AbstractObjectGraph`] loaded from an
//! older stream version in two phases — every registered whole-graph
//! patch runs first, then every node is patched bottom-up through its
//! base-class chain, in ascending target-version order.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::error::Result;
use crate::reflection::registry as rtti_registry;

use super::graph::{AbstractObjectGraph, AbstractObjectNode};

/// A lightweight stand-in for a node's type when the real RTTI isn't
/// available (e.g. patching against an older snapshot of the type
/// hierarchy bundled alongside the graph itself).
#[derive(Debug, Clone)]
pub struct TypeVersionInfo {
    pub type_name: String,
    pub parent_type_name: Option<String>,
    pub type_version: u32,
}

/// Sidecar describing the type hierarchy as it was *when the graph was
/// written*, consulted before falling back to the live RTTI registry so
/// a patch still applies correctly even if a type has since been
/// renamed or rebased.
#[derive(Debug, Clone, Default)]
pub struct TypesGraph {
    types: HashMap<String, TypeVersionInfo>,
}

impl TypesGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: TypeVersionInfo) {
        self.types.insert(info.type_name.clone(), info);
    }

    fn get(&self, type_name: &str) -> Option<&TypeVersionInfo> {
        self.types.get(type_name)
    }
}

/// What a single registered patch does to one node: rename the type,
/// rename a property, remove a property, or run an arbitrary
/// transformation. Patches are applied in-place.
pub enum PatchAction {
    RenameType(String),
    RenameProperty { old_name: String, new_name: String },
    RemoveProperty(String),
    Custom(Box<dyn Fn(&mut AbstractObjectNode) + Send + Sync>),
}

/// A single version step for one type: applying it brings a node from
/// `target_version - 1` to `target_version`.
pub struct GraphPatch {
    pub type_name: String,
    pub target_version: u32,
    pub action: PatchAction,
}

impl GraphPatch {
    fn apply(&self, node: &mut AbstractObjectNode) {
        match &self.action {
            PatchAction::RenameType(new_name) => {
                node.type_name = crate::reflection::HashedString::new(new_name);
            }
            PatchAction::RenameProperty { old_name, new_name } => {
                node.rename_property(old_name, new_name);
            }
            PatchAction::RemoveProperty(name) => {
                node.remove_property(name);
            }
            PatchAction::Custom(f) => f(node),
        }
    }
}

/// A patch that runs once against the whole graph (not a single node)
/// before any per-node patch. Used for structural changes: splitting a
/// node into two, merging sibling nodes, or renumbering uuids.
pub struct WholeGraphPatch {
    pub target_version: u32,
    pub action: Box<dyn Fn(&mut AbstractObjectGraph) + Send + Sync>,
}

#[derive(Default)]
struct Registry {
    node_patches: HashMap<(String, u32), Vec<GraphPatch>>,
    whole_graph_patches: Vec<WholeGraphPatch>,
    max_version: HashMap<String, u32>,
}

static PATCH_REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    PATCH_REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

/// Registers a per-node patch. `target_version` is the version the node
/// ends up at after this patch runs.
pub fn register_patch(patch: GraphPatch) {
    let mut reg = registry().write().unwrap();
    let entry = reg.max_version.entry(patch.type_name.clone()).or_insert(0);
    if patch.target_version > *entry {
        *entry = patch.target_version;
    }
    reg.node_patches
        .entry((patch.type_name.clone(), patch.target_version))
        .or_default()
        .push(patch);
}

pub fn register_whole_graph_patch(patch: WholeGraphPatch) {
    registry().write().unwrap().whole_graph_patches.push(patch);
}

/// Returns the highest version any registered patch advances `type_name`
/// to, falling back to the live RTTI's declared version.
fn max_registered_version(type_name: &str) -> u32 {
    let reg = registry().read().unwrap();
    let from_patches = reg.max_version.get(type_name).copied().unwrap_or(0);
    let from_rtti = rtti_registry().get(type_name).map(|r| r.version).unwrap_or(0);
    from_patches.max(from_rtti)
}

/// The immediate base type of `type_name`, consulting `types_graph`
/// before falling back to the live RTTI registry.
fn parent_of(type_name: &str, types_graph: Option<&TypesGraph>) -> Option<String> {
    if let Some(tg) = types_graph {
        tg.get(type_name).and_then(|info| info.parent_type_name.clone())
    } else {
        rtti_registry().get(type_name).and_then(|r| r.parent.map(|p| p.to_string()))
    }
}

/// Applies one node's patches for a single base type, advancing its
/// stored version one step at a time. The stored version always
/// advances, even for a version with no registered patch, so numbering
/// gaps are skipped rather than stalling the upgrade.
fn patch_one_base(node: &mut AbstractObjectNode, type_name: &str, mut stored_version: u32) -> u32 {
    let target_version = max_registered_version(type_name);
    while stored_version < target_version {
        let next = stored_version + 1;
        let patches = {
            let reg = registry().read().unwrap();
            reg.node_patches.get(&(type_name.to_string(), next)).map(|v| v.len())
        };
        if let Some(count) = patches {
            for i in 0..count {
                let reg = registry().read().unwrap();
                if let Some(patches) = reg.node_patches.get(&(type_name.to_string(), next)) {
                    patches[i].apply(node);
                }
            }
        }
        stored_version = next;
    }
    stored_version
}

/// Patches one node through its base-class chain, most-derived type
/// first, re-resolving the chain dynamically: if a base's patches
/// include a `RenameType`, the node's own type name changes mid-climb,
/// and later-registered patches may only be keyed to the *new* name.
/// So each step re-checks whether a rename just happened and, if so,
/// keeps climbing under the new name at the same hierarchy level before
/// moving up to an actual parent. A `visited` set guards against a
/// pathological rename cycle looping forever.
pub fn patch_node(node: &mut AbstractObjectNode, types_graph: Option<&TypesGraph>) {
    let mut visited = std::collections::HashSet::new();
    let mut current_type = node.type_name.as_str().to_string();
    let mut version = node.type_version;

    loop {
        if !visited.insert(current_type.clone()) {
            break;
        }
        version = patch_one_base(node, &current_type, version);

        let resolved_name = node.type_name.as_str().to_string();
        if resolved_name != current_type {
            current_type = resolved_name;
            continue;
        }
        match parent_of(&current_type, types_graph) {
            Some(parent) => current_type = parent,
            None => break,
        }
    }
    node.type_version = version;
}

/// Runs every registered whole-graph patch (ascending target version),
/// then patches every node in the graph. This mirrors the two-phase
/// order the on-disk format's patch system relies on: structural
/// (whole-graph) changes must be visible before any single node's
/// per-type patch runs.
pub fn patch_graph(graph: &mut AbstractObjectGraph, types_graph: Option<&TypesGraph>) -> Result<()> {
    {
        let mut whole_graph_patches: Vec<u32> = {
            let reg = registry().read().unwrap();
            reg.whole_graph_patches.iter().map(|p| p.target_version).collect()
        };
        whole_graph_patches.sort_unstable();
        for target_version in whole_graph_patches {
            let reg = registry().read().unwrap();
            if let Some(patch) = reg
                .whole_graph_patches
                .iter()
                .find(|p| p.target_version == target_version)
            {
                (patch.action)(graph);
            }
        }
    }

    let ids: Vec<_> = graph.nodes().map(|n| n.uuid).collect();
    for id in ids {
        if let Some(node) = graph.node_mut(id) {
            patch_node(node, types_graph);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::{HashedString, Variant};
    use uuid::Uuid;

    fn node(type_name: &str, version: u32) -> AbstractObjectNode {
        AbstractObjectNode {
            uuid: Uuid::new_v4(),
            type_name: HashedString::new(type_name),
            type_version: version,
            node_name: "n".into(),
            properties: vec![],
        }
    }

    #[test]
    fn rename_then_skip_gap_advances_through_unregistered_versions() {
        register_patch(GraphPatch {
            type_name: "LegacyLight".into(),
            target_version: 2,
            action: PatchAction::RenameType("PointLightComponent".into()),
        });
        register_patch(GraphPatch {
            type_name: "LegacyLight".into(),
            target_version: 5,
            action: PatchAction::RenameProperty {
                old_name: "intensity".into(),
                new_name: "brightness".into(),
            },
        });

        let mut n = node("LegacyLight", 1);
        n.set_property("intensity", Variant::Float(2.0));
        patch_node(&mut n, None);

        assert_eq!(n.type_name.as_str(), "PointLightComponent");
        assert_eq!(n.property("brightness"), Some(&Variant::Float(2.0)));
        assert_eq!(n.type_version, 5);
    }

    #[test]
    fn patch_registered_under_renamed_type_still_applies() {
        register_patch(GraphPatch {
            type_name: "OldWidget".into(),
            target_version: 1,
            action: PatchAction::RenameType("NewWidget".into()),
        });
        register_patch(GraphPatch {
            type_name: "NewWidget".into(),
            target_version: 2,
            action: PatchAction::RenameProperty {
                old_name: "size".into(),
                new_name: "scale".into(),
            },
        });

        let mut n = node("OldWidget", 0);
        n.set_property("size", Variant::Float(1.5));
        patch_node(&mut n, None);

        assert_eq!(n.type_name.as_str(), "NewWidget");
        assert_eq!(n.property("scale"), Some(&Variant::Float(1.5)));
        assert_eq!(n.type_version, 2);
    }

    #[test]
    fn whole_graph_patch_runs_before_node_patches() {
        register_whole_graph_patch(WholeGraphPatch {
            target_version: 1,
            action: Box::new(|g| {
                for n in g.nodes_mut() {
                    n.set_property("migrated", Variant::Bool(true));
                }
            }),
        });
        let mut graph = AbstractObjectGraph::new();
        graph.add_node(node("PlainComponent", 0));
        patch_graph(&mut graph, None).unwrap();
        for n in graph.nodes() {
            assert_eq!(n.property("migrated"), Some(&Variant::Bool(true)));
        }
    }
}
