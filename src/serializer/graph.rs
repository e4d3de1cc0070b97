//! The abstract object graph: the serializer's intermediate
//! representation, decoupled from any live Rust type so patches can
//! rewrite it without touching real instances.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{Result, SerializerError};
use crate::reflection::{HashedString, Variant};

use super::stream::{
    MemoryStreamWriter, StreamReader, StreamWriter, StringDeduplicationReadContext, StringDeduplicationWriteContext,
};

pub const WORLD_GRAPH_VERSION: u8 = 10;

/// One property value attached to a node, keyed by name rather than by
/// index so patches can add/rename/remove properties freely.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProperty {
    pub name: String,
    pub value: Variant,
}

#[derive(Debug, Clone)]
pub struct AbstractObjectNode {
    pub uuid: Uuid,
    pub type_name: HashedString,
    pub type_version: u32,
    pub node_name: String,
    pub properties: Vec<NodeProperty>,
}

impl AbstractObjectNode {
    pub fn property(&self, name: &str) -> Option<&Variant> {
        self.properties.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Variant> {
        self.properties.iter_mut().find(|p| p.name == name).map(|p| &mut p.value)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Variant) {
        let name = name.into();
        if let Some(existing) = self.properties.iter_mut().find(|p| p.name == name) {
            existing.value = value;
        } else {
            self.properties.push(NodeProperty { name, value });
        }
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Variant> {
        let idx = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(idx).value)
    }

    pub fn rename_property(&mut self, old_name: &str, new_name: &str) {
        if let Some(p) = self.properties.iter_mut().find(|p| p.name == old_name) {
            p.name = new_name.to_string();
        }
    }
}

/// A set of object nodes, keyed by uuid, with an optional designated
/// root. References between nodes are expressed as `Variant::Uuid`
/// property values resolved against this graph.
#[derive(Debug, Clone, Default)]
pub struct AbstractObjectGraph {
    nodes: HashMap<Uuid, AbstractObjectNode>,
    root: Option<Uuid>,
}

impl AbstractObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: AbstractObjectNode) -> Uuid {
        let id = node.uuid;
        self.nodes.insert(id, node);
        id
    }

    pub fn set_root(&mut self, id: Uuid) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<&AbstractObjectNode> {
        self.root.and_then(|id| self.nodes.get(&id))
    }

    pub fn node(&self, id: Uuid) -> Option<&AbstractObjectNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: Uuid) -> Option<&mut AbstractObjectNode> {
        self.nodes.get_mut(&id)
    }

    pub fn remove_node(&mut self, id: Uuid) -> Option<AbstractObjectNode> {
        self.nodes.remove(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AbstractObjectNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut AbstractObjectNode> {
        self.nodes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Verifies every `Variant::Uuid` property resolves to a node in
    /// this graph, per the graph's reference-closure invariant.
    pub fn verify_references(&self) -> Result<()> {
        for node in self.nodes.values() {
            for prop in &node.properties {
                if let Variant::Uuid(target) = &prop.value {
                    if *target != Uuid::nil() && !self.nodes.contains_key(target) {
                        return Err(SerializerError::UnresolvedReference {
                            from: node.uuid,
                            to: *target,
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Writes an [`AbstractObjectGraph`] to a byte stream: version byte,
/// node count, then the two string-dedup tables (type names, node
/// names), then the node bodies. The bodies are assembled into a
/// scratch buffer first, since the tables they reference by index
/// aren't complete — and so can't be flushed — until every node has
/// been visited; the scratch bytes are appended to `writer` once both
/// tables have been written ahead of them.
pub fn write_graph<W: StreamWriter + ?Sized>(writer: &mut W, graph: &AbstractObjectGraph) -> Result<()> {
    writer.write_u8(WORLD_GRAPH_VERSION)?;
    writer.write_u32(graph.len() as u32)?;
    writer.write_u8(graph.root.is_some() as u8)?;
    if let Some(root) = graph.root {
        writer.write_uuid(&root)?;
    }

    let mut names: Vec<&AbstractObjectNode> = graph.nodes.values().collect();
    names.sort_by(|a, b| a.type_name.as_str().cmp(b.type_name.as_str()).then(a.uuid.cmp(&b.uuid)));

    let mut type_name_dedup = StringDeduplicationWriteContext::new();
    let mut node_name_dedup = StringDeduplicationWriteContext::new();
    let mut body = MemoryStreamWriter::new();
    for node in names {
        body.write_uuid(&node.uuid)?;
        type_name_dedup.write_string(&mut body, node.type_name.as_str())?;
        body.write_u32(node.type_version)?;
        node_name_dedup.write_string(&mut body, &node.node_name)?;
        body.write_u32(node.properties.len() as u32)?;
        for prop in &node.properties {
            body.write_string(&prop.name)?;
            body.write_variant(&prop.value)?;
        }
    }

    type_name_dedup.end(writer)?;
    node_name_dedup.end(writer)?;
    writer.write_bytes(&body.into_bytes())
}

/// Reads back a graph written by [`write_graph`].
pub fn read_graph<R: StreamReader + ?Sized>(reader: &mut R) -> Result<AbstractObjectGraph> {
    let version = reader.read_u8()?;
    if version > WORLD_GRAPH_VERSION {
        return Err(SerializerError::UnsupportedVersion {
            found: version,
            max_supported: WORLD_GRAPH_VERSION,
        }
        .into());
    }

    let node_count = reader.read_u32()?;
    let has_root = reader.read_u8()? != 0;
    let root = if has_root { Some(reader.read_uuid()?) } else { None };

    let type_name_dedup = StringDeduplicationReadContext::begin(reader)?;
    let node_name_dedup = StringDeduplicationReadContext::begin(reader)?;

    let mut graph = AbstractObjectGraph::new();
    for _ in 0..node_count {
        let uuid = reader.read_uuid()?;
        let type_name = HashedString::new(type_name_dedup.read_string(reader)?);
        let type_version = reader.read_u32()?;
        let node_name = node_name_dedup.read_string(reader)?;
        let prop_count = reader.read_u32()?;
        let mut properties = Vec::with_capacity(prop_count as usize);
        for _ in 0..prop_count {
            let name = reader.read_string()?;
            let value = reader.read_variant()?;
            properties.push(NodeProperty { name, value });
        }
        graph.add_node(AbstractObjectNode {
            uuid,
            type_name,
            type_version,
            node_name,
            properties,
        });
    }
    if let Some(root) = root {
        graph.set_root(root);
    }
    Ok(graph)
}
