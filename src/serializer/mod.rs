//! Stream & Graph Serializer (L1): versioned byte streams, the abstract
//! object graph intermediate representation, and the patch system that
//! upgrades graphs written by older binaries.

pub mod graph;
pub mod patch;
pub mod stream;

pub use graph::{read_graph, write_graph, AbstractObjectGraph, AbstractObjectNode, NodeProperty, WORLD_GRAPH_VERSION};
pub use patch::{patch_graph, patch_node, register_patch, register_whole_graph_patch, GraphPatch, PatchAction, TypeVersionInfo, TypesGraph, WholeGraphPatch};
pub use stream::{
    MemoryStreamReader, MemoryStreamWriter, StreamReader, StreamWriter, StringDeduplicationReadContext,
    StringDeduplicationWriteContext,
};
