//! Bipartite device/net graphs built from token sequences.
//!
//! A sequence is a walk over a graph whose nodes are devices on one side and
//! nets, ports and rails on the other. Every `node -> edge-type -> node`
//! window of the walk declares one connection. This module rebuilds that
//! graph for inspection (DOT export) and flattens it into the tensor layout a
//! graph classifier consumes, so generated batches can be audited against
//! the circuit type they were requested for.
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use topogen::graph::{classifier_input, from_sequence};
//! use topogen::sequence::{encode, parse_artifact};
//! use topogen::vocabulary::Vocabulary;
//!
//! let vocab = Vocabulary::analog()?;
//! let ids = encode(&vocab, &parse_artifact("CIRCUIT_Filter->VSS->R_P->R1->R_N->VDD->TRUNCATE"))?;
//! let graph = from_sequence(&vocab, &ids)?;
//! assert_eq!(graph.node_count(), 3);
//! assert_eq!(graph.edge_count(), 2);
//!
//! let input = classifier_input(&vocab, &graph);
//! assert_eq!(input.edges.len(), 4);
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    error::Error,
    fmt, fs,
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use petgraph::{dot, graph::NodeIndex, stable_graph::StableGraph};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    decode::OracleError,
    sequence::{read_artifact, strip_padding},
    vocabulary::{Symbol, TokenId, TokenKind, UnknownTokenError, Vocabulary},
};

/// A device, net, port or rail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitNode {
    pub id: TokenId,
    pub name: Symbol,
    pub kind: TokenKind,
}

impl fmt::Display for CircuitNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// One connection declaration: the edge-type token and the pins it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub edge: TokenId,
    pub name: Symbol,
    pub pins: String,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pins)
    }
}

/// Edges point in walk order.
pub type CircuitGraph = StableGraph<CircuitNode, Connection>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    UnknownToken(UnknownTokenError),
    /// A node where an edge-type belongs, or the reverse.
    Misplaced { position: usize, token: Symbol },
    /// Neither or both ends of a window are devices.
    NotBipartite { position: usize },
    FamilyMismatch {
        position: usize,
        device: Symbol,
        edge: Symbol,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownToken(err) => write!(f, "{}", err),
            GraphError::Misplaced { position, token } => {
                write!(f, "Unexpected token {} at position {}", token, position)
            }
            GraphError::NotBipartite { position } => write!(
                f,
                "Connection at position {} does not join a device to a net",
                position
            ),
            GraphError::FamilyMismatch {
                position,
                device,
                edge,
            } => write!(
                f,
                "Edge type {} at position {} does not belong to device {}",
                edge, position, device
            ),
        }
    }
}

impl Error for GraphError {}

impl From<UnknownTokenError> for GraphError {
    fn from(err: UnknownTokenError) -> Self {
        GraphError::UnknownToken(err)
    }
}

/// Rebuild the device/net graph walked by a sequence.
///
/// A leading circuit-type tag is skipped and reading stops at the first
/// terminator. Each node token becomes one graph node, however often the
/// walk revisits it, and every connection window becomes one edge.
///
/// # Arguments
///
/// * `vocab` - Token registry
/// * `ids` - The sequence, padded or not
///
/// # Returns
///
/// The graph, or the first structural problem found with its position in `ids`.
pub fn from_sequence(vocab: &Vocabulary, ids: &[TokenId]) -> Result<CircuitGraph, GraphError> {
    let content = strip_padding(vocab, ids);
    let offset = match content.first() {
        Some(&id) if vocab.try_kind(id) == Some(TokenKind::CircuitType) => 1,
        _ => 0,
    };
    let mut body = &content[offset..];
    if body.last() == Some(&vocab.terminator()) {
        body = &body[..body.len() - 1];
    }

    let mut graph = CircuitGraph::new();
    let mut lut: HashMap<TokenId, NodeIndex> = HashMap::new();

    for (i, &id) in body.iter().enumerate() {
        let kind = vocab.try_kind(id).ok_or(UnknownTokenError::Id(id))?;
        let in_place = if i % 2 == 0 {
            kind.is_node()
        } else {
            matches!(kind, TokenKind::Edge { .. })
        };
        if !in_place {
            return Err(GraphError::Misplaced {
                position: offset + i,
                token: vocab.token_of(id)?.clone(),
            });
        }
        if i % 2 == 0 && !lut.contains_key(&id) {
            let node = graph.add_node(CircuitNode {
                id,
                name: vocab.token_of(id)?.clone(),
                kind,
            });
            lut.insert(id, node);
        }
    }
    if body.len() % 2 == 0 {
        if let Some(&id) = body.last() {
            return Err(GraphError::Misplaced {
                position: offset + body.len() - 1,
                token: vocab.token_of(id)?.clone(),
            });
        }
    }

    for i in (0..body.len().saturating_sub(2)).step_by(2) {
        let (a, e, b) = (body[i], body[i + 1], body[i + 2]);
        let position = offset + i + 1;
        let edge = vocab
            .edge_info(e)
            .ok_or(GraphError::NotBipartite { position })?;
        let device = match (vocab.device_info(a), vocab.device_info(b)) {
            (Some(d), None) | (None, Some(d)) => d,
            _ => return Err(GraphError::NotBipartite { position }),
        };
        if device.family_id != edge.family_id {
            return Err(GraphError::FamilyMismatch {
                position,
                device: vocab.token_of(device.id)?.clone(),
                edge: vocab.token_of(e)?.clone(),
            });
        }
        graph.add_edge(
            lut[&a],
            lut[&b],
            Connection {
                edge: e,
                name: vocab.token_of(e)?.clone(),
                pins: edge.family.pin_letters(edge.pins),
            },
        );
    }

    Ok(graph)
}

/// A single graph in the layout of a graph-attention classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierInput {
    /// Token id of every node, ascending; a node's index is its position here.
    pub node_tokens: Vec<TokenId>,
    /// `(source, target, edge-type id)`, each connection in both directions.
    pub edges: Vec<(usize, usize, TokenId)>,
    /// Graph membership of each node; always zero for a single graph.
    pub batch: Vec<usize>,
}

/// Flatten a graph for a classifier.
///
/// A graph without nodes is replaced by the ground rail with a self loop
/// labelled by the ground token, so the classifier never sees empty tensors.
pub fn classifier_input(vocab: &Vocabulary, graph: &CircuitGraph) -> ClassifierInput {
    let mut node_tokens: Vec<TokenId> = graph.node_indices().map(|n| graph[n].id).collect();
    node_tokens.sort_unstable();

    if node_tokens.is_empty() {
        let ground = vocab.ground();
        return ClassifierInput {
            node_tokens: vec![ground],
            edges: vec![(0, 0, ground)],
            batch: vec![0],
        };
    }

    let position: HashMap<TokenId, usize> = node_tokens
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect();

    let mut edges = Vec::with_capacity(graph.edge_count() * 2);
    for edge in graph.edge_indices() {
        if let Some((a, b)) = graph.edge_endpoints(edge) {
            let (source, target) = (position[&graph[a].id], position[&graph[b].id]);
            edges.push((source, target, graph[edge].edge));
            edges.push((target, source, graph[edge].edge));
        }
    }

    ClassifierInput {
        batch: vec![0; node_tokens.len()],
        node_tokens,
        edges,
    }
}

/// A trained graph classifier.
///
/// Class indices follow the order of [`Vocabulary::circuit_types`].
pub trait GraphClassifier: Sync {
    /// Predicted class index and the probability of every class.
    fn classify(&self, input: &ClassifierInput) -> Result<(usize, Vec<f32>), OracleError>;
}

/// Classifier agreement for one batch of a circuit type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSummary {
    pub circuit_type: Symbol,
    /// Sequences classified as the requested type.
    pub right: usize,
    /// Sequences classified at all.
    pub total: usize,
    /// Sequences that could not be turned into a graph or classified.
    pub failed: usize,
    /// How often each class index was predicted.
    pub predictions: BTreeMap<usize, usize>,
}

impl AuditSummary {
    /// Share of classified sequences that agree with the requested type, in percent.
    pub fn agreement(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.right as f64 * 100.0 / self.total as f64
        }
    }
}

/// Classify every sequence of a batch and count agreement with `circuit_type`.
///
/// # Arguments
///
/// * `vocab` - Token registry
/// * `classifier` - Graph classifier
/// * `circuit_type` - Id of the tag the batch was generated for
/// * `sequences` - The accepted sequences
pub fn audit_batch(
    vocab: &Vocabulary,
    classifier: &dyn GraphClassifier,
    circuit_type: TokenId,
    sequences: &[Vec<TokenId>],
) -> Result<AuditSummary, UnknownTokenError> {
    let expected = vocab
        .circuit_types()
        .iter()
        .position(|&t| t == circuit_type)
        .ok_or(UnknownTokenError::Id(circuit_type))?;

    let predictions: Vec<Option<usize>> = sequences
        .par_iter()
        .map(|ids| {
            let graph = match from_sequence(vocab, ids) {
                Ok(graph) => graph,
                Err(err) => {
                    debug!(%err, "sequence skipped");
                    return None;
                }
            };
            match classifier.classify(&classifier_input(vocab, &graph)) {
                Ok((class, _)) => Some(class),
                Err(err) => {
                    debug!(%err, "classification failed");
                    None
                }
            }
        })
        .collect();

    let mut summary = AuditSummary {
        circuit_type: vocab.token_of(circuit_type)?.clone(),
        right: 0,
        total: 0,
        failed: 0,
        predictions: BTreeMap::new(),
    };
    for prediction in predictions {
        match prediction {
            Some(class) => {
                summary.total += 1;
                if class == expected {
                    summary.right += 1;
                }
                *summary.predictions.entry(class).or_default() += 1;
            }
            None => summary.failed += 1,
        }
    }

    Ok(summary)
}

/// Command-line arguments for the graph command.
#[derive(Parser, Debug)]
pub struct GraphArgs {
    /// Artifact to convert
    pub input: PathBuf,

    /// DOT output file (default: stdout)
    #[clap(long, short)]
    pub output: Option<PathBuf>,
}

/// Convert one artifact into a Graphviz DOT file.
pub fn graph_main(args: GraphArgs) -> anyhow::Result<()> {
    let GraphArgs { input, output } = args;

    let vocab = Vocabulary::analog()?;
    let ids = read_artifact(&vocab, &input)?;
    let graph = from_sequence(&vocab, &ids)
        .with_context(|| format!("Failed to build a graph from {}", input.display()))?;

    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "graph built"
    );

    let dot = format!("{}", dot::Dot::new(&graph));
    match output {
        Some(path) => fs::write(&path, dot)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", dot),
    }

    Ok(())
}
