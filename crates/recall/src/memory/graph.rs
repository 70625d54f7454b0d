//! Depth-bounded traversal over memory links

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::Link;

/// Anything that can list the links touching a memory, in both directions
#[async_trait]
pub trait NeighborSource: Send + Sync {
    async fn neighbors(&self, id: Uuid) -> Result<Vec<Link>>;
}

/// Breadth-first expansion over the link table.
///
/// Links are directed but traversal is undirected: a neighbour is the other
/// endpoint of any link touching the current node.
pub struct LinkGraph {
    source: Arc<dyn NeighborSource>,
}

impl LinkGraph {
    pub fn new(source: Arc<dyn NeighborSource>) -> Self {
        Self { source }
    }

    /// Ids within `depth` hops of `seed`, excluding `seed`, stopping early
    /// once `max_nodes` ids have been discovered.
    pub async fn related(&self, seed: Uuid, depth: usize, max_nodes: usize) -> Result<HashSet<Uuid>> {
        let mut found = HashSet::new();
        if depth == 0 || max_nodes == 0 {
            return Ok(found);
        }

        let mut visited = HashSet::from([seed]);
        let mut frontier = vec![seed];

        'rounds: for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for id in &frontier {
                for link in self.source.neighbors(*id).await? {
                    let Some(other) = link.other_end(*id) else {
                        continue;
                    };
                    if visited.insert(other) {
                        found.insert(other);
                        next_frontier.push(other);
                        if found.len() >= max_nodes {
                            break 'rounds;
                        }
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(found)
    }
}
