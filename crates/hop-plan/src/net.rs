//! Net membership and node roles

use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Node id reserved for broadcast destinations
pub const BROADCAST_ID: u8 = 255;

/// Node id reserved for "no destination"
pub const NULL_ID: u8 = 0;

/// Role of a node within its net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Hub that transmits every slot
    Basestation,
    /// Leaf that transmits once per net period
    Mobile,
}

impl NodeRole {
    /// Returns true for the basestation role
    pub fn is_basestation(&self) -> bool {
        matches!(self, NodeRole::Basestation)
    }
}

/// Membership of one net as seen from a single node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Id of the node running this link
    pub node_id: u8,
    /// Id of the basestation
    pub basestation_id: u8,
    /// Ordered list of every node id in the net, basestation included
    pub node_ids: Vec<u8>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            basestation_id: 3,
            node_ids: vec![1, 2, 3],
        }
    }
}

impl NetConfig {
    /// Create a net configuration
    pub fn new(node_id: u8, basestation_id: u8, node_ids: Vec<u8>) -> Self {
        Self {
            node_id,
            basestation_id,
            node_ids,
        }
    }

    /// Check membership rules
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.node_ids.len() < 2 {
            return Err(PlanError::InvalidNet(format!(
                "a net needs at least 2 nodes, got {}",
                self.node_ids.len()
            )));
        }
        for (i, id) in self.node_ids.iter().enumerate() {
            if *id == BROADCAST_ID || *id == NULL_ID {
                return Err(PlanError::InvalidNet(format!("node id {} is reserved", id)));
            }
            if self.node_ids[..i].contains(id) {
                return Err(PlanError::InvalidNet(format!("node id {} listed twice", id)));
            }
        }
        if !self.node_ids.contains(&self.basestation_id) {
            return Err(PlanError::InvalidNet(format!(
                "basestation {} is not a member",
                self.basestation_id
            )));
        }
        if !self.node_ids.contains(&self.node_id) {
            return Err(PlanError::NodeNotInNet(self.node_id));
        }
        Ok(())
    }

    /// Role of this node
    pub fn role(&self) -> NodeRole {
        if self.node_id == self.basestation_id {
            NodeRole::Basestation
        } else {
            NodeRole::Mobile
        }
    }

    /// Number of nodes in the net
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    /// Number of slots in one net period (one per mobile)
    pub fn slots_per_net(&self) -> usize {
        self.node_ids.len().saturating_sub(1)
    }

    /// Ids of every mobile, in net order
    pub fn mobiles(&self) -> impl Iterator<Item = u8> + '_ {
        let bs = self.basestation_id;
        self.node_ids.iter().copied().filter(move |id| *id != bs)
    }

    /// Transmit slot of this node within a net period
    ///
    /// Mobiles are numbered by their position in the node list with the
    /// basestation skipped. The basestation has no dedicated slot.
    pub fn mobile_slot(&self) -> Option<usize> {
        if self.role().is_basestation() {
            return None;
        }
        self.mobiles().position(|id| id == self.node_id)
    }
}
