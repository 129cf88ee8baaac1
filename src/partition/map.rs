use crate::types::{GraphError, NodeId, PartitionId, Result};

/// Number of partitions in a deployment.
pub const PARTITION_COUNT: u8 = 3;

/// Static `id mod 3` ownership as seen from one partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionMap {
    local: PartitionId,
}

impl PartitionMap {
    /// Map for partition `local`, numbered 1 through 3.
    pub fn new(local: PartitionId) -> Result<Self> {
        if !(1..=PARTITION_COUNT).contains(&local.0) {
            return Err(GraphError::Invalid("partition number must be 1, 2 or 3"));
        }
        Ok(Self { local })
    }

    /// This partition.
    pub fn local(&self) -> PartitionId {
        self.local
    }

    /// Partition owning `id`: 1 owns `id % 3 == 0`, 2 owns 1, 3 owns 2.
    pub fn owner(id: NodeId) -> PartitionId {
        PartitionId((id.0 % u64::from(PARTITION_COUNT)) as u8 + 1)
    }

    /// Returns true if this partition owns `id`.
    pub fn is_local(&self, id: NodeId) -> bool {
        Self::owner(id) == self.local
    }

    /// The other two partitions in ascending order.
    pub fn peers(&self) -> [PartitionId; 2] {
        let mut peers = [PartitionId(0); 2];
        let mut i = 0;
        for n in 1..=PARTITION_COUNT {
            if n != self.local.0 {
                peers[i] = PartitionId(n);
                i += 1;
            }
        }
        peers
    }
}
