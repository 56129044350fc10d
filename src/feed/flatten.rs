//! Collapsing consecutive events of one node into their net effect.
//!
//! Input must be grouped by `node_id`; a group ends when the node id
//! changes.

use super::record::ChangeRecord;

#[derive(Debug, Default)]
pub struct Flattener {
    pending: Option<ChangeRecord>,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next record. Returns the previous node's net record once
    /// its group is complete, unless that net effect is a no-op.
    pub fn push(&mut self, record: ChangeRecord) -> Option<ChangeRecord> {
        match self.pending.take() {
            Some(pending) if pending.node_id == record.node_id => {
                self.pending = Some(pending.merge(record));
                None
            }
            Some(pending) => {
                self.pending = Some(record);
                Some(pending).filter(|p| !p.is_noop())
            }
            None => {
                self.pending = Some(record);
                None
            }
        }
    }

    /// Close the last open group.
    pub fn finish(&mut self) -> Option<ChangeRecord> {
        self.pending.take().filter(|p| !p.is_noop())
    }
}
