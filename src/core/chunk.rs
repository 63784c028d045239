use std::fmt;

/// Where the read phase of a chunk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// The completion policy has not fired yet.
    Continuable,
    /// The completion policy fired; more input may follow.
    Full,
    /// The reader signalled end of stream.
    Finished,
}

/// Items gathered during one read/process cycle, waiting to be written.
///
/// A chunk is never persisted: it lives for one commit cycle only. `consumed`
/// counts every input the chunk used up, including filtered and skipped
/// items, so the step knows whether the cycle advanced the reader and needs a
/// commit even when there is nothing left to write.
pub struct Chunk<O> {
    items: Vec<O>,
    status: ChunkStatus,
    consumed: usize,
}

impl<O> Chunk<O> {
    pub fn new(capacity: usize) -> Chunk<O> {
        Chunk {
            items: Vec::with_capacity(capacity),
            status: ChunkStatus::Continuable,
            consumed: 0,
        }
    }

    pub fn add_item(&mut self, item: O) {
        self.items.push(item);
        self.consumed += 1;
    }

    /// Records an input that produced no output (filtered or skipped).
    pub fn add_consumed(&mut self) {
        self.consumed += 1;
    }

    pub fn get_items(&self) -> &[O] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ChunkStatus) {
        self.status = status;
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn is_empty(&self) -> bool {
        self.consumed == 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.status == ChunkStatus::Finished
    }
}

impl<O> fmt::Debug for Chunk<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("items", &self.items.len())
            .field("status", &self.status)
            .field("consumed", &self.consumed)
            .finish()
    }
}
