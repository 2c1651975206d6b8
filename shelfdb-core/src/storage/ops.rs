//! The write operation vocabulary accepted by the background writer.

/// One unit of work handed to the background writer. Each carries the
/// target sub-database name and whatever key/value pairs it needs; the
/// worker opens exactly one read-write transaction per dequeued operation.
#[derive(Debug)]
pub enum WriteOp {
    /// Fails the whole operation if any key already exists.
    Insert {
        sub_db: String,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// Fails the whole operation if any key is missing.
    Update {
        sub_db: String,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// Missing keys are tolerated; the result tallies only the keys actually removed.
    Delete { sub_db: String, keys: Vec<Vec<u8>> },
    DropSubDatabase { sub_db: String },
    TruncateSubDatabase { sub_db: String },
}

impl WriteOp {
    pub fn sub_db(&self) -> &str {
        match self {
            WriteOp::Insert { sub_db, .. }
            | WriteOp::Update { sub_db, .. }
            | WriteOp::Delete { sub_db, .. }
            | WriteOp::DropSubDatabase { sub_db }
            | WriteOp::TruncateSubDatabase { sub_db } => sub_db,
        }
    }
}

/// A dequeued unit plus the channel the submitter is waiting on.
pub struct WriteCommand {
    pub op: WriteOp,
    pub respond_to: tokio::sync::oneshot::Sender<crate::error::Result<usize>>,
}
