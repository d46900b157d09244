//! Wire messages
//!
//! Every message is small and tagged. Query descriptions travel as one
//! header message followed by fixed-width operand chunks; reductions carry a
//! bounded [`PartialResult`].
//!
//! Query header word (32 bits):
//!
//! ```text
//! +----------+-------------+----------------+---------+
//! | reserved | predicateOp | predicateField | queryOp |
//! |  31..24  |   23..16    |     15..8      |   7..0  |
//! +----------+-------------+----------------+---------+
//! ```

use serde::{Deserialize, Serialize};

use super::partial::PartialResult;

/// Identifies one query while it is in flight on the mesh
pub type QueryId = u32;

/// Words per message payload
pub const PAYLOAD_WORDS: usize = 2;

/// `predicateField` value when the query has no predicate
pub const FIELD_NONE: u8 = 0xFF;
/// `predicateField` value selecting a record by local id
pub const FIELD_LOCAL_ID: u8 = 0xFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    Scan,
    Point,
    Range,
    Knn,
    Aggregate,
    TopK,
}

impl QueryOp {
    pub fn as_u8(&self) -> u8 {
        match self {
            QueryOp::Scan => 1,
            QueryOp::Point => 2,
            QueryOp::Range => 3,
            QueryOp::Knn => 4,
            QueryOp::Aggregate => 5,
            QueryOp::TopK => 6,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(QueryOp::Scan),
            2 => Some(QueryOp::Point),
            3 => Some(QueryOp::Range),
            4 => Some(QueryOp::Knn),
            5 => Some(QueryOp::Aggregate),
            6 => Some(QueryOp::TopK),
            _ => None,
        }
    }

    /// Whether the answer comes back through the reduction tree
    pub fn is_reduced(&self) -> bool {
        !matches!(self, QueryOp::Point)
    }
}

/// Decoded header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryHeader {
    pub query_op: u8,
    pub predicate_field: u8,
    /// `0` when there is no predicate
    pub predicate_op: u8,
    pub reserved: u8,
}

impl QueryHeader {
    pub fn pack(&self) -> u32 {
        (u32::from(self.reserved) << 24)
            | (u32::from(self.predicate_op) << 16)
            | (u32::from(self.predicate_field) << 8)
            | u32::from(self.query_op)
    }

    pub fn unpack(word: u32) -> Self {
        Self {
            query_op: (word & 0xFF) as u8,
            predicate_field: ((word >> 8) & 0xFF) as u8,
            predicate_op: ((word >> 16) & 0xFF) as u8,
            reserved: (word >> 24) as u8,
        }
    }
}

/// Selects the handler a message is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Query header: `[header word, operand chunk count]`
    Header,
    /// Operand chunk: `[descriptor, value]`
    Operand,
    /// Self-activation once a query is fully assembled
    Evaluate,
    /// Reduction partial travelling west along a row
    RowPartial,
    /// Reduction partial travelling north up column 0
    ColumnPartial,
    /// Final reduction leaving the root for the host
    Result,
    /// Point lookup answer: `[partition or sentinel, local id]`
    PointReply,
    /// Releases all state held for the query
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Words([u32; PAYLOAD_WORDS]),
    Partial(Box<PartialResult>),
}

/// One unit of data on a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub query: QueryId,
    pub tag: Tag,
    /// Position within the query's message sequence
    pub seq: u32,
    pub payload: Payload,
}

impl Message {
    pub fn words(query: QueryId, tag: Tag, seq: u32, words: [u32; PAYLOAD_WORDS]) -> Self {
        Self {
            query,
            tag,
            seq,
            payload: Payload::Words(words),
        }
    }

    pub fn partial(query: QueryId, tag: Tag, partial: PartialResult) -> Self {
        Self {
            query,
            tag,
            seq: 0,
            payload: Payload::Partial(Box::new(partial)),
        }
    }

    pub fn signal(query: QueryId, tag: Tag) -> Self {
        Self {
            query,
            tag,
            seq: 0,
            payload: Payload::None,
        }
    }

    pub fn as_words(&self) -> Option<[u32; PAYLOAD_WORDS]> {
        match self.payload {
            Payload::Words(words) => Some(words),
            _ => None,
        }
    }

    pub fn into_partial(self) -> Option<PartialResult> {
        match self.payload {
            Payload::Partial(partial) => Some(*partial),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bit_layout() {
        let header = QueryHeader {
            query_op: QueryOp::Aggregate.as_u8(),
            predicate_field: 3,
            predicate_op: 2,
            reserved: 0,
        };
        assert_eq!(header.pack(), 0x0002_0305);
        assert_eq!(QueryHeader::unpack(0x0002_0305), header);
    }

    #[test]
    fn test_query_op_codes() {
        for op in [
            QueryOp::Scan,
            QueryOp::Point,
            QueryOp::Range,
            QueryOp::Knn,
            QueryOp::Aggregate,
            QueryOp::TopK,
        ] {
            assert_eq!(QueryOp::from_u8(op.as_u8()), Some(op));
        }
        assert_eq!(QueryOp::from_u8(0), None);
        assert!(!QueryOp::Point.is_reduced());
    }
}
