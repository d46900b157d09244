//! Query descriptions and their chunked wire form
//!
//! A request is sent as one [`Tag::Header`] message followed by operand
//! chunks, each `[descriptor, value]`. The descriptor's top byte names the
//! operand kind; the remaining three bytes are kind-specific:
//!
//! | kind | bytes 23..16 | bytes 15..8 | bytes 7..0 | value |
//! |---|---|---|---|---|
//! | predicate | op | field | field type | operand word |
//! | span | index hi | index lo | word 0..8 | key word (first then last, LE) |
//! | param | param id | 0 | word index | parameter |
//! | vector | chunk hi | chunk lo | lanes 1..4 | four packed `i8` |
//! | region | corner (0 min, 1 max) | dim | 0 | coordinate |
//!
//! Chunk sequence numbers start at 1; the header is sequence 0 and carries
//! the chunk count in its second word.

use std::collections::BTreeMap;

use super::errors::{MeshError, MeshResult};
use super::message::{Message, QueryHeader, QueryId, QueryOp, Tag, FIELD_LOCAL_ID, FIELD_NONE};
use crate::curve::{CoordinateVector, KeySpan, SpatialKey};
use crate::partition::{FieldType, FieldValue, LocalId, Predicate, PredicateOp};

const OPERAND_PREDICATE: u8 = 1;
const OPERAND_SPAN: u8 = 2;
const OPERAND_PARAM: u8 = 3;
const OPERAND_VECTOR: u8 = 4;
const OPERAND_REGION: u8 = 5;

const PARAM_K: u8 = 1;
const PARAM_FIELD: u8 = 2;
const PARAM_CAPACITY: u8 = 3;
const PARAM_LOCAL_ID: u8 = 4;
const PARAM_KEY: u8 = 5;
const PARAM_VECTOR_LEN: u8 = 6;

const VECTOR_LANES: usize = 4;
const MAX_SPANS: usize = u16::MAX as usize;

/// Everything a node needs to evaluate one query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRequest {
    pub op: Option<QueryOp>,
    /// All must hold (conjunction)
    pub predicates: Vec<Predicate>,
    /// Covering key spans; empty means the whole key space
    pub spans: Vec<KeySpan>,
    /// Exact box re-checked against decoded coordinates
    pub region: Option<(CoordinateVector, CoordinateVector)>,
    pub key: Option<SpatialKey>,
    pub local_id: Option<LocalId>,
    /// Aggregate or top-K field
    pub field: Option<u8>,
    pub k: u32,
    pub vector: Vec<i8>,
    /// Most ids a scan partial may carry
    pub capacity: u32,
}

impl QueryRequest {
    fn with_op(op: QueryOp) -> Self {
        Self {
            op: Some(op),
            ..Self::default()
        }
    }

    pub fn scan(predicates: Vec<Predicate>, capacity: u32) -> Self {
        Self {
            predicates,
            capacity,
            ..Self::with_op(QueryOp::Scan)
        }
    }

    pub fn range(
        spans: Vec<KeySpan>,
        min_corner: CoordinateVector,
        max_corner: CoordinateVector,
        predicates: Vec<Predicate>,
        capacity: u32,
    ) -> Self {
        Self {
            predicates,
            spans,
            region: Some((min_corner, max_corner)),
            capacity,
            ..Self::with_op(QueryOp::Range)
        }
    }

    pub fn point(key: SpatialKey) -> Self {
        Self {
            key: Some(key),
            ..Self::with_op(QueryOp::Point)
        }
    }

    /// Point lookup by local id instead of key
    pub fn point_by_id(local_id: LocalId) -> Self {
        Self {
            local_id: Some(local_id),
            ..Self::with_op(QueryOp::Point)
        }
    }

    pub fn knn(vector: Vec<i8>, k: u32, predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            vector,
            k,
            ..Self::with_op(QueryOp::Knn)
        }
    }

    pub fn topk(field: u8, k: u32, predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            field: Some(field),
            k,
            ..Self::with_op(QueryOp::TopK)
        }
    }

    /// `field` is `None` for a plain count
    pub fn aggregate(field: Option<u8>, predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            field,
            ..Self::with_op(QueryOp::Aggregate)
        }
    }

    /// Restricts evaluation to partitions intersecting `spans`
    pub fn with_spans(mut self, spans: Vec<KeySpan>) -> Self {
        self.spans = spans;
        self
    }

    fn header(&self) -> QueryHeader {
        let (predicate_field, predicate_op) = match (self.predicates.first(), self.local_id) {
            (Some(p), _) => (p.field, p.op.as_u8()),
            (None, Some(_)) => (FIELD_LOCAL_ID, PredicateOp::Eq.as_u8()),
            (None, None) => (FIELD_NONE, 0),
        };
        QueryHeader {
            query_op: self.op.map_or(0, |op| op.as_u8()),
            predicate_field,
            predicate_op,
            reserved: 0,
        }
    }

    /// Operand chunks, in sequence order
    pub fn operands(&self) -> MeshResult<Vec<[u32; 2]>> {
        if self.spans.len() > MAX_SPANS {
            return Err(MeshError::malformed(format!(
                "{} spans exceed the {} a request can carry",
                self.spans.len(),
                MAX_SPANS
            )));
        }
        if self.vector.len() > usize::from(u16::MAX) * VECTOR_LANES {
            return Err(MeshError::malformed("query vector too long"));
        }
        let mut out = Vec::new();
        for p in &self.predicates {
            out.push([
                descriptor(OPERAND_PREDICATE, p.op.as_u8(), p.field, p.value.field_type().tag()),
                p.value.to_word(),
            ]);
        }
        for (index, span) in self.spans.iter().enumerate() {
            let [hi, lo] = (index as u16).to_be_bytes();
            for (part, word) in key_words(span.first)
                .into_iter()
                .chain(key_words(span.last))
                .enumerate()
            {
                out.push([descriptor(OPERAND_SPAN, hi, lo, part as u8), word]);
            }
        }
        if let Some((min, max)) = &self.region {
            if min.dims() != max.dims() || min.dims() > usize::from(u8::MAX) {
                return Err(MeshError::malformed("region corners differ in dimensions"));
            }
            for (corner, coords) in [(0u8, min), (1u8, max)] {
                for (dim, value) in coords.as_slice().iter().enumerate() {
                    out.push([descriptor(OPERAND_REGION, corner, dim as u8, 0), *value]);
                }
            }
        }
        let mut param = |id: u8, index: u8, value: u32| {
            out.push([descriptor(OPERAND_PARAM, id, 0, index), value]);
        };
        if let Some(key) = self.key {
            for (index, word) in key_words(key).into_iter().enumerate() {
                param(PARAM_KEY, index as u8, word);
            }
        }
        if let Some(id) = self.local_id {
            param(PARAM_LOCAL_ID, 0, id);
        }
        if let Some(field) = self.field {
            param(PARAM_FIELD, 0, u32::from(field));
        }
        if self.k > 0 {
            param(PARAM_K, 0, self.k);
        }
        if self.capacity > 0 {
            param(PARAM_CAPACITY, 0, self.capacity);
        }
        if !self.vector.is_empty() {
            param(PARAM_VECTOR_LEN, 0, self.vector.len() as u32);
        }
        for (index, lanes) in self.vector.chunks(VECTOR_LANES).enumerate() {
            let [hi, lo] = (index as u16).to_be_bytes();
            let mut packed = [0u8; VECTOR_LANES];
            for (slot, v) in packed.iter_mut().zip(lanes) {
                *slot = *v as u8;
            }
            out.push([
                descriptor(OPERAND_VECTOR, hi, lo, lanes.len() as u8),
                u32::from_le_bytes(packed),
            ]);
        }
        Ok(out)
    }

    /// Header followed by every operand chunk
    pub fn to_messages(&self, query: QueryId) -> MeshResult<Vec<Message>> {
        let operands = self.operands()?;
        let mut messages = Vec::with_capacity(operands.len() + 1);
        messages.push(Message::words(
            query,
            Tag::Header,
            0,
            [self.header().pack(), operands.len() as u32],
        ));
        for (i, words) in operands.into_iter().enumerate() {
            messages.push(Message::words(query, Tag::Operand, i as u32 + 1, words));
        }
        Ok(messages)
    }

    /// Rebuilds a request from its header word and operand chunks.
    pub fn decode(header_word: u32, chunks: &[[u32; 2]]) -> MeshResult<Self> {
        let header = QueryHeader::unpack(header_word);
        let op = QueryOp::from_u8(header.query_op)
            .ok_or_else(|| MeshError::malformed(format!("unknown query op {}", header.query_op)))?;
        let mut request = Self::with_op(op);
        let mut spans: BTreeMap<u16, [Option<u32>; 8]> = BTreeMap::new();
        let mut key: [Option<u32>; 4] = [None; 4];
        let mut corners: [BTreeMap<u8, u32>; 2] = [BTreeMap::new(), BTreeMap::new()];
        let mut vector_len = 0usize;
        let mut lanes: BTreeMap<u16, (u8, u32)> = BTreeMap::new();

        for &[desc, value] in chunks {
            let [kind, a, b, c] = desc.to_be_bytes();
            match kind {
                OPERAND_PREDICATE => {
                    let op = PredicateOp::from_u8(a)
                        .ok_or_else(|| MeshError::malformed(format!("unknown predicate op {}", a)))?;
                    let ty = FieldType::from_tag(c)
                        .ok_or_else(|| MeshError::malformed(format!("unknown field type {}", c)))?;
                    request
                        .predicates
                        .push(Predicate::new(b, op, FieldValue::from_word(ty, value)));
                }
                OPERAND_SPAN => {
                    let part = usize::from(c);
                    let words = spans.entry(u16::from_be_bytes([a, b])).or_insert([None; 8]);
                    let slot = words
                        .get_mut(part)
                        .ok_or_else(|| MeshError::malformed(format!("span word {} out of range", part)))?;
                    *slot = Some(value);
                }
                OPERAND_REGION => {
                    let corner = corners
                        .get_mut(usize::from(a))
                        .ok_or_else(|| MeshError::malformed(format!("region corner {}", a)))?;
                    corner.insert(b, value);
                }
                OPERAND_PARAM => match a {
                    PARAM_K => request.k = value,
                    PARAM_FIELD => request.field = Some(value as u8),
                    PARAM_CAPACITY => request.capacity = value,
                    PARAM_LOCAL_ID => request.local_id = Some(value),
                    PARAM_VECTOR_LEN => vector_len = value as usize,
                    PARAM_KEY => {
                        let slot = key
                            .get_mut(usize::from(c))
                            .ok_or_else(|| MeshError::malformed(format!("key word {} out of range", c)))?;
                        *slot = Some(value);
                    }
                    other => return Err(MeshError::malformed(format!("unknown parameter {}", other))),
                },
                OPERAND_VECTOR => {
                    lanes.insert(u16::from_be_bytes([a, b]), (c, value));
                }
                other => return Err(MeshError::malformed(format!("unknown operand kind {}", other))),
            }
        }

        for (index, words) in spans {
            let words: Option<Vec<u32>> = words.iter().copied().collect();
            let words = words.ok_or_else(|| MeshError::malformed(format!("span {} incomplete", index)))?;
            let first = words_key(&words[..4]);
            let last = words_key(&words[4..]);
            if first > last {
                return Err(MeshError::malformed(format!("span {} inverted", index)));
            }
            request.spans.push(KeySpan::new(first, last));
        }
        if key.iter().any(Option::is_some) {
            let words: Option<Vec<u32>> = key.iter().copied().collect();
            let words = words.ok_or_else(|| MeshError::malformed("point key incomplete"))?;
            request.key = Some(words_key(&words));
        }
        let [min, max] = corners;
        if !min.is_empty() || !max.is_empty() {
            let dims = min.len();
            let contiguous = |m: &BTreeMap<u8, u32>| m.keys().copied().eq(0..dims as u8);
            if max.len() != dims || !contiguous(&min) || !contiguous(&max) {
                return Err(MeshError::malformed("region corners incomplete"));
            }
            request.region = Some((
                CoordinateVector::new(min.into_values().collect()),
                CoordinateVector::new(max.into_values().collect()),
            ));
        }
        for (expected, (index, (count, packed))) in lanes.into_iter().enumerate() {
            if usize::from(index) != expected || usize::from(count) > VECTOR_LANES {
                return Err(MeshError::malformed("vector chunks out of order"));
            }
            let bytes = packed.to_le_bytes();
            request
                .vector
                .extend(bytes[..usize::from(count)].iter().map(|&b| b as i8));
        }
        if request.vector.len() != vector_len {
            return Err(MeshError::malformed(format!(
                "vector has {} lanes, header announced {}",
                request.vector.len(),
                vector_len
            )));
        }

        if request.header() != header {
            return Err(MeshError::malformed("header predicate does not match operands"));
        }
        Ok(request)
    }
}

fn descriptor(kind: u8, a: u8, b: u8, c: u8) -> u32 {
    u32::from_be_bytes([kind, a, b, c])
}

fn key_words(key: SpatialKey) -> [u32; 4] {
    [
        key as u32,
        (key >> 32) as u32,
        (key >> 64) as u32,
        (key >> 96) as u32,
    ]
}

fn words_key(words: &[u32]) -> SpatialKey {
    words
        .iter()
        .enumerate()
        .fold(0u128, |acc, (i, w)| acc | (u128::from(*w) << (32 * i)))
}

/// Collects a query's header and operand messages in any arrival order.
#[derive(Debug, Default)]
pub struct RequestAssembler {
    header: Option<[u32; 2]>,
    chunks: BTreeMap<u32, [u32; 2]>,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header or operand message; returns true once complete.
    pub fn push(&mut self, message: &Message) -> bool {
        if let Some(words) = message.as_words() {
            match message.tag {
                Tag::Header => self.header = Some(words),
                Tag::Operand => {
                    self.chunks.insert(message.seq, words);
                }
                _ => {}
            }
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.header
            .is_some_and(|[_, count]| self.chunks.len() >= count as usize)
    }

    /// Decoded header word, once the header has arrived
    pub fn header(&self) -> Option<QueryHeader> {
        self.header.map(|[word, _]| QueryHeader::unpack(word))
    }

    pub fn finish(self) -> MeshResult<QueryRequest> {
        let [word, count] = self
            .header
            .ok_or_else(|| MeshError::malformed("query header missing"))?;
        if !self.chunks.keys().copied().eq(1..=count) {
            return Err(MeshError::malformed("operand sequence has gaps"));
        }
        let chunks: Vec<[u32; 2]> = self.chunks.into_values().collect();
        QueryRequest::decode(word, &chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(messages: &[Message]) -> QueryRequest {
        let mut asm = RequestAssembler::new();
        let mut done = false;
        for m in messages {
            done = asm.push(m);
        }
        assert!(done);
        asm.finish().unwrap()
    }

    #[test]
    fn test_range_request_survives_chunking() {
        let request = QueryRequest::range(
            vec![KeySpan::new(3, 9), KeySpan::new(1 << 100, u128::MAX)],
            CoordinateVector::new(vec![0, 0, 0]),
            CoordinateVector::new(vec![9, 31, 31]),
            vec![Predicate::new(1, PredicateOp::Ge, FieldValue::I32(-4))],
            64,
        );
        let messages = request.to_messages(7).unwrap();
        assert_eq!(messages[0].tag, Tag::Header);
        assert!(messages.iter().all(|m| m.query == 7));
        assert_eq!(assemble(&messages), request);
    }

    #[test]
    fn test_vector_chunked_four_lanes_per_message() {
        let request = QueryRequest::knn(vec![1, -2, 3, -4, 5, 6], 2, vec![]);
        let messages = request.to_messages(1).unwrap();
        let vector_chunks = messages
            .iter()
            .filter_map(Message::as_words)
            .filter(|[desc, _]| (desc >> 24) as u8 == OPERAND_VECTOR)
            .count();
        assert_eq!(vector_chunks, 2);
        assert_eq!(assemble(&messages), request);
    }

    #[test]
    fn test_out_of_order_arrival() {
        let request = QueryRequest::point(0xDEAD_BEEF_0000_0001_u128 << 40);
        let mut messages = request.to_messages(3).unwrap();
        messages.reverse();
        assert_eq!(assemble(&messages), request);

        let by_id = QueryRequest::point_by_id(42);
        let messages = by_id.to_messages(4).unwrap();
        let header = QueryHeader::unpack(messages[0].as_words().unwrap()[0]);
        assert_eq!(header.predicate_field, FIELD_LOCAL_ID);
        assert_eq!(assemble(&messages), by_id);
    }

    #[test]
    fn test_incomplete_and_corrupt_requests() {
        let request = QueryRequest::aggregate(Some(0), vec![]);
        let messages = request.to_messages(1).unwrap();
        let mut asm = RequestAssembler::new();
        assert!(!asm.push(&messages[1]));
        assert!(asm.header().is_none());

        assert!(QueryRequest::decode(0, &[]).is_err());
        let bad_kind = [[descriptor(9, 0, 0, 0), 0]];
        assert!(QueryRequest::decode(u32::from(QueryOp::Scan.as_u8()) | 0xFF00, &bad_kind).is_err());
    }

    #[test]
    fn test_header_mirrors_first_predicate() {
        let request = QueryRequest::scan(
            vec![Predicate::new(2, PredicateOp::Eq, FieldValue::Category(5))],
            10,
        );
        let header = request.header();
        assert_eq!(header.predicate_field, 2);
        assert_eq!(header.predicate_op, PredicateOp::Eq.as_u8());
        assert_eq!(QueryRequest::scan(vec![], 10).header().predicate_field, FIELD_NONE);
    }
}
