//! Partition image: the fixed-size byte blob placed on a mesh node
//!
//! ```text
//! +-----------------------------+ 0
//! | Metadata (64 bytes)         |
//! +-----------------------------+ 64
//! | Learned index block         |
//! | Secondary blocks ...        | [kind u8][len u32][body], 8-byte aligned
//! +-----------------------------+ records_offset
//! | Sorted records              | record_count x record_size
//! +-----------------------------+
//! | Zero padding                |
//! +-----------------------------+ node_capacity - 4
//! | CRC32 of all prior bytes    |
//! +-----------------------------+ node_capacity
//! ```
//!
//! Metadata fields, little-endian:
//! magic `TILE`, version u16, flags u16, block_count u16, reserved u16,
//! partition id u32, record_count u32, record_size u32, max_records u32,
//! span first u128, span last u128, records_offset u32.

use super::capacity::CapacityPlan;
use super::checksum::{seal, verify_sealed};
use super::errors::{PartitionError, PartitionResult};
use super::record::Record;
use super::schema::RecordSchema;
use super::tile::Partition;
use crate::bytes::{ByteReader, ByteWriter};
use crate::curve::KeySpan;
use crate::index::{CategoricalBitmap, LearnedIndex, ZoneMap, BLOCK_CATEGORICAL, BLOCK_ZONE_MAP};

/// Image magic
pub const IMAGE_MAGIC: [u8; 4] = *b"TILE";
/// Layout version
pub const IMAGE_VERSION: u16 = 1;
/// Fixed metadata block size
pub const METADATA_LEN: usize = 64;
/// CRC32 trailer size
pub const TRAILER_LEN: usize = 4;
/// Block kind of the primary learned index
pub const BLOCK_LEARNED: u8 = 0;

const BLOCK_HEADER_LEN: usize = 1 + 4;
const BLOCK_ALIGN: usize = 8;
const FLAG_BITMAP: u16 = 1;

/// Bytes a block with a `body_len` body occupies, header and padding included
pub fn block_footprint(body_len: usize) -> usize {
    (BLOCK_HEADER_LEN + body_len).div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN
}

impl Partition {
    /// Packs the partition into exactly `plan.node_capacity` bytes.
    ///
    /// # Errors
    ///
    /// `TESS_CAPACITY_EXCEEDED` if the packed content would not leave room
    /// for the trailer.
    pub fn export_for_distribution(
        &self,
        schema: &RecordSchema,
        plan: &CapacityPlan,
    ) -> PartitionResult<Vec<u8>> {
        let mut blocks = ByteWriter::with_capacity(plan.overhead);
        let mut block_count = 1u16;
        write_block(&mut blocks, BLOCK_LEARNED, &self.index().to_bytes());
        if let Some(bitmap) = self.bitmap() {
            write_block(&mut blocks, BLOCK_CATEGORICAL, &bitmap.to_bytes());
            block_count += 1;
        }
        for zone in self.zones() {
            write_block(&mut blocks, BLOCK_ZONE_MAP, &zone.to_bytes());
            block_count += 1;
        }
        let blocks = blocks.into_inner();
        let records_offset = METADATA_LEN + blocks.len();
        let used = records_offset + self.len() * plan.record_size;
        if used + TRAILER_LEN > plan.node_capacity {
            return Err(PartitionError::capacity_exceeded(format!(
                "partition {} image needs {} bytes, node holds {}",
                self.id(),
                used + TRAILER_LEN,
                plan.node_capacity
            )));
        }

        let span = self.span();
        let flags = if self.bitmap().is_some() { FLAG_BITMAP } else { 0 };
        let mut w = ByteWriter::with_capacity(plan.node_capacity);
        w.bytes(&IMAGE_MAGIC)
            .u16(IMAGE_VERSION)
            .u16(flags)
            .u16(block_count)
            .u16(0)
            .u32(self.id())
            .u32(self.len() as u32)
            .u32(plan.record_size as u32)
            .u32(self.capacity() as u32)
            .u128(span.first)
            .u128(span.last)
            .u32(records_offset as u32)
            .align(METADATA_LEN);
        w.bytes(&blocks);
        for record in self.records() {
            w.bytes(&record.encode(schema));
        }
        let mut image = w.into_inner();
        image.resize(plan.node_capacity, 0);
        seal(&mut image);
        Ok(image)
    }

    /// Parses and verifies an image produced by
    /// [`export_for_distribution`](Self::export_for_distribution).
    ///
    /// # Errors
    ///
    /// `TESS_IMAGE_CORRUPT` on a size, checksum, magic, layout or ordering
    /// violation.
    pub fn from_image(image: &[u8], schema: &RecordSchema, plan: &CapacityPlan) -> PartitionResult<Self> {
        if image.len() != plan.node_capacity {
            return Err(PartitionError::image_corrupt(format!(
                "image is {} bytes, node capacity is {}",
                image.len(),
                plan.node_capacity
            )));
        }
        if !verify_sealed(image) {
            return Err(PartitionError::image_corrupt("checksum mismatch"));
        }

        let mut r = ByteReader::new(image);
        let header = read_metadata(&mut r).ok_or_else(|| PartitionError::image_corrupt("metadata truncated"))?;
        if header.magic != IMAGE_MAGIC {
            return Err(PartitionError::image_corrupt("bad magic"));
        }
        if header.version != IMAGE_VERSION {
            return Err(PartitionError::image_corrupt(format!(
                "unsupported image version {}",
                header.version
            )));
        }
        if header.record_size as usize != plan.record_size {
            return Err(PartitionError::image_corrupt(format!(
                "image record size {} does not match schema record size {}",
                header.record_size, plan.record_size
            )));
        }
        if header.first > header.last {
            return Err(PartitionError::image_corrupt("span bounds inverted"));
        }

        let mut index = None;
        let mut bitmap = None;
        let mut zones = Vec::new();
        for _ in 0..header.block_count {
            let (kind, body) = read_block(&mut r).ok_or_else(|| PartitionError::image_corrupt("block truncated"))?;
            match kind {
                BLOCK_LEARNED => index = Some(LearnedIndex::from_bytes(body)?),
                BLOCK_CATEGORICAL => bitmap = Some(CategoricalBitmap::from_bytes(body)?),
                BLOCK_ZONE_MAP => zones.push(ZoneMap::from_bytes(body)?),
                other => {
                    return Err(PartitionError::image_corrupt(format!(
                        "unknown block kind {}",
                        other
                    )))
                }
            }
        }
        let index = index.ok_or_else(|| PartitionError::image_corrupt("missing learned index block"))?;
        if r.position() != header.records_offset as usize {
            return Err(PartitionError::image_corrupt(format!(
                "blocks end at {}, records declared at {}",
                r.position(),
                header.records_offset
            )));
        }

        let count = header.record_count as usize;
        let end = (header.records_offset as usize).saturating_add(count.saturating_mul(plan.record_size));
        if count > header.max_records as usize || end + TRAILER_LEN > image.len() {
            return Err(PartitionError::image_corrupt(format!(
                "{} records do not fit the image",
                count
            )));
        }
        let mut records = Vec::with_capacity(header.max_records as usize);
        for slot in image[header.records_offset as usize..end].chunks_exact(plan.record_size) {
            records.push(Record::decode(slot, schema)?);
        }
        let sorted = records.windows(2).all(|w| w[0].sort_key() < w[1].sort_key());
        let span = KeySpan::new(header.first, header.last);
        if !sorted || !records.iter().all(|rec| span.contains(rec.key)) {
            return Err(PartitionError::image_corrupt("records unsorted or outside span"));
        }
        if index.len() != count {
            return Err(PartitionError::image_corrupt(format!(
                "learned index covers {} records, image holds {}",
                index.len(),
                count
            )));
        }

        Ok(Partition::from_parts(
            header.partition,
            span,
            header.max_records as usize,
            records,
            index,
            bitmap,
            zones,
        ))
    }
}

struct ImageHeader {
    magic: [u8; 4],
    version: u16,
    block_count: u16,
    partition: u32,
    record_count: u32,
    record_size: u32,
    max_records: u32,
    first: u128,
    last: u128,
    records_offset: u32,
}

fn read_metadata(r: &mut ByteReader<'_>) -> Option<ImageHeader> {
    let mut magic = [0u8; 4];
    magic.copy_from_slice(r.bytes(4)?);
    let version = r.u16()?;
    let _flags = r.u16()?;
    let block_count = r.u16()?;
    let _reserved = r.u16()?;
    let header = ImageHeader {
        magic,
        version,
        block_count,
        partition: r.u32()?,
        record_count: r.u32()?,
        record_size: r.u32()?,
        max_records: r.u32()?,
        first: r.u128()?,
        last: r.u128()?,
        records_offset: r.u32()?,
    };
    r.align(METADATA_LEN)?;
    Some(header)
}

fn write_block(w: &mut ByteWriter, kind: u8, body: &[u8]) {
    w.u8(kind).u32(body.len() as u32).bytes(body).align(BLOCK_ALIGN);
}

fn read_block<'a>(r: &mut ByteReader<'a>) -> Option<(u8, &'a [u8])> {
    let kind = r.u8()?;
    let len = r.u32()? as usize;
    let body = r.bytes(len)?;
    r.align(BLOCK_ALIGN)?;
    Some((kind, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{FieldType, PartitionErrorCode};

    fn setup() -> (RecordSchema, CapacityPlan, Partition) {
        let schema = RecordSchema::new(vec![FieldType::I32, FieldType::Category], 4, 1)
            .with_categorical_field(1);
        let plan = CapacityPlan::for_schema(&schema, 4096).unwrap();
        let mut tile = Partition::new(3, KeySpan::new(0, 1 << 20), plan.max_records);
        for i in 0..10u32 {
            let record = Record::new(
                u128::from(i) * 97,
                i,
                vec![i64::from(i) - 5, i64::from(i % 2)],
                vec![1, -1, 2, -2],
                vec![],
            );
            tile.insert(record, &schema).unwrap();
        }
        (schema, plan, tile)
    }

    #[test]
    fn test_image_is_exactly_node_sized() {
        let (schema, plan, tile) = setup();
        let image = tile.export_for_distribution(&schema, &plan).unwrap();
        assert_eq!(image.len(), 4096);
        assert_eq!(&image[..4], b"TILE");
    }

    #[test]
    fn test_image_restores_partition() {
        let (schema, plan, tile) = setup();
        let image = tile.export_for_distribution(&schema, &plan).unwrap();
        let loaded = Partition::from_image(&image, &schema, &plan).unwrap();
        assert_eq!(loaded.id(), 3);
        assert_eq!(loaded.span(), tile.span());
        assert_eq!(loaded.records(), tile.records());
        assert_eq!(loaded.index(), tile.index());
        assert_eq!(loaded.bitmap(), tile.bitmap());
        assert_eq!(loaded.zone(0).unwrap().min(), -5);
        assert_eq!(loaded.lookup(97 * 4).unwrap().id, 4);
    }

    #[test]
    fn test_corrupt_image_rejected() {
        let (schema, plan, tile) = setup();
        let mut image = tile.export_for_distribution(&schema, &plan).unwrap();
        image[200] ^= 0xFF;
        let err = Partition::from_image(&image, &schema, &plan).unwrap_err();
        assert_eq!(err.code(), PartitionErrorCode::ImageCorrupt);

        let short = vec![0u8; 100];
        assert!(Partition::from_image(&short, &schema, &plan).is_err());
    }

    #[test]
    fn test_full_partition_fits_image() {
        let (schema, plan, _) = setup();
        let mut tile = Partition::new(1, KeySpan::new(0, u128::MAX), plan.max_records);
        for i in 0..plan.max_records as u32 {
            let record = Record::new(u128::from(i) << 64, i, vec![0, i64::from(i % 16)], vec![0; 4], vec![]);
            tile.insert(record, &schema).unwrap();
        }
        let image = tile.export_for_distribution(&schema, &plan).unwrap();
        assert_eq!(image.len(), plan.node_capacity);
    }
}
