//! Batched 3D Model container
//!
//! Layout: a 28-byte header, the feature table JSON, the batch table JSON, then the GLB.
//! Both tables are space-padded so the GLB starts on an 8-byte boundary. Binary table
//! sections are never written.

use bytemuck::{Pod, Zeroable};
use serde_json::{json, Value};

use crate::glb::pad_to_alignment;
use crate::{TileError, TileResult};

pub const B3DM_MAGIC: [u8; 4] = *b"b3dm";
pub const B3DM_VERSION: u32 = 1;
pub const B3DM_HEADER_LEN: usize = 28;

/// B3DM file header (28 bytes, little endian)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct B3dmHeader {
    pub magic: [u8; 4],
    pub version: u32,
    /// Total byte length of the file
    pub byte_length: u32,
    pub feature_table_json_byte_length: u32,
    pub feature_table_binary_byte_length: u32,
    pub batch_table_json_byte_length: u32,
    pub batch_table_binary_byte_length: u32,
}

impl B3dmHeader {
    fn into_le(self) -> Self {
        Self {
            magic: self.magic,
            version: self.version.to_le(),
            byte_length: self.byte_length.to_le(),
            feature_table_json_byte_length: self.feature_table_json_byte_length.to_le(),
            feature_table_binary_byte_length: self.feature_table_binary_byte_length.to_le(),
            batch_table_json_byte_length: self.batch_table_json_byte_length.to_le(),
            batch_table_binary_byte_length: self.batch_table_binary_byte_length.to_le(),
        }
    }

    fn into_native(self) -> Self {
        Self {
            magic: self.magic,
            version: u32::from_le(self.version),
            byte_length: u32::from_le(self.byte_length),
            feature_table_json_byte_length: u32::from_le(self.feature_table_json_byte_length),
            feature_table_binary_byte_length: u32::from_le(self.feature_table_binary_byte_length),
            batch_table_json_byte_length: u32::from_le(self.batch_table_json_byte_length),
            batch_table_binary_byte_length: u32::from_le(self.batch_table_binary_byte_length),
        }
    }

    /// Parse and validate the header at the start of `data`
    pub fn read(data: &[u8]) -> TileResult<Self> {
        let bytes = data
            .get(..B3DM_HEADER_LEN)
            .ok_or_else(|| TileError::InvalidPayload("file too small for b3dm header".into()))?;
        let header = bytemuck::pod_read_unaligned::<B3dmHeader>(bytes).into_native();

        if header.magic != B3DM_MAGIC {
            return Err(TileError::InvalidPayload(format!("invalid magic {:?}", header.magic)));
        }
        if header.version != B3DM_VERSION {
            return Err(TileError::InvalidPayload(format!(
                "unsupported b3dm version {}",
                header.version
            )));
        }
        Ok(header)
    }

    /// Byte offset of the embedded GLB
    pub fn glb_offset(&self) -> usize {
        B3DM_HEADER_LEN
            + self.feature_table_json_byte_length as usize
            + self.feature_table_binary_byte_length as usize
            + self.batch_table_json_byte_length as usize
            + self.batch_table_binary_byte_length as usize
    }
}

/// Decoded sections of a b3dm file
#[derive(Debug)]
pub struct B3dmParts<'a> {
    pub header: B3dmHeader,
    pub feature_table: Value,
    pub batch_table: Option<Value>,
    pub glb: &'a [u8],
}

/// Wrap a GLB into a single-feature b3dm named `batch_name`
pub fn wrap_glb(glb: &[u8], batch_name: &str) -> TileResult<Vec<u8>> {
    let mut feature_table = serde_json::to_vec(&json!({ "BATCH_LENGTH": 1 }))?;
    pad_to_alignment(&mut feature_table, B3DM_HEADER_LEN, 8, b' ');

    let mut batch_table = serde_json::to_vec(&json!({
        "batchId": [0],
        "name": [batch_name],
    }))?;
    pad_to_alignment(&mut batch_table, B3DM_HEADER_LEN + feature_table.len(), 8, b' ');

    let total = B3DM_HEADER_LEN + feature_table.len() + batch_table.len() + glb.len();
    let byte_length = u32::try_from(total)
        .map_err(|_| TileError::InvalidPayload(format!("b3dm of {total} bytes exceeds 4 GiB")))?;

    let header = B3dmHeader {
        magic: B3DM_MAGIC,
        version: B3DM_VERSION,
        byte_length,
        feature_table_json_byte_length: feature_table.len() as u32,
        feature_table_binary_byte_length: 0,
        batch_table_json_byte_length: batch_table.len() as u32,
        batch_table_binary_byte_length: 0,
    }
    .into_le();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&feature_table);
    out.extend_from_slice(&batch_table);
    out.extend_from_slice(glb);
    Ok(out)
}

/// Split a b3dm file into its header, tables and GLB
pub fn read_b3dm(data: &[u8]) -> TileResult<B3dmParts<'_>> {
    let header = B3dmHeader::read(data)?;
    if header.byte_length as usize != data.len() {
        return Err(TileError::InvalidPayload(format!(
            "b3dm declares {} bytes but holds {}",
            header.byte_length,
            data.len()
        )));
    }
    let glb_offset = header.glb_offset();
    if glb_offset > data.len() {
        return Err(TileError::InvalidPayload("tables overrun file".into()));
    }

    let ft_start = B3DM_HEADER_LEN;
    let ft_end = ft_start + header.feature_table_json_byte_length as usize;
    let feature_table = serde_json::from_slice(&data[ft_start..ft_end])?;

    let bt_start = ft_end + header.feature_table_binary_byte_length as usize;
    let bt_end = bt_start + header.batch_table_json_byte_length as usize;
    let batch_table = if bt_end > bt_start {
        Some(serde_json::from_slice(&data[bt_start..bt_end])?)
    } else {
        None
    };

    Ok(B3dmParts {
        header,
        feature_table,
        batch_table,
        glb: &data[glb_offset..],
    })
}
