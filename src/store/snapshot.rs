//! `MemoryStore` 快照文件
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC   (8 bytes) "OLAPSUM\0"     │
//! │  Version (4 bytes) = 1             │
//! │  Raw len (4 bytes)                 │
//! │  Payload len (4 bytes)             │
//! │  Payload CRC32 (4 bytes)           │
//! ├────────────────────────────────────┤
//! │  PAYLOAD (LZ4 block)               │
//! │    sources    class → id → row     │
//! │    summaries  class → rows         │
//! │    dirty flags                     │
//! │    latest keys                     │
//! └────────────────────────────────────┘
//! ```
//! 所有整数小端序。

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate};

use crate::common::{OlapError, Result};
use crate::dirty::DirtyFlag;
use crate::value::Value;

use super::memory::{StoreState, SummaryRow};

const MAGIC: &[u8; 8] = b"OLAPSUM\0";
const VERSION: u32     = 1;
const HEADER_LEN: usize = 24;

// ── 编码 ──────────────────────────────────────────────────────────────────────

pub(crate) fn encode(state: &StoreState) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    write_state(&mut raw, state)?;

    let payload = lz4::block::compress(&raw, None, false)
        .map_err(|e| OlapError::Compression(e.to_string()))?;
    let raw_len = u32::try_from(raw.len())
        .map_err(|_| OlapError::Snapshot("state too large for a snapshot".into()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.write_u32::<LittleEndian>(VERSION)?;
    out.write_u32::<LittleEndian>(raw_len)?;
    out.write_u32::<LittleEndian>(payload.len() as u32)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

fn write_state(out: &mut Vec<u8>, state: &StoreState) -> Result<()> {
    out.write_u32::<LittleEndian>(state.sources.len() as u32)?;
    for (class, rows) in &state.sources {
        write_str(out, class)?;
        out.write_u32::<LittleEndian>(rows.len() as u32)?;
        for (id, row) in rows {
            out.write_u64::<LittleEndian>(*id)?;
            write_row(out, row)?;
        }
    }
    out.write_u64::<LittleEndian>(state.next_row_id)?;

    out.write_u32::<LittleEndian>(state.summaries.len() as u32)?;
    for (class, rows) in &state.summaries {
        write_str(out, class)?;
        out.write_u32::<LittleEndian>(rows.len() as u32)?;
        for row in rows {
            out.write_u32::<LittleEndian>(row.level)?;
            out.write_i64::<LittleEndian>(row.key)?;
            write_row(out, &row.dimensions)?;
            write_row(out, &row.measures)?;
        }
    }

    out.write_u32::<LittleEndian>(state.dirty_flags.len() as u32)?;
    for flag in &state.dirty_flags {
        write_str(out, &flag.class)?;
        match (flag.level, flag.key) {
            (Some(level), Some(key)) => {
                out.write_u8(1)?;
                out.write_u32::<LittleEndian>(level)?;
                out.write_i64::<LittleEndian>(key)?;
            }
            _ => out.write_u8(0)?,
        }
    }

    out.write_u32::<LittleEndian>(state.latest_keys.len() as u32)?;
    for (class, key) in &state.latest_keys {
        write_str(out, class)?;
        write_value(out, key)?;
    }
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    out.write_u32::<LittleEndian>(s.len() as u32)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_row(out: &mut Vec<u8>, row: &BTreeMap<String, Value>) -> Result<()> {
    out.write_u32::<LittleEndian>(row.len() as u32)?;
    for (name, value) in row {
        write_str(out, name)?;
        write_value(out, value)?;
    }
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null       => out.write_u8(0)?,
        Value::Bool(b)    => { out.write_u8(1)?; out.write_u8(*b as u8)?; }
        Value::Int64(v)   => { out.write_u8(2)?; out.write_i64::<LittleEndian>(*v)?; }
        Value::Float64(v) => { out.write_u8(3)?; out.write_f64::<LittleEndian>(*v)?; }
        Value::Date(d)    => { out.write_u8(4)?; out.write_i32::<LittleEndian>(d.num_days_from_ce())?; }
        Value::Str(s)     => { out.write_u8(5)?; write_str(out, s)?; }
    }
    Ok(())
}

// ── 解码 ──────────────────────────────────────────────────────────────────────

pub(crate) fn decode(data: &[u8]) -> Result<StoreState> {
    if data.len() < HEADER_LEN || &data[..8] != MAGIC {
        return Err(OlapError::Snapshot("invalid snapshot magic".into()));
    }
    let mut header = Cursor::new(&data[8..HEADER_LEN]);
    let version     = header.read_u32::<LittleEndian>().map_err(truncated)?;
    let raw_len     = header.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let payload_len = header.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let crc         = header.read_u32::<LittleEndian>().map_err(truncated)?;
    if version != VERSION {
        return Err(OlapError::Snapshot(format!("unsupported snapshot version {version}")));
    }

    let payload = &data[HEADER_LEN..];
    if payload.len() != payload_len {
        return Err(OlapError::Snapshot(format!(
            "payload is {} bytes, header says {payload_len}", payload.len(),
        )));
    }
    if crc32fast::hash(payload) != crc {
        return Err(OlapError::ChecksumMismatch);
    }
    let raw_len = i32::try_from(raw_len)
        .map_err(|_| OlapError::Snapshot("uncompressed length out of range".into()))?;
    let raw = lz4::block::decompress(payload, Some(raw_len))
        .map_err(|e| OlapError::Compression(e.to_string()))?;

    let mut cursor = Cursor::new(raw.as_slice());
    let state = read_state(&mut cursor)?;
    if (cursor.position() as usize) != raw.len() {
        return Err(OlapError::Snapshot("trailing bytes after snapshot state".into()));
    }
    Ok(state)
}

fn truncated(e: io::Error) -> OlapError {
    OlapError::Snapshot(format!("truncated snapshot: {e}"))
}

fn read_state(r: &mut Cursor<&[u8]>) -> Result<StoreState> {
    let mut state = StoreState::default();

    for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
        let class = read_str(r)?;
        let mut rows = BTreeMap::new();
        for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
            let id = r.read_u64::<LittleEndian>().map_err(truncated)?;
            rows.insert(id, read_row(r)?);
        }
        state.sources.insert(class, rows);
    }
    state.next_row_id = r.read_u64::<LittleEndian>().map_err(truncated)?;

    for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
        let class = read_str(r)?;
        let mut rows = Vec::new();
        for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
            let level = r.read_u32::<LittleEndian>().map_err(truncated)?;
            let key   = r.read_i64::<LittleEndian>().map_err(truncated)?;
            rows.push(SummaryRow {
                level,
                key,
                dimensions: read_row(r)?,
                measures:   read_row(r)?,
            });
        }
        state.summaries.insert(class, rows);
    }

    for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
        let class = read_str(r)?;
        let flag = match r.read_u8().map_err(truncated)? {
            0 => DirtyFlag::new_records(&class),
            1 => {
                let level = r.read_u32::<LittleEndian>().map_err(truncated)?;
                let key   = r.read_i64::<LittleEndian>().map_err(truncated)?;
                DirtyFlag { class, level: Some(level), key: Some(key) }
            }
            tag => return Err(OlapError::Snapshot(format!("unknown dirty flag tag {tag}"))),
        };
        state.dirty_flags.insert(flag);
    }

    for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
        let class = read_str(r)?;
        state.latest_keys.insert(class, read_value(r)?);
    }
    Ok(state)
}

fn read_str(r: &mut Cursor<&[u8]>) -> Result<String> {
    let len = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
    if len > remaining {
        return Err(OlapError::Snapshot(format!("string of {len} bytes exceeds remaining {remaining}")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(truncated)?;
    String::from_utf8(buf).map_err(|e| OlapError::Snapshot(format!("invalid utf-8: {e}")))
}

fn read_row(r: &mut Cursor<&[u8]>) -> Result<BTreeMap<String, Value>> {
    let mut row = BTreeMap::new();
    for _ in 0..r.read_u32::<LittleEndian>().map_err(truncated)? {
        let name = read_str(r)?;
        row.insert(name, read_value(r)?);
    }
    Ok(row)
}

fn read_value(r: &mut Cursor<&[u8]>) -> Result<Value> {
    Ok(match r.read_u8().map_err(truncated)? {
        0 => Value::Null,
        1 => Value::Bool(r.read_u8().map_err(truncated)? != 0),
        2 => Value::Int64(r.read_i64::<LittleEndian>().map_err(truncated)?),
        3 => Value::Float64(r.read_f64::<LittleEndian>().map_err(truncated)?),
        4 => {
            let days = r.read_i32::<LittleEndian>().map_err(truncated)?;
            let date = NaiveDate::from_num_days_from_ce_opt(days)
                .ok_or_else(|| OlapError::Snapshot(format!("date out of range: {days}")))?;
            Value::Date(date)
        }
        5 => Value::Str(read_str(r)?),
        tag => return Err(OlapError::Snapshot(format!("unknown value tag {tag}"))),
    })
}
