//! Minimal NumPy `.npy` support
//!
//! Reads one-dimensional (or `(n, 1)`) little-endian integer-valued arrays,
//! which covers the phy files the adapters parse. Format versions 1.0, 2.0 and 3.0.

use crate::error::{Result, SorterError};
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Element type of an `.npy` array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpyDType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl NpyDType {
    fn parse(descr: &str) -> Result<Self> {
        let (order, code) = descr.split_at(1.min(descr.len()));
        if order == ">" {
            return Err(SorterError::Parse(format!("big-endian npy not supported: {}", descr)));
        }
        let code = if matches!(order, "<" | "|" | "=") { code } else { descr };
        Ok(match code {
            "i1" => NpyDType::I8,
            "u1" => NpyDType::U8,
            "i2" => NpyDType::I16,
            "u2" => NpyDType::U16,
            "i4" => NpyDType::I32,
            "u4" => NpyDType::U32,
            "i8" => NpyDType::I64,
            "u8" => NpyDType::U64,
            "f4" => NpyDType::F32,
            "f8" => NpyDType::F64,
            _ => return Err(SorterError::Parse(format!("unsupported npy dtype: {}", descr))),
        })
    }

    fn size(&self) -> usize {
        match self {
            NpyDType::I8 | NpyDType::U8 => 1,
            NpyDType::I16 | NpyDType::U16 => 2,
            NpyDType::I32 | NpyDType::U32 | NpyDType::F32 => 4,
            NpyDType::I64 | NpyDType::U64 | NpyDType::F64 => 8,
        }
    }
}

/// Parsed `.npy` header
#[derive(Debug, Clone, PartialEq)]
pub struct NpyHeader {
    pub dtype: NpyDType,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl NpyHeader {
    /// `None` if the shape product overflows
    pub fn num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

/// Split an `.npy` file into header and data
pub fn parse_header(bytes: &[u8]) -> Result<(NpyHeader, &[u8])> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(SorterError::Parse("not an npy file".to_string()));
    }
    let major = bytes[6];
    let (header_len, start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(SorterError::Parse("truncated npy header".to_string()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(SorterError::Parse(format!("unsupported npy version {}", v))),
    };
    let end = start + header_len;
    let header_bytes = bytes
        .get(start..end)
        .ok_or_else(|| SorterError::Parse("truncated npy header".to_string()))?;
    let text = std::str::from_utf8(header_bytes)
        .map_err(|e| SorterError::Parse(format!("npy header is not text: {}", e)))?;

    let descr = dict_value(text, "descr")?
        .trim_matches(|c| c == '\'' || c == '"');
    let fortran_order = dict_value(text, "fortran_order")?.starts_with("True");
    let shape_text = dict_value(text, "shape")?;
    let shape = shape_text
        .trim_start_matches('(')
        .split(')')
        .next()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| SorterError::Parse(format!("bad npy shape '{}': {}", shape_text, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let header = NpyHeader {
        dtype: NpyDType::parse(descr)?,
        fortran_order,
        shape,
    };
    Ok((header, &bytes[end..]))
}

/// Raw text following `'key':` in the header dict, up to the next top-level comma
fn dict_value<'a>(text: &'a str, key: &str) -> Result<&'a str> {
    let quoted = format!("'{}'", key);
    let pos = text
        .find(&quoted)
        .ok_or_else(|| SorterError::Parse(format!("npy header missing '{}'", key)))?;
    let rest = text[pos + quoted.len()..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| SorterError::Parse(format!("malformed npy header near '{}'", key)))?
        .trim_start();

    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' | '}' if depth == 0 => return Ok(rest[..i].trim()),
            _ => {}
        }
    }
    Ok(rest.trim())
}

fn decode(dtype: NpyDType, b: &[u8]) -> f64 {
    match dtype {
        NpyDType::I8 => b[0] as i8 as f64,
        NpyDType::U8 => b[0] as f64,
        NpyDType::I16 => i16::from_le_bytes([b[0], b[1]]) as f64,
        NpyDType::U16 => u16::from_le_bytes([b[0], b[1]]) as f64,
        NpyDType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        NpyDType::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        NpyDType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        NpyDType::I64 | NpyDType::U64 | NpyDType::F64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&b[..8]);
            match dtype {
                NpyDType::I64 => i64::from_le_bytes(buf) as f64,
                NpyDType::U64 => u64::from_le_bytes(buf) as f64,
                _ => f64::from_le_bytes(buf),
            }
        }
    }
}

fn decode_i64(dtype: NpyDType, b: &[u8]) -> Option<i64> {
    let mut buf = [0u8; 8];
    match dtype {
        NpyDType::I64 => {
            buf.copy_from_slice(&b[..8]);
            Some(i64::from_le_bytes(buf))
        }
        NpyDType::U64 => {
            buf.copy_from_slice(&b[..8]);
            i64::try_from(u64::from_le_bytes(buf)).ok()
        }
        NpyDType::F32 | NpyDType::F64 => {
            let v = decode(dtype, b);
            (v.fract() == 0.0).then_some(v as i64)
        }
        _ => Some(decode(dtype, b) as i64),
    }
}

/// Flat element data of a one-dimensional (or `(n, 1)`) array
fn flat_data<'a>(bytes: &'a [u8], path: &Path) -> Result<(NpyHeader, &'a [u8])> {
    let (header, data) = parse_header(bytes)
        .map_err(|e| SorterError::Parse(format!("{}: {}", path.display(), e)))?;
    if header.shape.iter().filter(|&&d| d != 1).count() > 1 {
        return Err(SorterError::Parse(format!(
            "{}: expected a 1-D array, got shape {:?}",
            path.display(),
            header.shape
        )));
    }
    let needed = header
        .num_elements()
        .and_then(|n| n.checked_mul(header.dtype.size()))
        .ok_or_else(|| {
            SorterError::Parse(format!(
                "{}: shape {:?} is too large",
                path.display(),
                header.shape
            ))
        })?;
    let data = data.get(..needed).ok_or_else(|| {
        SorterError::Parse(format!(
            "{}: {} data bytes, expected {}",
            path.display(),
            data.len(),
            needed
        ))
    })?;
    Ok((header, data))
}

/// Read an integer-valued array
pub fn read_npy_i64(path: &Path) -> Result<Vec<i64>> {
    let bytes = std::fs::read(path)?;
    let (header, data) = flat_data(&bytes, path)?;
    data.chunks_exact(header.dtype.size())
        .map(|b| {
            decode_i64(header.dtype, b).ok_or_else(|| {
                SorterError::Parse(format!("{}: non-integer value", path.display()))
            })
        })
        .collect()
}

/// Write a 1-D `<i8` array (format 1.0)
pub fn write_npy_i64(path: &Path, values: &[i64]) -> Result<()> {
    let dict = format!(
        "{{'descr': '<i8', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // Pad so magic + version + length + dict + newline is a multiple of 64
    let unpadded = MAGIC.len() + 4 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header = format!("{}{}\n", dict, " ".repeat(padding));

    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    file.write_all(MAGIC)?;
    file.write_all(&[1, 0])?;
    file.write_all(&(header.len() as u16).to_le_bytes())?;
    file.write_all(header.as_bytes())?;
    for v in values {
        file.write_all(&v.to_le_bytes())?;
    }
    file.flush()?;
    Ok(())
}
