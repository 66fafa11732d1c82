//! Binary cache of the extracted candidate array.
//!
//! Layout:
//!
//! ```text
//! version-string, NUL
//! u64  token_count (LE)
//! for each token:
//!     utf-8 encoded code point (1-4 bytes)
//!     varint uses (7-bit little-endian groups, MSB = continuation)
//! for each token:
//!     u32 left_parent_index  (LE, 0xFFFFFFFF = none)
//!     u32 right_parent_index (LE, 0xFFFFFFFF = none)
//! ```
//!
//! Any mismatch rejects the whole cache and extraction re-runs; rejection
//! is never an error to the caller.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::FORMAT_VERSION;
use crate::token::Token;

const NO_PARENT: u32 = u32::MAX;

/// Refuse to allocate for absurd token counts from corrupt headers.
const MAX_TOKENS: u64 = 1 << 36;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("cache format version mismatch")]
    Version,

    #[error("corrupt cache: {0}")]
    Corrupt(&'static str),

    #[error("trailing bytes after token table")]
    TrailingBytes,
}

type Result<T> = std::result::Result<T, CacheError>;

/// Cache file path for a given corpus root and extraction parameters.
pub fn cache_path(root: &Path, file_limit: Option<usize>, max_len: u8) -> PathBuf {
    let mut name = String::from(".candidates-");
    match file_limit {
        None => name.push_str("all"),
        Some(n) => {
            let _ = write!(name, "{n}");
        }
    }
    if max_len != 255 {
        let _ = write!(name, "-{max_len}");
    }
    name.push_str(".bin");
    root.join(name)
}

pub fn write_tokens(writer: &mut impl Write, tokens: &[Token]) -> io::Result<()> {
    writer.write_all(FORMAT_VERSION.as_bytes())?;
    writer.write_all(&[0])?;
    writer.write_all(&(tokens.len() as u64).to_le_bytes())?;

    let mut utf8 = [0u8; 4];
    for token in tokens {
        writer.write_all(token.chr().encode_utf8(&mut utf8).as_bytes())?;
        write_varint(writer, token.left_uses())?;
    }
    for token in tokens {
        let left = token.left_parent().unwrap_or(NO_PARENT);
        let right = token.right_parent().unwrap_or(NO_PARENT);
        writer.write_all(&left.to_le_bytes())?;
        writer.write_all(&right.to_le_bytes())?;
    }
    Ok(())
}

pub fn read_tokens(reader: &mut impl Read) -> Result<Vec<Token>> {
    let mut version = vec![0u8; FORMAT_VERSION.len() + 1];
    reader.read_exact(&mut version)?;
    if version.last() != Some(&0) || &version[..FORMAT_VERSION.len()] != FORMAT_VERSION.as_bytes()
    {
        return Err(CacheError::Version);
    }

    let mut u64_buf = [0u8; 8];
    reader.read_exact(&mut u64_buf)?;
    let count = u64::from_le_bytes(u64_buf);
    if count > MAX_TOKENS {
        return Err(CacheError::Corrupt("token count out of range"));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let chr = read_code_point(reader)?;
        let uses = read_varint(reader)?;
        entries.push((chr, uses));
    }

    let mut tokens: Vec<Token> = entries
        .into_iter()
        .map(|(chr, uses)| Token::new(chr, uses))
        .collect();

    let mut u32_buf = [0u8; 4];
    for i in 0..tokens.len() {
        reader.read_exact(&mut u32_buf)?;
        let left = parent_index(u32::from_le_bytes(u32_buf), tokens.len())?;
        reader.read_exact(&mut u32_buf)?;
        let right = parent_index(u32::from_le_bytes(u32_buf), tokens.len())?;
        tokens[i].set_parents(left, right);
    }

    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(CacheError::TrailingBytes);
    }
    Ok(tokens)
}

pub fn write_tokens_file(path: &Path, tokens: &[Token]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_tokens(&mut writer, tokens)?;
    writer.flush()
}

pub fn read_tokens_file(path: &Path) -> Result<Vec<Token>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_tokens(&mut reader)
}

fn parent_index(raw: u32, len: usize) -> Result<Option<u32>> {
    if raw == NO_PARENT {
        Ok(None)
    } else if (raw as usize) < len {
        Ok(Some(raw))
    } else {
        Err(CacheError::Corrupt("parent index out of range"))
    }
}

fn write_varint(writer: &mut impl Write, mut value: u64) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_all(&[byte])?;
        if value == 0 {
            return Ok(());
        }
    }
}

fn read_varint(reader: &mut impl Read) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(CacheError::Corrupt("varint overflows 64 bits"));
        }
        value |= u64::from(byte[0] & 0x7F) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_code_point(reader: &mut impl Read) -> Result<char> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes[..1])?;
    let len = match bytes[0] {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return Err(CacheError::Corrupt("invalid UTF-8 lead byte")),
    };
    reader.read_exact(&mut bytes[1..len])?;
    std::str::from_utf8(&bytes[..len])
        .ok()
        .and_then(|s| s.chars().next())
        .ok_or(CacheError::Corrupt("invalid UTF-8 code point"))
}
