//! Deterministic overlapping chunking for document ingestion.
//!
//! Splits a document into fragments of at most `chunk_size` units, where
//! consecutive fragments share exactly `bleed` units, so statements spanning
//! a chunk boundary remain retrievable from at least one fragment. The size
//! unit is **characters (Unicode scalar values)** throughout; slicing never
//! lands inside a UTF-8 sequence.
//!
//! The split is a pure function of its inputs, which makes re-ingestion
//! idempotent: identical `(text, chunk_size, bleed)` always yields identical
//! fragments. No trimming is applied, so concatenating fragment `i` with its
//! first `bleed` characters removed (for `i > 0`) reconstructs the original
//! text exactly.

use crate::error::{Error, Result};

/// Validate a chunking configuration.
///
/// `bleed >= chunk_size` would stall the stride; `chunk_size == 0` would
/// produce empty fragments. Both are configuration errors.
pub fn validate(chunk_size: usize, bleed: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::Config("chunk_size must be greater than zero".into()));
    }
    if bleed >= chunk_size {
        return Err(Error::Config(format!(
            "bleed ({bleed}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Split `text` into ordered overlapping fragments.
///
/// Text no longer than `chunk_size` yields exactly one fragment equal to the
/// text. Fragment `i` covers characters
/// `[i * (chunk_size - bleed), i * (chunk_size - bleed) + chunk_size)`;
/// generation stops with the fragment that reaches the end of the text.
pub fn split(text: &str, chunk_size: usize, bleed: usize) -> Result<Vec<String>> {
    validate(chunk_size, bleed)?;

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return Ok(vec![text.to_string()]);
    }

    let stride = chunk_size - bleed;
    let mut fragments = Vec::with_capacity(chars.len() / stride + 1);
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(chars.len());
        fragments.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    Ok(fragments)
}
