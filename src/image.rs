//! Program image loading for the CLI binary.
//!
//! An image file is plain text, in a section-per-header format similar to
//! a linker trace dump: a `.region <base>` line introduces a
//! run of `ADDR WORD` hex pairs (one instruction or data word per line,
//! address and word both hex without a `0x` prefix), and a single
//! `.entry <addr>` line gives the initial program counter. `#` starts a
//! trailing comment; blank and comment-only lines are ignored.
//!
//! This has no counterpart in the core simulation modules: it exists only
//! because a runnable binary needs *some* way to get a program into guest
//! memory, and parsing ELF is explicitly out of scope.

use std::collections::BTreeMap;
use std::io::{self, BufRead};

use thiserror::Error;

use crate::address_space::{AddressSpace, Region};
use crate::simulator::Context;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("image has no .entry directive")]
    MissingEntry,
    #[error("line {line}: duplicate .entry directive")]
    DuplicateEntry { line: usize },
    #[error("entry point 0x{0:08x} falls outside every declared region")]
    EntryOutOfRange(u32),
    #[error("region at 0x{0:08x} overlaps a preceding region")]
    OverlappingRegion(u32),
    #[error("I/O error reading image: {0}")]
    Io(#[from] io::Error),
}

/// Parse an image from `source`, returning the regions it describes plus
/// the entry point to start execution at.
pub fn load(source: impl BufRead) -> Result<(AddressSpace, Context), ImageError> {
    let mut regions: Vec<(u32, BTreeMap<u32, u32>)> = Vec::new();
    let mut entry: Option<u32> = None;
    let mut current: Option<usize> = None;

    for (number, raw_line) in source.lines().enumerate() {
        let line_no = number + 1;
        let raw_line = raw_line?;
        let Some(text) = strip_comment(&raw_line) else {
            continue;
        };

        if let Some(rest) = text.strip_prefix(".region") {
            let base = parse_hex(rest.trim(), line_no)?;
            regions.push((base, BTreeMap::new()));
            current = Some(regions.len() - 1);
        } else if let Some(rest) = text.strip_prefix(".entry") {
            if entry.is_some() {
                return Err(ImageError::DuplicateEntry { line: line_no });
            }
            entry = Some(parse_hex(rest.trim(), line_no)?);
        } else {
            let mut terms = text.split_whitespace();
            let addr_str = terms.next().ok_or_else(|| ImageError::Malformed {
                line: line_no,
                reason: "expected an address/word pair".to_string(),
            })?;
            let word_str = terms.next().ok_or_else(|| ImageError::Malformed {
                line: line_no,
                reason: "missing word after address".to_string(),
            })?;
            let index = current.ok_or_else(|| ImageError::Malformed {
                line: line_no,
                reason: "address/word pair before any .region".to_string(),
            })?;
            let addr = parse_hex(addr_str, line_no)?;
            let word = parse_hex(word_str, line_no)?;
            regions[index].1.insert(addr, word);
        }
    }

    let entry = entry.ok_or(ImageError::MissingEntry)?;
    let built = regions
        .into_iter()
        .map(|(base, words)| build_region(base, words))
        .collect::<Result<Vec<_>, _>>()?;
    let in_range = built
        .iter()
        .any(|r| entry >= r.vaddr && entry < r.vaddr.wrapping_add(r.len_bytes()));
    if !in_range {
        return Err(ImageError::EntryOutOfRange(entry));
    }
    Ok((AddressSpace::new(built), Context { pc: entry }))
}

fn build_region(base: u32, words: BTreeMap<u32, u32>) -> Result<Region, ImageError> {
    if let Some(&addr) = words.keys().find(|&&addr| addr < base) {
        return Err(ImageError::OverlappingRegion(addr));
    }
    let highest = words.keys().copied().max().unwrap_or(base);
    let word_count = ((highest - base) / 4 + 1) as usize;
    let mut data = vec![0u32; word_count];
    for (addr, word) in words {
        data[((addr - base) / 4) as usize] = word;
    }
    Ok(Region::new(base, data))
}

fn strip_comment(line: &str) -> Option<&str> {
    let without_comment = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let trimmed = without_comment.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_hex(value: &str, line: usize) -> Result<u32, ImageError> {
    let value = value.strip_prefix("0x").unwrap_or(value);
    u32::from_str_radix(value, 16).map_err(|_| ImageError::Malformed {
        line,
        reason: format!("expected a hex value, found {value:?}"),
    })
}
