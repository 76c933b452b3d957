use std::fs;

use anyhow::{Context, Result};
use log::info;

use super::command::UnpackArgs;
use crate::input::InputReader;
use wadec::inflate::{InflateStats, inflate_with_stats};
use wadec::resource::{ArmorHeader, load_resource_with_stats};

/// A core binary together with what it took to recover it.
#[derive(Debug)]
pub struct Unpacked {
    /// `None` for bare DEFLATE input.
    pub header: Option<ArmorHeader>,
    pub encoded_len: usize,
    pub deflated_len: usize,
    pub stats: InflateStats,
    pub data: Vec<u8>,
}

pub fn unpack(input: &[u8], raw: bool) -> Result<Unpacked> {
    if raw {
        let (data, stats) = inflate_with_stats(input).context("Failed to inflate raw input")?;
        return Ok(Unpacked {
            header: None,
            encoded_len: input.len(),
            deflated_len: input.len(),
            stats,
            data,
        });
    }

    // line breaks are data in dynEncode bodies, so the text is taken as is
    let source = std::str::from_utf8(input).context("Armored input is not valid UTF-8")?;
    let loaded = load_resource_with_stats(source).context("Failed to load armored resource")?;

    Ok(Unpacked {
        header: Some(loaded.header),
        encoded_len: loaded.encoded_len,
        deflated_len: loaded.deflated_len,
        stats: loaded.stats,
        data: loaded.data,
    })
}

pub fn read_and_unpack(input: &std::path::Path, raw: bool) -> Result<(String, Unpacked)> {
    let mut reader = InputReader::new(input)?;
    let bytes = reader.read_all()?;
    let unpacked = unpack(&bytes, raw).with_context(|| format!("{} is not a valid core", reader.name()))?;
    Ok((reader.name().to_string(), unpacked))
}

pub fn cmd_unpack(args: &UnpackArgs) -> Result<()> {
    let (name, unpacked) = read_and_unpack(&args.input, args.raw)?;

    info!(
        "{name}: {} deflated bytes in {} blocks inflate to {} bytes",
        unpacked.deflated_len,
        unpacked.stats.blocks(),
        unpacked.data.len()
    );

    match &args.output {
        Some(path) => {
            fs::write(path, &unpacked.data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => info!("Verified {name}"),
    }

    Ok(())
}
