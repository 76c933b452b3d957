use anyhow::Result;
use serde::Serialize;

use super::command::{InfoArgs, ReportFormat};
use super::unpack::{Unpacked, read_and_unpack};

#[derive(Debug, Serialize)]
struct BlockCounts {
    stored: u32,
    fixed: u32,
    dynamic: u32,
}

#[derive(Debug, Serialize)]
struct ResourceReport {
    input: String,
    armor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u8>,
    encoded_length: usize,
    deflated_length: usize,
    inflated_length: usize,
    deflate_bytes_consumed: u64,
    blocks: BlockCounts,
}

impl ResourceReport {
    fn new(input: String, unpacked: &Unpacked) -> Self {
        let header = unpacked.header.as_ref();
        Self {
            input,
            armor: header.map_or_else(|| "none".to_string(), |h| h.armor.to_string()),
            version: header.and_then(|h| h.version.clone()),
            offset: header.map(|h| h.offset),
            encoded_length: unpacked.encoded_len,
            deflated_length: unpacked.deflated_len,
            inflated_length: unpacked.data.len(),
            deflate_bytes_consumed: unpacked.stats.input_bytes,
            blocks: BlockCounts {
                stored: unpacked.stats.stored_blocks,
                fixed: unpacked.stats.fixed_blocks,
                dynamic: unpacked.stats.dynamic_blocks,
            },
        }
    }

    fn ratio(&self) -> f64 {
        if self.inflated_length == 0 {
            0.0
        } else {
            self.deflated_length as f64 / self.inflated_length as f64
        }
    }
}

pub fn cmd_info(args: &InfoArgs) -> Result<()> {
    log::info!("Inspecting embedded core: {}", args.input.display());

    let (name, unpacked) = read_and_unpack(&args.input, args.raw)?;
    let report = ResourceReport::new(name, &unpacked);

    match args.format {
        ReportFormat::Plain => display_report(&report),
        ReportFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&report)?),
    }

    Ok(())
}

fn display_report(report: &ResourceReport) {
    println!();
    println!("Embedded Core Information");
    println!("=========================");
    println!();
    println!("Resource");
    println!("  Input                     {}", report.input);
    println!("  Armor                     {}", report.armor);
    if let Some(version) = &report.version {
        println!("  Encoder version           {version}");
    }
    if let Some(offset) = report.offset {
        println!("  Offset                    {offset} (0x{offset:02x})");
    }
    println!("  Encoded length            {} characters", report.encoded_length);
    println!();
    println!("Compression");
    println!("  Deflated length           {} bytes", report.deflated_length);
    println!("  Inflated length           {} bytes", report.inflated_length);
    println!("  Ratio                     {:.1}%", report.ratio() * 100.0);
    println!("  Stream bytes consumed     {}", report.deflate_bytes_consumed);
    println!(
        "  Blocks                    {} stored, {} fixed, {} dynamic",
        report.blocks.stored, report.blocks.fixed, report.blocks.dynamic
    );
    println!();
}
