use aimio::aim::{AimFile, AimReader, Volume};
use aimio::header::{AimMetadata, AimVersion, StorageFormat};
use aimio::isq::{IsqReader, ISQ_MAGIC};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aimio", about = "Inspect and convert Scanco AIM / ISQ volume files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print file metadata as JSON
    Info {
        input: PathBuf,
    },
    /// Re-encode an AIM or ISQ volume as AIM
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Header generation: 1.0, 1.1, 2.0, 3.0 (default: keep, 3.0 for ISQ)
        #[arg(long)]
        aim_version: Option<AimVersion>,
        /// Storage: D1Tchar, D1TbinCmp, D3Tbit8, D1TcharCmp, D1Tshort, D1Tfloat or auto
        /// (default: keep)
        #[arg(short, long)]
        storage: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let doc = if is_isq(&input)? {
                let reader = IsqReader::open(&input)?;
                let h = reader.header();
                json!({
                    "format":        "ISQ",
                    "path":          input.display().to_string(),
                    "byte_offset":   reader.byte_offset(),
                    "data_size":     reader.segments()[1].size,
                    "creation_date": h.creation_date_time().to_string(),
                    "header":        h,
                })
            } else {
                let reader = AimReader::open(&input)?;
                let segments: Vec<_> = reader
                    .blocks()
                    .segments
                    .iter()
                    .map(|s| json!({ "offset": s.offset, "size": s.size }))
                    .collect();
                json!({
                    "format":        "AIM",
                    "path":          input.display().to_string(),
                    "byte_offset":   reader.byte_offset(),
                    "buffer_format": reader.buffer_format()?,
                    "segments":      segments,
                    "metadata":      reader.metadata(),
                })
            };
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, aim_version, storage } => {
            let mut file = if is_isq(&input)? {
                load_isq(&input)?
            } else {
                AimFile::open(&input)?
            };

            if let Some(v) = aim_version {
                file.metadata.version = v;
            }
            match storage.as_deref() {
                None => {}
                Some(s) if s.eq_ignore_ascii_case("auto") => file.metadata.storage = None,
                Some(s) => {
                    let tag = StorageFormat::from_name(s)
                        .ok_or_else(|| format!("unknown storage format '{s}'"))?;
                    file.metadata.storage = Some(tag);
                }
            }

            let written = file.save(&output)?;
            info!(version = %written.version, storage = ?written.storage, "converted");
            println!(
                "Wrote {} (AIM {}, {})",
                output.display(),
                written.version,
                written.storage.map(|s| s.name()).unwrap_or("?")
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn is_isq(path: &Path) -> std::io::Result<bool> {
    let mut magic = [0u8; 16];
    let mut f = File::open(path)?;
    Ok(f.read_exact(&mut magic).is_ok() && &magic == ISQ_MAGIC)
}

fn load_isq(path: &Path) -> aimio::Result<AimFile> {
    let mut reader = IsqReader::open(path)?;
    let voxels = reader.read_volume()?;
    let h = reader.header();
    let metadata = AimMetadata {
        dimensions:     h.dim_p,
        element_size:   h.element_size(),
        processing_log: format!(
            "Converted from ISQ {}\nMeasurement {} created {}\n",
            h.name.trim_end(),
            h.index_measurement,
            h.creation_date_time()
        ),
        ..AimMetadata::default()
    };
    Ok(AimFile::new(metadata, Volume::Short(voxels)))
}
