//! DocSign operator CLI
//!
//! Validate placements, stamp signature images, sign and verify PDFs.
//! Key material and signer defaults come from `DOCSIGN_*` variables
//! (a `.env` file is honoured).

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docsign_core::EngineConfig;
use shared_crypto::CertifiedIdentity;
use shared_pdf::coords::validate_dimensions;
use shared_pdf::{embed, sign_pdf, validate_placement, validate_position, verify_pdf, StampPlacement};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "docsign")]
#[command(version, about = "Stamp, sign, and verify PDF documents")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a proposed signature position
    Validate {
        #[arg(long, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, allow_negative_numbers = true)]
        y: f64,
        #[arg(long, allow_negative_numbers = true)]
        page: i64,
        /// Signature payload (any non-empty text counts as present)
        #[arg(long)]
        data: Option<String>,
        #[arg(long)]
        width: Option<f64>,
        #[arg(long)]
        height: Option<f64>,
    },

    /// Draw a PNG onto pages at percentage positions
    Stamp {
        input: PathBuf,
        output: PathBuf,
        /// PNG signature image
        #[arg(long)]
        image: PathBuf,
        /// PAGE:X%:Y%[:WIDTH:HEIGHT], repeatable
        #[arg(long = "at", required = true, value_parser = parse_placement)]
        placements: Vec<StampPlacement>,
    },

    /// Apply a detached signature using the configured key material
    Sign {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },

    /// Check the last signature in a PDF
    Verify { input: PathBuf },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Stdout carries command output; logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Validate {
            x,
            y,
            page,
            data,
            width,
            height,
        } => {
            let result = validate_placement(Some(x), Some(y), Some(page), data.as_deref(), width, height);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.position_valid() {
                std::process::exit(2);
            }
        }

        Command::Stamp {
            input,
            output,
            image,
            placements,
        } => {
            check_placements(&placements)?;
            let source = read(&input)?;
            let png = read(&image)?;
            let stamped = embed(&source, Some(&png), &placements)?;
            write(&output, &stamped)?;
            info!(output = %output.display(), placements = placements.len(), "Stamped document");
        }

        Command::Sign {
            input,
            output,
            reason,
            location,
        } => {
            let config = EngineConfig::from_env()?;
            let identity = CertifiedIdentity::load(&config.key_material())
                .with_context(|| format!("loading key material from {}", config.keystore_path.display()))?;
            let options = config.signature_options(reason.as_deref(), location.as_deref());

            let source = read(&input)?;
            let signed = sign_pdf(&source, &identity, &options)?;
            write(&output, &signed)?;
            info!(output = %output.display(), bytes = signed.len(), "Signed document");
        }

        Command::Verify { input } => {
            let bytes = read(&input)?;
            let verified = verify_pdf(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&verified)?);
            if !verified.covers_whole_document {
                eprintln!("warning: content was appended after the signature");
            }
        }
    }

    Ok(())
}

fn read(path: &PathBuf) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn write(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

/// Reject positions and sizes that `validate` would refuse
fn check_placements(placements: &[StampPlacement]) -> Result<()> {
    for p in placements {
        let position = validate_position(Some(p.x_pct), Some(p.y_pct), Some(i64::from(p.page)));
        if !position.is_valid {
            bail!(
                "placement on page {} at ({}, {}): {}",
                p.page,
                p.x_pct,
                p.y_pct,
                position.error_details.unwrap_or(position.message)
            );
        }
        if !validate_dimensions(Some(p.width), Some(p.height)) {
            bail!(
                "placement on page {}: {}x{} is outside the allowed signature size",
                p.page,
                p.width,
                p.height
            );
        }
    }
    Ok(())
}

fn parse_placement(s: &str) -> Result<StampPlacement> {
    let parts: Vec<&str> = s.split(':').collect();
    let number = |i: usize| -> Result<f64> {
        parts[i]
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{:?} is not a number", parts[i]))
    };

    let page: u32 = parts[0]
        .trim()
        .parse()
        .with_context(|| format!("{:?} is not a page number", parts[0]))?;
    let placement = match parts.len() {
        3 => StampPlacement::new(page, number(1)?, number(2)?),
        5 => StampPlacement::new(page, number(1)?, number(2)?).with_size(number(3)?, number(4)?),
        _ => bail!("expected PAGE:X:Y or PAGE:X:Y:WIDTH:HEIGHT, got {:?}", s),
    };
    Ok(placement)
}
