//! Thin command-line front end over the `evio` library:
//! `merge`, `read`, `write`, `convert`. Peripheral and illustrative, not a
//! complete CLI product — every subcommand is a few calls into
//! [`evio::Reader`]/[`evio::Writer`].

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evio::header::{FILE_TYPE_EVIO, FILE_TYPE_HIPO};
use evio::{ByteOrder, Reader, StructureNode, Writer, WriterConfig};

#[derive(Parser)]
#[command(name = "evio", about = "Read, write, merge, and convert EVIO event files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Concatenate every input file's events, in order, into one output file.
    Merge {
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        inputs: Vec<PathBuf>,
    },
    /// Print a summary of a file's records/blocks, byte order, and events.
    Read { file: PathBuf },
    /// Write `n` synthetic events to a new file, for smoke-testing a build.
    Write {
        file: PathBuf,
        n: u32,
    },
    /// Re-encode a file from one generation/format to another.
    Convert {
        input: PathBuf,
        in_format: Format,
        output: PathBuf,
        out_format: Format,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Format {
    Evio4,
    Evio6,
    Hipo,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Merge { output, inputs } => merge(&output, &inputs),
        Command::Read { file } => read_summary(&file),
        Command::Write { file, n } => write_synthetic(&file, n),
        Command::Convert {
            input,
            in_format,
            output,
            out_format,
        } => convert(&input, in_format, &output, out_format),
    }
}

fn merge(output: &PathBuf, inputs: &[PathBuf]) -> Result<()> {
    if inputs.is_empty() {
        bail!("merge requires at least one input file");
    }
    let output = output.to_string_lossy().into_owned();
    let mut writer = Writer::new_file(output, WriterConfig::default())
        .with_context(|| "opening merge output file")?;
    for input in inputs {
        let mut reader =
            Reader::from_file(input).with_context(|| format!("opening {}", input.display()))?;
        while let Some(bytes) = reader.next_event()? {
            writer.write_event_bytes(bytes)?;
        }
        tracing::info!(file = %input.display(), events = reader.event_count(), "merged input file");
    }
    writer.close()?;
    Ok(())
}

fn read_summary(file: &PathBuf) -> Result<()> {
    let reader = Reader::from_file(file).with_context(|| format!("opening {}", file.display()))?;
    println!("file: {}", file.display());
    println!("evio version: {}", reader.evio_version());
    println!("byte order: {:?}", reader.byte_order());
    println!("records/blocks: {}", reader.record_count());
    println!("events: {}", reader.event_count());
    if let Some(xml) = reader.dictionary_xml() {
        println!("dictionary: {} bytes of XML", xml.len());
    }
    Ok(())
}

fn write_synthetic(file: &PathBuf, n: u32) -> Result<()> {
    let path = file.to_string_lossy().into_owned();
    let mut writer = Writer::new_file(path, WriterConfig::default())
        .with_context(|| "opening output file")?;
    for i in 0..n {
        let mut bank = StructureNode::new_bank(1, 0, evio::DataType::Int32);
        bank.set_payload(evio::Payload::Int32(vec![i as i32]))?;
        writer.write_event(&bank)?;
    }
    writer.close()?;
    tracing::info!(n, "wrote synthetic events");
    Ok(())
}

fn convert(input: &PathBuf, in_format: Format, output: &PathBuf, out_format: Format) -> Result<()> {
    let _ = in_format; // the reader auto-detects generation/byte-order regardless of caller's claim
    let mut reader =
        Reader::from_file(input).with_context(|| format!("opening {}", input.display()))?;

    let mut config = WriterConfig::default().with_byte_order(ByteOrder::native());
    config = match out_format {
        Format::Evio4 => config.with_version(4),
        Format::Evio6 => config.with_version(6).with_file_type(FILE_TYPE_EVIO),
        Format::Hipo => config.with_version(6).with_file_type(FILE_TYPE_HIPO),
    };
    if let Some(xml) = reader.dictionary_xml() {
        config = config.with_dictionary_xml(xml.to_string());
    }

    let output = output.to_string_lossy().into_owned();
    let mut writer = Writer::new_file(output, config).with_context(|| "opening convert output")?;
    while let Some(bytes) = reader.next_event()? {
        writer.write_event_bytes(bytes)?;
    }
    writer.close()?;
    Ok(())
}
