use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use catprint::{CatPrinter, DumpTransport, Model, Pf2Font, PrinterOptions};
use tracing_subscriber::EnvFilter;

/// Example: Run a print job without a printer
/// - Usage: `dump <traffic.dump> <image.pbm>` or
///   `dump <traffic.dump> <text.txt> <font.pf2>`
/// - Every BLE write is recorded to the dump file, length-prefixed
/// - The printed raster is written next to it as `dump.pbm`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (dump, input, font) = match args.as_slice() {
        [dump, input] => (dump, input, None),
        [dump, input, font] => (dump, input, Some(font)),
        _ => {
            eprintln!("usage: dump <traffic.dump> <image.pbm | text.txt font.pf2>");
            std::process::exit(2);
        }
    };

    let dump_pbm = PathBuf::from(dump).with_file_name("dump.pbm");
    let options = PrinterOptions::new().with_dump_path(&dump_pbm);
    let transport = DumpTransport::new(BufWriter::new(File::create(dump)?));
    let mut printer = CatPrinter::connect(transport, Model::Gb01, options).await?;

    let input = BufReader::new(File::open(input)?);
    match font {
        Some(font) => printer.print_text(Pf2Font::open(font)?, input).await?,
        None => printer.print_pbm(input).await?,
    }

    let writer = printer.disconnect().await?.into_inner();
    writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    println!("traffic written to {dump}, raster to {}", dump_pbm.display());
    Ok(())
}
