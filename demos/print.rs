use std::fs::File;
use std::io::{self, BufReader, Write};
use std::time::Duration;

use catprint::{BleTransport, CatPrinter, DeviceInfo, Pf2Font, PrinterOptions, scan};
use tracing_subscriber::EnvFilter;

/// Example: Interactive cat printer session
/// - Scans for BLE printers
/// - Lets user select device
/// - Prints a PBM image or text from a file
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Scanning for cat printers for 4 seconds...");
    let devices = scan(Duration::from_secs(4)).await?;
    if devices.is_empty() {
        println!(
            "No devices found. Make sure your Bluetooth adapter is up and the printer is powered on and advertising."
        );
        return Ok(());
    }

    println!("Found devices:");
    for (i, d) in devices.iter().enumerate() {
        println!("  {}) id={} name={:?} model={}", i + 1, d.id, d.name, d.model);
    }

    let mut input = String::new();
    let chosen = loop {
        input.clear();
        prompt(&format!("Select device number to connect to (1-{}): ", devices.len()), &mut input)?;
        if let Ok(n) = input.trim().parse::<usize>() {
            if (1..=devices.len()).contains(&n) {
                break &devices[n - 1];
            }
        }
        println!("Invalid selection.");
    };

    run_interactive_session(chosen).await
}

fn prompt(question: &str, answer: &mut String) -> io::Result<()> {
    print!("{question}");
    io::stdout().flush()?;
    io::stdin().read_line(answer)?;
    Ok(())
}

/// Connects to the chosen printer, shows its state and prints one job.
async fn run_interactive_session(device: &DeviceInfo) -> Result<(), Box<dyn std::error::Error>> {
    println!("Connecting to device id={} name={:?} ...", device.id, device.name);
    let mut printer =
        CatPrinter::connect(BleTransport::new(device), device.model, PrinterOptions::new()).await?;
    println!("Connected successfully.");

    match printer.status(Duration::from_secs(5)).await {
        Ok(state) if state.has_faults() => println!("Printer reports: {}", state.faults().join(", ")),
        Ok(_) => println!("Printer is ready."),
        Err(e) => eprintln!("Failed to get status: {e}"),
    }

    let mut mode = String::new();
    prompt("Choose print mode: 1 for text, 2 for PBM image: ", &mut mode)?;

    let result = match mode.trim() {
        "1" => {
            let mut font_path = String::new();
            let mut text_path = String::new();
            prompt("Path to a PF2 font: ", &mut font_path)?;
            prompt("Path to the text file: ", &mut text_path)?;
            let font = Pf2Font::open(font_path.trim())?;
            let text = BufReader::new(File::open(text_path.trim())?);
            println!("Sending print job (text)...");
            printer.print_text(font, text).await
        }
        "2" => {
            let mut image_path = String::new();
            prompt("Path to a 384 pixel wide PBM image: ", &mut image_path)?;
            let image = BufReader::new(File::open(image_path.trim())?);
            println!("Sending print job (image)...");
            printer.print_pbm(image).await
        }
        _ => {
            println!("Invalid selection.");
            Ok(())
        }
    };
    match result {
        Ok(()) => println!("Print job completed."),
        Err(e) => eprintln!("{e}"),
    }

    printer.disconnect().await?;
    Ok(())
}
