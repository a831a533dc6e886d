use std::fs::OpenOptions;
use std::io::{Read as _, Write as _};

use clap::{value_parser, Arg, ArgAction, Command};
use exhume_ewf::ewf::{
    EwfReader, EwfWriter, EwfWriterConfig, FileBackingStorage, LoggingProgress,
};
use log::error;

fn cli() -> Command {
    Command::new("exhume_ewf")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Read from and write to EWFv1 (Expert Witness Format) evidence containers.")
        .subcommand_required(true)
        .subcommand(
            Command::new("read")
                .about("Reads a byte range out of an EWF container and writes it to stdout.")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_parser(value_parser!(String))
                        .required(true)
                        .help("Path to the .E01 (or similarly named) EWF container."),
                )
                .arg(
                    Arg::new("offset")
                        .short('o')
                        .long("offset")
                        .value_parser(value_parser!(u64))
                        .default_value("0")
                        .help("Logical offset to start reading from."),
                )
                .arg(
                    Arg::new("size")
                        .short('s')
                        .long("size")
                        .value_parser(value_parser!(usize))
                        .required(true)
                        .help("Number of bytes to read."),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Print the case header and container size before reading."),
                ),
        )
        .subcommand(
            Command::new("write")
                .about("Packages a plain file into a new EWFv1 container.")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_parser(value_parser!(String))
                        .required(true)
                        .help("Path to the raw source file to package."),
                )
                .arg(
                    Arg::new("output")
                        .short('O')
                        .long("output")
                        .value_parser(value_parser!(String))
                        .required(true)
                        .help("Path the new EWF container is written to."),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Report each table flush as it is written."),
                ),
        )
}

fn run_read(input: &str, offset: u64, size: usize, verbose: bool) {
    let file = match OpenOptions::new().read(true).open(input) {
        Ok(file) => file,
        Err(err) => {
            error!("Error opening '{input}': {err}");
            std::process::exit(1);
        }
    };

    let mut reader = match EwfReader::open(FileBackingStorage::new(file)) {
        Ok(reader) => reader,
        Err(err) => {
            error!("Error opening EWF container: {err}");
            std::process::exit(1);
        }
    };

    if verbose {
        println!("------------------------------------------------------------");
        println!("Container size : {} bytes", reader.size());
        println!("Chunk size     : {} bytes", reader.chunk_size());
        if let Some(header) = reader.case_header() {
            println!("Case header    : {}", String::from_utf8_lossy(header));
        }
        println!("------------------------------------------------------------");
    }

    let data = match reader.read(offset, size) {
        Ok(data) => data,
        Err(err) => {
            error!("Error reading from container: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = std::io::stdout().write_all(&data) {
        error!("Error writing to stdout: {err}");
        std::process::exit(1);
    }
}

fn run_write(input: &str, output: &str, verbose: bool) {
    let mut source = match OpenOptions::new().read(true).open(input) {
        Ok(file) => file,
        Err(err) => {
            error!("Error opening '{input}': {err}");
            std::process::exit(1);
        }
    };

    let destination = match OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
    {
        Ok(file) => file,
        Err(err) => {
            error!("Error creating '{output}': {err}");
            std::process::exit(1);
        }
    };

    let config = if verbose {
        EwfWriterConfig {
            progress: Some(Box::new(LoggingProgress)),
            ..EwfWriterConfig::default()
        }
    } else {
        EwfWriterConfig::default()
    };

    let mut writer = match EwfWriter::open_with_config(FileBackingStorage::new(destination), config)
    {
        Ok(writer) => writer,
        Err(err) => {
            error!("Error opening EWF writer: {err}");
            std::process::exit(1);
        }
    };

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                error!("Error reading '{input}': {err}");
                std::process::exit(1);
            }
        };
        if let Err(err) = writer.write(&buf[..n]) {
            error!("Error writing chunk to '{output}': {err}");
            std::process::exit(1);
        }
    }

    if let Err(err) = writer.close() {
        error!("Error finalizing '{output}': {err}");
        std::process::exit(1);
    }

    println!(
        "Wrote {} chunks across {} table(s) to '{output}'.",
        writer.chunk_count(),
        writer.table_count()
    );
}

fn main() {
    env_logger::init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("read", sub)) => {
            let input = sub.get_one::<String>("input").unwrap();
            let offset = *sub.get_one::<u64>("offset").unwrap();
            let size = *sub.get_one::<usize>("size").unwrap();
            let verbose = sub.get_flag("verbose");
            run_read(input, offset, size, verbose);
        }
        Some(("write", sub)) => {
            let input = sub.get_one::<String>("input").unwrap();
            let output = sub.get_one::<String>("output").unwrap();
            let verbose = sub.get_flag("verbose");
            run_write(input, output, verbose);
        }
        _ => unreachable!("subcommand_required(true) guarantees a match above"),
    }
}
