#[macro_use]
extern crate clap;

use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use clap::Arg;
use rcc::target::Target;

const RED: &str = "\x1b[1;31m";
const YELLOW: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

#[derive(Debug)]
enum IoContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Io(io::Error, IoContext, PathBuf),
    Compile(cfront::Error),
    UnknownTarget(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err, context, path) => write!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IoContext::ReadInput => "reading input",
                    IoContext::WriteOutput => "writing output",
                },
                path.display(),
                err
            ),
            Error::Compile(err) => write!(f, "{}", err),
            Error::UnknownTarget(name) => write!(
                f,
                "unknown target '{}' (expected x86_64, aarch64, arm32 or msp430)",
                name
            ),
        }
    }
}

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Writes the assembly here instead of standard output"),
        )
        .arg(
            Arg::with_name("target")
                .short("t")
                .long("target")
                .takes_value(true)
                .value_name("TARGET")
                .help("Target architecture: x86_64, aarch64, arm32 or msp430"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("output");
    let target = matches.value_of("target");

    if let Err(err) = run(input, output, target) {
        eprintln!("{}error:{} {}", RED, RESET, err);
        process::exit(1);
    }
}

fn run(input: &str, output: Option<&str>, target: Option<&str>) -> Result<(), Error> {
    let target = match target {
        Some(name) => name
            .parse()
            .map_err(|_| Error::UnknownTarget(name.to_string()))?,
        None => Target::host(),
    };

    let input_path = Path::new(input);
    let input_file = File::open(input_path)
        .map_err(|err| Error::Io(err, IoContext::ReadInput, input_path.to_owned()))?;
    let mut reader = BufReader::new(input_file);
    let mut source = String::new();
    reader
        .read_to_string(&mut source)
        .map_err(|err| Error::Io(err, IoContext::ReadInput, input_path.to_owned()))?;

    let (asm, warnings) = cfront::compile(&source, target).map_err(|err| {
        Error::Compile(match input_path.to_str() {
            Some(path_str) => err.with_path(path_str),
            None => err,
        })
    })?;

    for warning in &warnings {
        eprintln!("{}warning:{} {}", YELLOW, RESET, warning);
    }

    match output {
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            let file = File::create(&path)
                .map_err(|err| Error::Io(err, IoContext::WriteOutput, path.clone()))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(asm.as_bytes())
                .and_then(|_| writer.flush())
                .map_err(|err| Error::Io(err, IoContext::WriteOutput, path))?;
        }
        None => {
            io::stdout()
                .write_all(asm.as_bytes())
                .map_err(|err| Error::Io(err, IoContext::WriteOutput, PathBuf::from("<stdout>")))?;
        }
    }
    Ok(())
}
