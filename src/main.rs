// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/main.rs - Command-line tool for extracting CTB settings files.
 *  Copyright (C) 2026  Forest Crossman <cyrozap@gmail.com>
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::{LevelFilter, info};

use ctbparser::decoder::DecodedContainer;
use ctbparser::{Result, parse_settings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Increase log verbosity (repeat for more detail).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the settings from a CTB file.
    Extract {
        /// Where the extracted settings should be written. Defaults to stdout.
        #[arg(short, long)]
        outfile: Option<PathBuf>,

        /// Overwrite the output file if it already exists.
        #[arg(short, long)]
        force: bool,

        /// Write the raw settings text instead of parsing it into JSON.
        #[arg(long)]
        no_parse: bool,

        /// Pretty-print the JSON output.
        #[arg(long, conflicts_with = "no_parse")]
        pretty: bool,

        /// The file to read.
        infile: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Extract {
            outfile,
            force,
            no_parse,
            pretty,
            infile,
        } => match extract(&infile, outfile.as_deref(), force, !no_parse, pretty) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("Error extracting {:?}: {}", &infile, error);
                ExitCode::FAILURE
            }
        },
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn extract(
    infile: &Path,
    outfile: Option<&Path>,
    force: bool,
    parse: bool,
    pretty: bool,
) -> Result<()> {
    let decoded = DecodedContainer::from_filename(infile)?;
    info!(
        "Decoded {:?}: file version {:?}, format version {:?}, compression {}",
        infile,
        decoded.file_version(),
        decoded.format_version(),
        decoded.compression()
    );

    let output = render(decoded, parse, pretty)?;
    write_output(outfile, force, &output)
}

/// Turns a decoded container into the bytes to write: its settings as JSON,
/// or the raw settings text when `parse` is false.
fn render(decoded: DecodedContainer, parse: bool, pretty: bool) -> Result<Vec<u8>> {
    if !parse {
        return Ok(decoded.into_data());
    }
    let settings = parse_settings(decoded.data())?;
    let json = if pretty {
        serde_json::to_vec_pretty(&settings)?
    } else {
        serde_json::to_vec(&settings)?
    };
    Ok(json)
}

/// Writes `output` to `path`, or to stdout when there is no path.
///
/// An existing file is only replaced when `force` is set; otherwise it is
/// left alone and a notice goes to stderr.
fn write_output(path: Option<&Path>, force: bool, output: &[u8]) -> Result<()> {
    let Some(path) = path else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(output)?;
        stdout.flush()?;
        return Ok(());
    };

    let mut options = OpenOptions::new();
    if force {
        options.write(true).create(true).truncate(true);
    } else {
        options.write(true).create_new(true);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            eprintln!("{} already exists, skipping", path.display());
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };
    file.write_all(output)?;
    file.flush()?;
    info!("Wrote {} bytes to {:?}", output.len(), path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use adler2::adler32_slice;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    const SETTINGS: &[u8] = b"description=\"\nscale_factor=1.0\naci_table{\n 0=\"Color_1\n}\n\0";

    fn container() -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SETTINGS).unwrap();
        let payload = encoder.finish().unwrap();

        let mut out = b"PIAFILEVERSION_2.0,CTBVER1,compress\r\npmzlibcodec".to_vec();
        out.resize(48, 0);
        out.extend_from_slice(&adler32_slice(&payload).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&u16::try_from(payload.len()).unwrap().to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    fn decoded() -> DecodedContainer {
        DecodedContainer::from_reader(container().as_slice()).unwrap()
    }

    #[test]
    fn creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_output(Some(path.as_path()), false, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, b"previous contents").unwrap();

        write_output(Some(path.as_path()), false, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"previous contents");
    }

    #[test]
    fn replaces_existing_file_with_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, b"previous contents").unwrap();

        write_output(Some(path.as_path()), true, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.json");
        assert!(write_output(Some(path.as_path()), false, b"{}").is_err());
    }

    #[test]
    fn raw_output_is_settings_text() {
        let expected = decoded().data().to_vec();
        assert_eq!(render(decoded(), false, false).unwrap(), expected);
        assert_eq!(expected.as_slice(), SETTINGS);
    }

    #[test]
    fn parsed_output_is_json() {
        assert_eq!(
            render(decoded(), true, false).unwrap(),
            br#"{"description":"","scale_factor":1.0,"aci_table":{"0":"Color_1"}}"#
        );
        let pretty = String::from_utf8(render(decoded(), true, true).unwrap()).unwrap();
        assert!(pretty.contains("\n  \"scale_factor\": 1.0,\n"), "{}", pretty);
    }

    #[test]
    fn extracts_file_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let infile = dir.path().join("monochrome.ctb");
        let outfile = dir.path().join("monochrome.txt");
        fs::write(&infile, container()).unwrap();

        extract(&infile, Some(outfile.as_path()), false, false, false).unwrap();
        assert_eq!(fs::read(&outfile).unwrap(), SETTINGS);
    }
}
