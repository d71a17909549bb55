// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/decoder.rs - Container decoder library for CTB settings files.
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

/*!
 * # `decoder` Module
 *
 * This module validates the fixed 60-byte CTB container header and
 * decompresses the settings payload that follows it.
 *
 * ## Container Layout
 *
 * All integers are little-endian and the header is packed:
 *
 * | Offset | Size | Field             |
 * |--------|------|-------------------|
 * | 0      | 48   | metadata          |
 * | 48     | 4    | Adler-32 checksum |
 * | 52     | 2    | unknown flag      |
 * | 54     | 2    | marker A (`1`)    |
 * | 56     | 2    | compressed size   |
 * | 58     | 2    | marker B (`0`)    |
 *
 * The metadata holds three comma-separated fields: the file version, the
 * format version, and the compression descriptor. The compressed payload
 * follows the header immediately.
 *
 * ## Usage Example
 *
 * ```no_run
 * use ctbparser::decoder::DecodedContainer;
 *
 * fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let decoded = DecodedContainer::from_filename("acad.ctb")?;
 *     println!("{} / {}", decoded.file_version(), decoded.format_version());
 *     println!("{} bytes of settings text", decoded.data().len());
 *     Ok(())
 * }
 * ```
 */

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::io::prelude::*;
use std::path::Path;

use adler2::adler32_slice;
use flate2::read::ZlibDecoder;
use log::{debug, trace};
use thiserror::Error;

/// Size of the fixed container header, in bytes.
pub const HEADER_SIZE: usize = 60;

/// Size of the metadata field at the start of the header, in bytes.
pub const METADATA_SIZE: usize = 48;

/// Required value of the first marker field.
pub const MARKER_A: u16 = 0x0001;

/// Required value of the second marker field.
pub const MARKER_B: u16 = 0x0000;

const COMPRESS_TOKEN: &[u8] = b"compress";

// "compress" is followed by two bytes (seen as CR LF) of unknown purpose.
const CODEC_NAME_OFFSET: usize = 10;

const PMZLIBCODEC: &[u8] = b"pmzlibcodec";

/// Errors that can occur while decoding a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Fewer than 60 bytes were available for the header.
    #[error("Truncated header: expected 60 bytes, found {found}")]
    TruncatedHeader { found: usize },

    /// One of the sentinel header fields has an unexpected value.
    #[error("Unexpected value for {field}: expected {expected:#06x}, found {found:#06x}")]
    UnexpectedMarker {
        field: &'static str,
        expected: u16,
        found: u16,
    },

    /// The metadata field does not contain the comma-separated fields.
    #[error("Malformed header metadata: no field separator found")]
    MalformedMetadata,

    /// The payload length does not match the size recorded in the header.
    #[error("Payload size mismatch: expected {expected} bytes, found {found} bytes")]
    PayloadSizeMismatch { expected: usize, found: usize },

    /// The Adler-32 checksum of the payload does not match the header.
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The header names a codec this crate cannot decompress.
    #[error("Unsupported compression: {codec}")]
    UnsupportedCompression { codec: String },

    /// The payload passed validation but is not a valid compressed stream.
    #[error("Decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    /// An error originating from reading the input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The compression scheme named by the header's compression descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionKind {
    /// `pmzlibcodec`, a plain zlib stream.
    PmZlibCodec,
    /// Any other codec name, or `None` if the descriptor names no codec.
    Unsupported(Option<Vec<u8>>),
}

impl CompressionKind {
    /// Resolves the compression descriptor from the header metadata.
    ///
    /// Only descriptors starting with `compress` name a codec. The codec name
    /// starts ten bytes after the start of that token, and any NUL padding at
    /// the end of the metadata field is not part of the name.
    pub fn from_descriptor(descriptor: &[u8]) -> Self {
        if !descriptor.starts_with(COMPRESS_TOKEN) {
            return CompressionKind::Unsupported(None);
        }

        let name = trim_trailing_nul(descriptor.get(CODEC_NAME_OFFSET..).unwrap_or(&[]));
        if name == PMZLIBCODEC {
            CompressionKind::PmZlibCodec
        } else {
            CompressionKind::Unsupported(Some(name.to_vec()))
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionKind::PmZlibCodec => f.write_str("pmzlibcodec"),
            CompressionKind::Unsupported(Some(name)) => {
                write!(f, "{:?}", String::from_utf8_lossy(name))
            }
            CompressionKind::Unsupported(None) => f.write_str("none"),
        }
    }
}

/// The raw fields of the fixed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// The 48-byte metadata field, verbatim.
    pub raw_metadata: [u8; METADATA_SIZE],
    /// The Adler-32 checksum of the compressed payload.
    pub checksum: u32,
    /// A flag of unknown meaning, preserved as-is.
    pub unknown_flag1: u16,
    /// Always [MARKER_A].
    pub marker_a: u16,
    /// The length of the compressed payload, in bytes.
    pub compressed_size: u16,
    /// Always [MARKER_B].
    pub marker_b: u16,
}

impl ContainerHeader {
    /// Parses and validates the header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Fails with [ContainerError::TruncatedHeader] if `data` is shorter than
    /// [HEADER_SIZE], and with [ContainerError::UnexpectedMarker] if either
    /// marker field holds an unexpected value.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ContainerError> {
        if data.len() < HEADER_SIZE {
            return Err(ContainerError::TruncatedHeader { found: data.len() });
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&data[..HEADER_SIZE]);

        let mut raw_metadata = [0u8; METADATA_SIZE];
        raw_metadata.copy_from_slice(&raw[..METADATA_SIZE]);

        let header = Self {
            raw_metadata,
            checksum: u32::from_le_bytes([raw[48], raw[49], raw[50], raw[51]]),
            unknown_flag1: u16::from_le_bytes([raw[52], raw[53]]),
            marker_a: u16::from_le_bytes([raw[54], raw[55]]),
            compressed_size: u16::from_le_bytes([raw[56], raw[57]]),
            marker_b: u16::from_le_bytes([raw[58], raw[59]]),
        };

        trace!("Raw container header: {:?}", header);

        if header.marker_a != MARKER_A {
            return Err(ContainerError::UnexpectedMarker {
                field: "marker A",
                expected: MARKER_A,
                found: header.marker_a,
            });
        }
        if header.marker_b != MARKER_B {
            return Err(ContainerError::UnexpectedMarker {
                field: "marker B",
                expected: MARKER_B,
                found: header.marker_b,
            });
        }

        Ok(header)
    }

    /// Splits the metadata into file version, format version, and compression
    /// descriptor.
    ///
    /// The file version ends at the first comma and the descriptor starts
    /// after the last one. With a single comma the format version is empty.
    fn split_metadata(&self) -> Result<(&[u8], &[u8], &[u8]), ContainerError> {
        let metadata = &self.raw_metadata[..];
        let first = metadata
            .iter()
            .position(|&b| b == b',')
            .ok_or(ContainerError::MalformedMetadata)?;
        let last = metadata.iter().rposition(|&b| b == b',').unwrap_or(first);

        let format_version: &[u8] = if last > first {
            &metadata[first + 1..last]
        } else {
            &[]
        };

        Ok((&metadata[..first], format_version, &metadata[last + 1..]))
    }
}

/// A validated and decompressed container.
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    header: ContainerHeader,
    file_version: String,
    format_version: String,
    compression: CompressionKind,
    data: Vec<u8>,
}

impl DecodedContainer {
    /// Reads an entire file and decodes it. See [decode].
    pub fn from_filename<P: AsRef<Path>>(filename: P) -> Result<Self, ContainerError> {
        let file = File::open(filename)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Reads `reader` to the end and decodes the bytes. See [decode].
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ContainerError> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        decode(&buffer)
    }

    /// The validated header.
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// The file version tag, e.g. `PIAFILEVERSION_2.0`.
    pub fn file_version(&self) -> &str {
        &self.file_version
    }

    /// The format version tag, e.g. `CTBVER1`.
    pub fn format_version(&self) -> &str {
        &self.format_version
    }

    /// The codec the payload was compressed with.
    pub fn compression(&self) -> &CompressionKind {
        &self.compression
    }

    /// The decompressed settings payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the container, returning the decompressed payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Validates a complete container and decompresses its payload.
///
/// The checks run in order: header size, marker fields, metadata layout,
/// payload size, payload checksum, and finally the codec. The first failure
/// is returned and nothing is decompressed.
pub fn decode(data: &[u8]) -> Result<DecodedContainer, ContainerError> {
    let header = ContainerHeader::from_bytes(data)?;
    let (file_version, format_version, descriptor) = header.split_metadata()?;

    let file_version = String::from_utf8_lossy(file_version).to_string();
    let format_version = String::from_utf8_lossy(format_version).to_string();
    let compression = CompressionKind::from_descriptor(descriptor);

    debug!(
        "Container header: file_version={:?}, format_version={:?}, compression={}, compressed_size={}, checksum={:#010x}",
        file_version, format_version, compression, header.compressed_size, header.checksum
    );

    let payload = &data[HEADER_SIZE..];
    let expected_size = usize::from(header.compressed_size);
    if payload.len() != expected_size {
        return Err(ContainerError::PayloadSizeMismatch {
            expected: expected_size,
            found: payload.len(),
        });
    }

    let checksum_actual = adler32_slice(payload);
    trace!(
        "Payload checksum: expected={:#010x}, actual={:#010x}",
        header.checksum, checksum_actual
    );
    if checksum_actual != header.checksum {
        return Err(ContainerError::ChecksumMismatch {
            expected: header.checksum,
            actual: checksum_actual,
        });
    }

    let data = decompress(&compression, payload)?;
    debug!(
        "Decompressed {} payload bytes into {} bytes",
        payload.len(),
        data.len()
    );

    Ok(DecodedContainer {
        header,
        file_version,
        format_version,
        compression,
        data,
    })
}

fn decompress(compression: &CompressionKind, payload: &[u8]) -> Result<Vec<u8>, ContainerError> {
    match compression {
        CompressionKind::PmZlibCodec => {
            let mut decoder = ZlibDecoder::new(payload);
            let mut buffer = Vec::with_capacity(payload.len() * 4);
            decoder
                .read_to_end(&mut buffer)
                .map_err(ContainerError::Decompression)?;
            Ok(buffer)
        }
        CompressionKind::Unsupported(_) => Err(ContainerError::UnsupportedCompression {
            codec: compression.to_string(),
        }),
    }
}

fn trim_trailing_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}
