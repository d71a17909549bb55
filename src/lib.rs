// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/lib.rs - Decoder and parser library for CTB settings files.
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
 * # `ctbparser` Crate
 *
 * A library for decoding CTB settings containers and parsing the settings
 * text stored inside them.
 *
 * This crate provides a full pipeline for working with CTB files:
 *
 * 1. [decoder]: Validates the container header and decompresses the payload.
 * 2. [parser]: Parses the settings text into a raw tree of items and blocks.
 * 3. [normalizer]: Folds the raw tree into an ordered [SettingsTree].
 *
 * ## Usage Example
 *
 * ```no_run
 * use ctbparser::normalizer::Setting;
 *
 * fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let data = std::fs::read("acad.ctb")?;
 *
 *     // Decode the container
 *     let decoded = ctbparser::decode_container(&data)?;
 *
 *     // Parse and normalize the settings
 *     let settings = ctbparser::parse_settings(decoded.data())?;
 *
 *     for (key, setting) in settings.iter() {
 *         match setting {
 *             Setting::Scalar(value) => println!("{} = {}", key, value),
 *             Setting::Table(table) => println!("{} {{ {} entries }}", key, table.len()),
 *         }
 *     }
 *
 *     // Or serialize the whole tree
 *     println!("{}", serde_json::to_string_pretty(&settings)?);
 *
 *     Ok(())
 * }
 * ```
 */

pub mod decoder;
pub mod error;
pub mod normalizer;
pub mod parser;

pub use decoder::{CompressionKind, ContainerError, ContainerHeader, DecodedContainer};
pub use error::{Error, Result, SettingsError};
pub use normalizer::{NormalizeError, Setting, SettingsTree};
pub use parser::{GrammarError, ParseNode, Value};

/// Validates a container and decompresses its settings payload.
pub fn decode_container(data: &[u8]) -> std::result::Result<DecodedContainer, ContainerError> {
    decoder::decode(data)
}

/// Parses a decompressed settings payload into a [SettingsTree].
pub fn parse_settings(data: &[u8]) -> std::result::Result<SettingsTree, SettingsError> {
    let forest = parser::parse_bytes(data)?;
    Ok(normalizer::normalize(forest)?)
}
