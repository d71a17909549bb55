// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/normalizer.rs - Settings tree normalizer for CTB settings files.
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
 * # `normalizer` Module
 *
 * This module folds the raw parse tree into a [SettingsTree], an ordered
 * mapping from keys to scalars or nested trees.
 *
 * The children of a block are either all pair-shaped ([ParseNode::Item] and
 * [ParseNode::Block]), which map directly to entries, or all bare values
 * forming a flat `[key, value, key, value, ...]` sequence, which is first
 * regrouped into consecutive pairs. Any other shape is reported as
 * [NormalizeError::UnhandledStructure].
 *
 * ## Usage Example
 *
 * ```
 * use ctbparser::normalizer::{normalize, Setting};
 * use ctbparser::parser::{parse, Value};
 *
 * let forest = parse("outer {\n inner {\n a = 1\n }\n}\n").unwrap();
 * let tree = normalize(forest).unwrap();
 * let inner = tree.get("outer").and_then(Setting::as_table).unwrap();
 * let a = inner.get("inner").and_then(Setting::as_table).unwrap().get("a");
 * assert_eq!(a.and_then(Setting::as_value), Some(&Value::Integer(1)));
 * ```
 */

use std::collections::HashMap;

use log::{debug, trace};
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::parser::{ParseNode, Value};

/// An entry of a [SettingsTree].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Setting {
    Scalar(Value),
    Table(SettingsTree),
}

impl Setting {
    /// The scalar value, if this entry is not a table.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Setting::Scalar(value) => Some(value),
            Setting::Table(_) => None,
        }
    }

    /// The nested tree, if this entry is a table.
    pub fn as_table(&self) -> Option<&SettingsTree> {
        match self {
            Setting::Scalar(_) => None,
            Setting::Table(table) => Some(table),
        }
    }
}

impl From<Value> for Setting {
    fn from(value: Value) -> Self {
        Setting::Scalar(value)
    }
}

impl From<SettingsTree> for Setting {
    fn from(table: SettingsTree) -> Self {
        Setting::Table(table)
    }
}

/// An ordered mapping of unique keys to settings.
///
/// Keys keep the position they were first inserted at. Inserting an existing
/// key replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct SettingsTree {
    entries: Vec<(String, Setting)>,
    /// Position of each key in `entries`.
    index: HashMap<String, usize>,
}

impl PartialEq for SettingsTree {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl SettingsTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, returning the value it replaced, if any.
    pub fn insert(&mut self, key: String, setting: Setting) -> Option<Setting> {
        match self.index.get(&key) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, setting)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, setting));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Setting> {
        let &position = self.index.get(key)?;
        Some(&self.entries[position].1)
    }

    /// Looks up a nested entry, one key per level.
    pub fn get_path(&self, path: &[&str]) -> Option<&Setting> {
        let (last, parents) = path.split_last()?;
        let mut table = self;
        for key in parents {
            table = table.get(key)?.as_table()?;
        }
        table.get(last)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Setting)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Setting)> for SettingsTree {
    fn from_iter<I: IntoIterator<Item = (String, Setting)>>(iter: I) -> Self {
        let mut tree = SettingsTree::new();
        for (key, setting) in iter {
            tree.insert(key, setting);
        }
        tree
    }
}

impl IntoIterator for SettingsTree {
    type Item = (String, Setting);
    type IntoIter = std::vec::IntoIter<(String, Setting)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for SettingsTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, setting) in &self.entries {
            map.serialize_entry(key, setting)?;
        }
        map.end()
    }
}

/// Errors that can occur while normalizing a parse tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    /// A node has a shape that cannot be folded into a mapping.
    #[error("Unhandled structure at {path}: {reason}")]
    UnhandledStructure { path: String, reason: String },
}

/// Folds a parse forest into a [SettingsTree].
pub fn normalize(forest: Vec<ParseNode>) -> Result<SettingsTree, NormalizeError> {
    let mut path = Vec::new();
    let tree = fold(forest, &mut path)?;
    debug!("Normalized settings tree with {} top-level keys", tree.len());
    Ok(tree)
}

fn fold(children: Vec<ParseNode>, path: &mut Vec<String>) -> Result<SettingsTree, NormalizeError> {
    let bare = children
        .iter()
        .filter(|child| matches!(child, ParseNode::Bare(_)))
        .count();

    if bare == 0 {
        collect(children, path)
    } else if bare == children.len() {
        let pairs = regroup(children, path)?;
        collect(pairs, path)
    } else {
        Err(unhandled(
            path,
            format!(
                "{} pair-shaped and {} bare children cannot be combined",
                children.len() - bare,
                bare
            ),
        ))
    }
}

fn collect(children: Vec<ParseNode>, path: &mut Vec<String>) -> Result<SettingsTree, NormalizeError> {
    let mut tree = SettingsTree::new();
    for child in children {
        match child {
            ParseNode::Item { key, value } => {
                trace!("{}: {} => {}", display_path(path), key, value);
                insert(&mut tree, key, Setting::Scalar(value), path);
            }
            ParseNode::Block { key, children } => {
                trace!("{}: descending into {}", display_path(path), key);
                path.push(key.clone());
                let table = fold(children, path)?;
                path.pop();
                insert(&mut tree, key, Setting::Table(table), path);
            }
            ParseNode::Bare(value) => {
                return Err(unhandled(path, format!("unpaired value {}", value)));
            }
        }
    }
    Ok(tree)
}

fn insert(tree: &mut SettingsTree, key: String, setting: Setting, path: &[String]) {
    if tree.get(&key).is_some() {
        debug!(
            "{}: duplicate key {:?}, keeping the last value",
            display_path(path),
            key
        );
    }
    tree.insert(key, setting);
}

/// Pairs a flat sequence up as `(0, 1), (2, 3), ...`.
fn regroup(children: Vec<ParseNode>, path: &[String]) -> Result<Vec<ParseNode>, NormalizeError> {
    if children.len() % 2 != 0 {
        return Err(unhandled(
            path,
            format!("flat sequence of {} elements cannot be paired", children.len()),
        ));
    }

    trace!(
        "{}: regrouping {} flat elements pairwise",
        display_path(path),
        children.len()
    );

    let mut pairs = Vec::with_capacity(children.len() / 2);
    let mut elements = children.into_iter();
    while let (Some(key), Some(value)) = (elements.next(), elements.next()) {
        match (key, value) {
            (ParseNode::Bare(Value::Text(key)), ParseNode::Bare(value)) => {
                pairs.push(ParseNode::Item { key, value });
            }
            (ParseNode::Bare(key @ (Value::Boolean(_) | Value::Integer(_) | Value::Float(_))), _) => {
                return Err(unhandled(path, format!("flat sequence key {} is not text", key)));
            }
            (key, _) => {
                return Err(unhandled(path, format!("unexpected flat element {:?}", key)));
            }
        }
    }
    Ok(pairs)
}

fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}

fn unhandled(path: &[String], reason: String) -> NormalizeError {
    NormalizeError::UnhandledStructure {
        path: display_path(path),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::parser::parse;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn item(key: &str, value: Value) -> ParseNode {
        ParseNode::Item {
            key: key.to_string(),
            value,
        }
    }

    fn block(key: &str, children: Vec<ParseNode>) -> ParseNode {
        ParseNode::Block {
            key: key.to_string(),
            children,
        }
    }

    fn tree(entries: Vec<(&str, Setting)>) -> SettingsTree {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn items_become_scalars() {
        let normalized = normalize(parse("key = TRUE\n").unwrap()).unwrap();
        assert_eq!(normalized, tree(vec![("key", Value::Boolean(true).into())]));

        let normalized = normalize(parse("key = 3.14 comment text\n").unwrap()).unwrap();
        assert_eq!(normalized, tree(vec![("key", Value::Float(3.14).into())]));

        let normalized = normalize(parse("key = \"hello\n").unwrap()).unwrap();
        assert_eq!(normalized, tree(vec![("key", text("hello").into())]));
    }

    #[test]
    fn nested_blocks_become_tables() {
        let normalized = normalize(parse("outer {\n inner {\n a = 1\n }\n}\n").unwrap()).unwrap();
        let expected = tree(vec![(
            "outer",
            tree(vec![("inner", tree(vec![("a", Value::Integer(1).into())]).into())]).into(),
        )]);
        assert_eq!(normalized, expected);
        assert_eq!(
            normalized.get_path(&["outer", "inner", "a"]),
            Some(&Setting::Scalar(Value::Integer(1)))
        );
    }

    #[test]
    fn empty_block_is_empty_table() {
        let normalized = normalize(vec![block("plot_style", Vec::new())]).unwrap();
        assert_eq!(
            normalized.get("plot_style"),
            Some(&Setting::Table(SettingsTree::new()))
        );
    }

    #[test]
    fn flat_sequence_matches_items() {
        let flat = vec![block(
            "b",
            vec![
                ParseNode::Bare(text("k1")),
                ParseNode::Bare(Value::Integer(1)),
                ParseNode::Bare(text("k2")),
                ParseNode::Bare(text("v2")),
            ],
        )];
        let items = vec![block(
            "b",
            vec![item("k1", Value::Integer(1)), item("k2", text("v2"))],
        )];
        assert_eq!(normalize(flat).unwrap(), normalize(items).unwrap());
    }

    #[test]
    fn odd_flat_sequence_is_unhandled() {
        let forest = vec![block(
            "b",
            vec![ParseNode::Bare(text("k1")), ParseNode::Bare(Value::Integer(1)), ParseNode::Bare(text("k2"))],
        )];
        match normalize(forest) {
            Err(NormalizeError::UnhandledStructure { path, .. }) => assert_eq!(path, "b"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn non_text_flat_key_is_unhandled() {
        let forest = vec![ParseNode::Bare(Value::Integer(1)), ParseNode::Bare(Value::Integer(2))];
        match normalize(forest) {
            Err(NormalizeError::UnhandledStructure { path, reason }) => {
                assert_eq!(path, "<root>");
                assert!(reason.contains("not text"), "{}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn mixed_shapes_are_unhandled() {
        let forest = vec![block(
            "outer",
            vec![
                block("inner", vec![item("a", Value::Integer(1))]),
                ParseNode::Bare(text("k")),
            ],
        )];
        match normalize(forest) {
            Err(NormalizeError::UnhandledStructure { path, .. }) => assert_eq!(path, "outer"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn duplicate_keys_keep_first_position_and_last_value() {
        let normalized = normalize(parse("a = 1\nb = 2\na = 3\n").unwrap()).unwrap();
        assert_eq!(normalized.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(normalized.get("a"), Some(&Setting::Scalar(Value::Integer(3))));
    }

    #[test]
    fn duplicate_block_replaces_scalar() {
        let normalized = normalize(parse("a = 1\na {\n b = 2\n}\n").unwrap()).unwrap();
        assert_eq!(normalized.len(), 1);
        assert!(normalized.get("a").and_then(Setting::as_table).is_some());
    }

    #[test]
    fn insert_reports_replaced_value() {
        let mut table = SettingsTree::new();
        assert_eq!(table.insert("a".to_string(), Value::Integer(1).into()), None);
        assert_eq!(table.insert("b".to_string(), Value::Integer(2).into()), None);
        assert_eq!(
            table.insert("a".to_string(), Value::Integer(3).into()),
            Some(Setting::Scalar(Value::Integer(1)))
        );
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(table.get("a"), Some(&Setting::Scalar(Value::Integer(3))));
        assert_eq!(table.get("missing"), None);
    }

    #[test]
    fn wide_level_keeps_every_key_in_order() {
        let text: String = (0..5000).map(|i| format!("k{}={}\n", i, i)).collect();
        let normalized = normalize(parse(&text).unwrap()).unwrap();
        assert_eq!(normalized.len(), 5000);
        assert_eq!(normalized.keys().nth(4321), Some("k4321"));
        assert_eq!(normalized.get("k4999"), Some(&Setting::Scalar(Value::Integer(4999))));
    }

    #[test]
    fn serializes_in_key_order() {
        let text = "zeta = \"last letter\nalpha {\n on = TRUE\n ratio = 0.5\n count = -3\n}\n";
        let normalized = normalize(parse(text).unwrap()).unwrap();
        assert_eq!(
            serde_json::to_string(&normalized).unwrap(),
            r#"{"zeta":"last letter","alpha":{"on":true,"ratio":0.5,"count":-3}}"#
        );
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e9f64..1.0e9).prop_map(Value::Float),
            "[ -~]{0,12}".prop_map(Value::Text),
        ]
    }

    proptest! {
        #[test]
        fn pairwise_regrouping_matches_items(
            pairs in prop::collection::vec(("[A-Za-z0-9_]{1,6}", value_strategy()), 0..16)
        ) {
            let flat: Vec<ParseNode> = pairs
                .iter()
                .flat_map(|(k, v)| [ParseNode::Bare(Value::Text(k.clone())), ParseNode::Bare(v.clone())])
                .collect();
            let items: Vec<ParseNode> = pairs
                .iter()
                .map(|(k, v)| ParseNode::Item { key: k.clone(), value: v.clone() })
                .collect();

            prop_assert_eq!(
                normalize(vec![block("b", flat)]).unwrap(),
                normalize(vec![block("b", items)]).unwrap()
            );
        }
    }
}
