// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download entry types and the persisted downloads document.
//!
//! On disk a document looks like:
//!
//! ```json
//! {
//!   "downloads": [
//!     { "type": "direct", "url": "https://x/a.iso", "dest": "../../data/files/os" },
//!     { "type": "docker", "image": "nginx", "namespace": "library" }
//!   ]
//! }
//! ```
//!
//! Keys an entry does not own are kept in [`DownloadEntry::extra`] and written
//! back in their original order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::StoreError;

/// Namespace used for docker images when none is given.
pub const DEFAULT_NAMESPACE: &str = "library";

static IMAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9/_-]+$").expect("image name regex"));

/// Returns true if `image` is a non-empty name made of `[A-Za-z0-9/_-]`.
pub fn is_valid_image_name(image: &str) -> bool {
    IMAGE_NAME.is_match(image)
}

/// Form field an entry value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Url,
    Dest,
    Pattern,
    Image,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Url => "url",
            Field::Dest => "dest",
            Field::Pattern => "pattern",
            Field::Image => "image",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `type` tag of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    Direct,
    Pattern,
    Docker,
}

impl DownloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadType::Direct => "direct",
            DownloadType::Pattern => "pattern",
            DownloadType::Docker => "docker",
        }
    }
}

impl fmt::Display for DownloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(DownloadType::Direct),
            "pattern" => Ok(DownloadType::Pattern),
            "docker" => Ok(DownloadType::Docker),
            other => Err(format!("unknown download type `{}`", other)),
        }
    }
}

/// What to download, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadKind {
    /// Fetch exactly one resource to `dest`.
    Direct { url: String, dest: String },
    /// Fetch the files under `url` whose name matches `pattern`. With
    /// `latest_only` only the last match is kept.
    Pattern {
        url: String,
        dest: String,
        pattern: String,
        latest_only: bool,
    },
    /// Pull a container image.
    Docker { image: String, namespace: String },
}

impl DownloadKind {
    pub fn direct(url: impl Into<String>, dest: impl Into<String>) -> Self {
        DownloadKind::Direct {
            url: url.into(),
            dest: dest.into(),
        }
    }

    pub fn pattern(
        url: impl Into<String>,
        dest: impl Into<String>,
        pattern: impl Into<String>,
        latest_only: bool,
    ) -> Self {
        DownloadKind::Pattern {
            url: url.into(),
            dest: dest.into(),
            pattern: pattern.into(),
            latest_only,
        }
    }

    /// A docker image in the default namespace.
    pub fn docker(image: impl Into<String>) -> Self {
        DownloadKind::Docker {
            image: image.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn download_type(&self) -> DownloadType {
        match self {
            DownloadKind::Direct { .. } => DownloadType::Direct,
            DownloadKind::Pattern { .. } => DownloadType::Pattern,
            DownloadKind::Docker { .. } => DownloadType::Docker,
        }
    }

    /// Destination in storage form, for kinds that have one.
    pub fn dest(&self) -> Option<&str> {
        match self {
            DownloadKind::Direct { dest, .. } | DownloadKind::Pattern { dest, .. } => Some(dest),
            DownloadKind::Docker { .. } => None,
        }
    }
}

/// Stable identifier of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// A fresh random id (16 hex chars).
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Deterministic id for an entry that was stored without one. `occurrence`
    /// tells apart entries whose content is identical.
    fn derived(content: &[u8], occurrence: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hasher.update(occurrence.to_le_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One scheduled download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEntry {
    pub id: EntryId,
    pub kind: DownloadKind,
    /// JSON keys this entry does not own, in document order.
    pub extra: IndexMap<String, Value>,
}

impl DownloadEntry {
    /// A new entry with a freshly generated id.
    pub fn new(kind: DownloadKind) -> Self {
        Self {
            id: EntryId::generate(),
            kind,
            extra: IndexMap::new(),
        }
    }

    pub fn download_type(&self) -> DownloadType {
        self.kind.download_type()
    }

    /// This entry's id and unknown fields with a different kind.
    pub fn with_kind(&self, kind: DownloadKind) -> Self {
        Self {
            id: self.id.clone(),
            kind,
            extra: self.extra.clone(),
        }
    }

    /// Structural equality: every field except the id.
    pub fn same_content(&self, other: &DownloadEntry) -> bool {
        self.kind == other.kind && self.extra == other.extra
    }

    /// JSON object for this entry: `id`, `type`, the kind's fields, then extras.
    fn to_fields(&self) -> IndexMap<String, Value> {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::from(self.id.as_str()));
        fields.extend(self.content_fields());
        fields
    }

    fn content_fields(&self) -> IndexMap<String, Value> {
        let mut fields = IndexMap::new();
        fields.insert("type".to_string(), Value::from(self.download_type().as_str()));
        match &self.kind {
            DownloadKind::Direct { url, dest } => {
                fields.insert("url".to_string(), Value::from(url.as_str()));
                fields.insert("dest".to_string(), Value::from(dest.as_str()));
            }
            DownloadKind::Pattern {
                url,
                dest,
                pattern,
                latest_only,
            } => {
                fields.insert("url".to_string(), Value::from(url.as_str()));
                fields.insert("dest".to_string(), Value::from(dest.as_str()));
                fields.insert("pattern".to_string(), Value::from(pattern.as_str()));
                fields.insert("latest".to_string(), Value::from(*latest_only));
            }
            DownloadKind::Docker { image, namespace } => {
                fields.insert("image".to_string(), Value::from(image.as_str()));
                fields.insert("namespace".to_string(), Value::from(namespace.as_str()));
            }
        }
        for (key, value) in &self.extra {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        fields
    }

    /// Split a JSON object into id, kind and extras.
    fn from_fields(
        mut fields: IndexMap<String, Value>,
    ) -> Result<(Option<EntryId>, DownloadKind, IndexMap<String, Value>), String> {
        let id = match fields.shift_remove("id") {
            None => None,
            Some(Value::String(id)) => Some(EntryId(id)),
            Some(_) => return Err("`id` must be a string".to_string()),
        };

        let download_type: DownloadType = match fields.shift_remove("type") {
            Some(Value::String(tag)) => tag.parse()?,
            Some(_) => return Err("`type` must be a string".to_string()),
            None => return Err("missing `type`".to_string()),
        };

        let kind = match download_type {
            DownloadType::Direct => DownloadKind::Direct {
                url: take_string(&mut fields, "url")?,
                dest: take_string(&mut fields, "dest")?,
            },
            DownloadType::Pattern => DownloadKind::Pattern {
                url: take_string(&mut fields, "url")?,
                dest: take_string(&mut fields, "dest")?,
                pattern: take_string(&mut fields, "pattern")?,
                latest_only: match fields.shift_remove("latest") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(latest)) => latest,
                    Some(_) => return Err("`latest` must be a boolean".to_string()),
                },
            },
            DownloadType::Docker => DownloadKind::Docker {
                image: take_string(&mut fields, "image")?,
                namespace: match fields.shift_remove("namespace") {
                    None | Some(Value::Null) => DEFAULT_NAMESPACE.to_string(),
                    Some(Value::String(ns)) if ns.is_empty() => DEFAULT_NAMESPACE.to_string(),
                    Some(Value::String(ns)) => ns,
                    Some(_) => return Err("`namespace` must be a string".to_string()),
                },
            },
        };

        Ok((id, kind, fields))
    }
}

fn take_string(fields: &mut IndexMap<String, Value>, key: &str) -> Result<String, String> {
    match fields.shift_remove(key) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(format!("`{}` must be a string", key)),
        None => Err(format!("missing `{}`", key)),
    }
}

impl Serialize for DownloadEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_fields().serialize(serializer)
    }
}

/// The whole persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDocument")]
pub struct DownloadsDocument {
    pub downloads: Vec<DownloadEntry>,
    /// Top-level keys other than `downloads`.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Deserialize)]
struct RawDocument {
    downloads: Vec<IndexMap<String, Value>>,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

/// A document entry that could not be understood.
#[derive(Debug)]
pub struct EntryParseError {
    index: usize,
    reason: String,
}

impl fmt::Display for EntryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download #{}: {}", self.index, self.reason)
    }
}

impl TryFrom<RawDocument> for DownloadsDocument {
    type Error = EntryParseError;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let mut parsed = Vec::with_capacity(raw.downloads.len());
        for (index, fields) in raw.downloads.into_iter().enumerate() {
            let (id, kind, extra) = DownloadEntry::from_fields(fields)
                .map_err(|reason| EntryParseError { index, reason })?;
            parsed.push((id, kind, extra));
        }

        // Stored ids are claimed first, so a persisted id always stays with
        // its entry. The first entry holding a repeated id keeps it.
        let mut claimed = HashSet::new();
        let keeps: Vec<bool> = parsed
            .iter()
            .map(|(id, _, _)| match id {
                Some(id) => claimed.insert(id.clone()),
                None => false,
            })
            .collect();

        // Entries without an id (or repeating one) get an id from their
        // content so that it stays the same across reads. It skips every id
        // already taken.
        let mut occurrences: HashMap<Vec<u8>, u32> = HashMap::new();
        let mut downloads = Vec::with_capacity(parsed.len());
        for (index, ((id, kind, extra), keep)) in parsed.into_iter().zip(keeps).enumerate() {
            let mut entry = DownloadEntry {
                id: EntryId(String::new()),
                kind,
                extra,
            };
            entry.id = match id {
                Some(id) if keep => id,
                _ => {
                    let content = serde_json::to_vec(&entry.content_fields()).map_err(|e| {
                        EntryParseError {
                            index,
                            reason: e.to_string(),
                        }
                    })?;
                    let occurrence = occurrences.entry(content.clone()).or_insert(0);
                    let mut id = EntryId::derived(&content, *occurrence);
                    while claimed.contains(&id) {
                        *occurrence += 1;
                        id = EntryId::derived(&content, *occurrence);
                    }
                    *occurrence += 1;
                    claimed.insert(id.clone());
                    id
                }
            };
            downloads.push(entry);
        }

        Ok(Self {
            downloads,
            extra: raw.extra,
        })
    }
}

impl DownloadsDocument {
    pub fn new(downloads: Vec<DownloadEntry>) -> Self {
        Self {
            downloads,
            extra: IndexMap::new(),
        }
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    /// Entries of one type, in document order.
    pub fn of_type(&self, download_type: DownloadType) -> Vec<&DownloadEntry> {
        self.downloads
            .iter()
            .filter(|entry| entry.download_type() == download_type)
            .collect()
    }

    /// Position of the first entry with the same content as `entry`.
    ///
    /// This is how a filtered view finds the real index of a row. Two entries
    /// with identical content resolve to the first one; prefer [`Self::index_of`].
    pub fn position_of(&self, entry: &DownloadEntry) -> Option<usize> {
        self.downloads.iter().position(|e| e.same_content(entry))
    }

    /// Position of the entry with the given id.
    pub fn index_of(&self, id: &EntryId) -> Option<usize> {
        self.downloads.iter().position(|e| &e.id == id)
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.downloads.len() {
            Ok(())
        } else {
            Err(StoreError::IndexOutOfRange {
                index,
                len: self.downloads.len(),
            })
        }
    }

    /// Resolve an id to its position.
    pub fn require_id(&self, id: &EntryId) -> Result<usize, StoreError> {
        self.index_of(id)
            .ok_or_else(|| StoreError::UnknownEntry(id.clone()))
    }

    /// Append an entry. A colliding id is replaced with a fresh one.
    pub fn push(&mut self, mut entry: DownloadEntry) -> &DownloadEntry {
        while self.index_of(&entry.id).is_some() {
            entry.id = EntryId::generate();
        }
        self.downloads.push(entry);
        &self.downloads[self.downloads.len() - 1]
    }

    /// Replace the entry at `index`; the slot keeps its id.
    pub fn replace(&mut self, index: usize, mut entry: DownloadEntry) -> Result<&DownloadEntry, StoreError> {
        self.check_index(index)?;
        entry.id = self.downloads[index].id.clone();
        self.downloads[index] = entry;
        Ok(&self.downloads[index])
    }

    /// Remove the entry at `index`, shifting later entries down by one.
    pub fn remove(&mut self, index: usize) -> Result<DownloadEntry, StoreError> {
        self.check_index(index)?;
        Ok(self.downloads.remove(index))
    }

    /// Remove the entry at `from` and reinsert it at `to`, where `to` counts
    /// positions in the shortened sequence.
    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        self.check_index(from)?;
        self.check_index(to)?;
        let entry = self.downloads.remove(from);
        self.downloads.insert(to, entry);
        Ok(())
    }
}
