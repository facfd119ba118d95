use anyhow::{Result, bail};
use serde_json::Value;
use std::cmp::Ordering;

pub const MIN_MATERIAL_JSON_VERSION: &str = "1.0.0RC";
pub const MIN_WKIT_JSON_VERSION: &str = "0.0.8RC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Dev(u64),
    Alpha(u64),
    Beta(u64),
    Rc(u64),
    Final,
}

/// Exporter version such as `1.0.0RC` or `8.9.1`: a dotted release tuple
/// with an optional pre-release tag. Trailing zero components do not count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonVersion {
    pub release: Vec<u64>,
    pub pre: PreRelease,
}

impl JsonVersion {
    pub fn parse(input: &str) -> Option<Self> {
        let raw = input.trim().to_ascii_lowercase();
        let raw = raw.strip_prefix('v').unwrap_or(&raw);

        let split = raw
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(raw.len());
        let (release_part, rest) = raw.split_at(split);
        let release_part = release_part.trim_end_matches('.');
        if release_part.is_empty() {
            return None;
        }
        let mut release = Vec::<u64>::new();
        for part in release_part.split('.') {
            release.push(part.parse().ok()?);
        }

        let rest = rest.trim_start_matches(['-', '_', '.']);
        let pre = if rest.is_empty() {
            PreRelease::Final
        } else {
            let tag_end = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            let (tag, num) = rest.split_at(tag_end);
            let num = num.trim_start_matches(['-', '_', '.']);
            let n = if num.is_empty() { 0 } else { num.parse().ok()? };
            match tag {
                "dev" => PreRelease::Dev(n),
                "a" | "alpha" => PreRelease::Alpha(n),
                "b" | "beta" => PreRelease::Beta(n),
                "rc" | "c" | "pre" | "preview" => PreRelease::Rc(n),
                _ => return None,
            }
        };

        Some(Self { release, pre })
    }

    fn trimmed_release(&self) -> &[u64] {
        let len = self
            .release
            .iter()
            .rposition(|v| *v != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.release[..len]
    }
}

impl PartialOrd for JsonVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JsonVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.trimmed_release()
            .cmp(other.trimmed_release())
            .then_with(|| self.pre.cmp(&other.pre))
    }
}

fn header_version(header: &Value, key: &str) -> Option<Option<JsonVersion>> {
    let v = header.get(key)?;
    Some(v.as_str().and_then(JsonVersion::parse))
}

fn at_least(found: Option<JsonVersion>, minimum: &str) -> bool {
    match (found, JsonVersion::parse(minimum)) {
        (Some(found), Some(min)) => found >= min,
        _ => false,
    }
}

fn above(found: Option<JsonVersion>, minimum: &str) -> bool {
    match (found, JsonVersion::parse(minimum)) {
        (Some(found), Some(min)) => found > min,
        _ => false,
    }
}

/// True when the document was written by an exporter new enough for this
/// crate. `MaterialJsonVersion` must be strictly above its minimum; failing
/// that, a legacy `WKitJsonVersion` at or above its minimum is accepted.
pub fn validate(doc: &Value) -> bool {
    let Some(header) = doc.get("Header").filter(|h| h.is_object()) else {
        return false;
    };
    if let Some(found) = header_version(header, "MaterialJsonVersion")
        && above(found, MIN_MATERIAL_JSON_VERSION)
    {
        return true;
    }
    match header_version(header, "WKitJsonVersion") {
        Some(found) => at_least(found, MIN_WKIT_JSON_VERSION),
        None => false,
    }
}

/// `validate` as a hard gate with the user-facing message.
pub fn ensure_compatible(doc: &Value, kind: &str, path: &str) -> Result<()> {
    if !validate(doc) {
        bail!(
            "Incompatible {} json file detected ({}). Regenerate it with a newer exporter (WolvenKit 8.9.1 or higher).",
            kind,
            path
        );
    }
    Ok(())
}
