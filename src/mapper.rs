//! Schema mapping from raw source metadata to the Data.Vic target schema.
//!
//! [`map`] is a pure function: the same raw blob, profile, and injected
//! timestamp always produce either the same [`MappedRecord`] or the same
//! validation failure. Field extraction is driven by JSON pointers declared
//! in the [`MappingProfile`], so a new source shape is a profile edit, not a
//! code change.
//!
//! # Profile format
//!
//! ```toml
//! name = "datavic-dcat"
//! guid = "/identifier"
//! keywords = "/keyword"
//! withdrawal = "/withdrawn"
//!
//! [fields.title]
//! source = "/title"
//! required = true
//! max_len = 200
//! on_overflow = "truncate"
//!
//! [fields.notes]
//! source = "/description"
//! required = true
//!
//! [category]
//! source = "/theme/0"
//! # default = "general"
//! [category.map]
//! "Environment" = "environment"
//!
//! [dates.date_created_data_asset]
//! source = "/issued"
//!
//! [resources]
//! source = "/distribution"
//! name = "/title"
//! url = ["/downloadURL", "/accessURL"]
//! format = "/format"
//!
//! [defaults]
//! update_frequency = "unknown"
//! personal_information = "no"
//! ```
//!
//! Keys under `[fields.*]` other than the fixed target fields (`title`,
//! `notes`, `full_metadata_url`, `license_id`) land in the record's extras.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FieldIssue, HarvestError};
use crate::models::{MappedRecord, MappedResource};

/// Substituted when the source carries the portal's default filler text.
const MISSING_DESCRIPTION: &str = "No description has been entered for this dataset.";
const MISSING_EXTRACT: &str = "No abstract has been entered for this dataset.";

/// What to do when a text field exceeds its declared bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    #[default]
    Truncate,
    Reject,
}

/// Extraction rule for one text field.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    /// JSON pointer into the raw blob.
    pub source: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_len: Option<usize>,
    #[serde(default)]
    pub on_overflow: OverflowPolicy,
}

/// Controlled-vocabulary translation for the category field.
#[derive(Debug, Clone, Deserialize)]
pub struct VocabRule {
    pub source: String,
    /// Source code → target tag.
    #[serde(default)]
    pub map: BTreeMap<String, String>,
    /// Fallback for unmapped codes. Without one, an unmapped code is a
    /// validation failure, not a silent drop.
    #[serde(default)]
    pub default: Option<String>,
}

/// Date field coerced to canonical `YYYY-MM-DD`.
#[derive(Debug, Clone, Deserialize)]
pub struct DateRule {
    pub source: String,
    #[serde(default)]
    pub required: bool,
}

/// Extraction rules for the resource (distribution) list.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRule {
    /// Pointer to the array of distributions.
    pub source: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Pointers tried in order for the resource URL.
    pub url: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Declarative mapping profile selected per harvest source.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingProfile {
    pub name: String,
    /// Pointer to the source's own identifier, checked against the GUID
    /// the listing reported.
    #[serde(default = "default_guid_pointer")]
    pub guid: String,
    /// Pointer to the keyword array feeding the tag list.
    #[serde(default)]
    pub keywords: Option<String>,
    /// Pointer to an explicit withdrawal flag.
    #[serde(default)]
    pub withdrawal: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,
    #[serde(default)]
    pub category: Option<VocabRule>,
    #[serde(default)]
    pub dates: BTreeMap<String, DateRule>,
    #[serde(default)]
    pub resources: Option<ResourceRule>,
    /// Extras applied when the source does not supply a value.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

fn default_guid_pointer() -> String {
    "/identifier".to_string()
}

impl MappingProfile {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let profile: MappingProfile = toml::from_str(content)?;
        if profile.name.trim().is_empty() {
            anyhow::bail!("mapping profile name must not be empty");
        }
        Ok(profile)
    }
}

/// Map a raw metadata blob onto the target schema.
///
/// `now` stamps the record's `mapped_at`; it is injected so the function
/// stays deterministic. All field-level problems are collected before
/// failing, so one pass reports everything wrong with a record.
pub fn map(
    guid: &str,
    raw: &str,
    profile: &MappingProfile,
    now: DateTime<Utc>,
) -> Result<MappedRecord, HarvestError> {
    let root: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            return Err(HarvestError::Validation(vec![FieldIssue {
                field: "payload".to_string(),
                value: None,
                reason: format!("not valid JSON: {}", e),
            }]));
        }
    };

    let mut issues: Vec<FieldIssue> = Vec::new();

    // GUID cross-check against the listing.
    if let Some(source_guid) = pointer_str(&root, &profile.guid) {
        if source_guid != guid {
            issues.push(FieldIssue {
                field: "guid".to_string(),
                value: Some(source_guid.to_string()),
                reason: format!("identifier does not match listed guid {}", guid),
            });
        }
    }

    let mut fixed: BTreeMap<&str, Option<String>> = BTreeMap::new();
    let mut extras: BTreeMap<String, String> = BTreeMap::new();

    for (target, rule) in &profile.fields {
        let value = extract_text(&root, target, rule, &mut issues);
        match target.as_str() {
            "title" | "notes" | "full_metadata_url" | "license_id" => {
                fixed.insert(target.as_str(), value);
            }
            _ => {
                if let Some(v) = value {
                    extras.insert(target.clone(), v);
                }
            }
        }
    }

    let title = fixed.remove("title").flatten().unwrap_or_default();
    if title.is_empty() && !profile.fields.contains_key("title") {
        issues.push(FieldIssue {
            field: "title".to_string(),
            value: None,
            reason: "profile declares no title rule".to_string(),
        });
    }

    // Description and extract. Source filler text is replaced with the
    // catalog's standard placeholders.
    let raw_notes = fixed.remove("notes").flatten().unwrap_or_default();
    let (notes, extract) = if raw_notes.contains("default.description") || raw_notes.is_empty() {
        (MISSING_DESCRIPTION.to_string(), MISSING_EXTRACT.to_string())
    } else {
        let text = strip_markup(&raw_notes);
        (raw_notes, first_sentence(&text))
    };

    let category = profile
        .category
        .as_ref()
        .and_then(|rule| translate_category(&root, rule, &mut issues));

    let tags = profile
        .keywords
        .as_ref()
        .map(|pointer| extract_tags(&root, pointer))
        .unwrap_or_default();

    for (target, rule) in &profile.dates {
        if let Some(iso) = extract_date(&root, target, rule, &mut issues) {
            extras.insert(target.clone(), iso);
        }
    }

    // Profile defaults fill holes, never overwrite source-supplied values.
    for (key, value) in &profile.defaults {
        extras.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let date_created = extras.remove("date_created_data_asset");
    let date_modified = extras.remove("date_modified_data_asset");

    let resources = profile
        .resources
        .as_ref()
        .map(|rule| extract_resources(&root, rule))
        .unwrap_or_default();

    let withdrawn = profile
        .withdrawal
        .as_ref()
        .map(|pointer| is_truthy(root.pointer(pointer)))
        .unwrap_or(false);

    if !issues.is_empty() {
        return Err(HarvestError::Validation(issues));
    }

    Ok(MappedRecord {
        guid: guid.to_string(),
        title,
        notes,
        extract,
        category,
        tags,
        full_metadata_url: fixed.remove("full_metadata_url").flatten(),
        license_id: fixed.remove("license_id").flatten(),
        date_created_data_asset: date_created,
        date_modified_data_asset: date_modified,
        resources,
        extras,
        withdrawn,
        mapped_at: now,
    })
}

fn pointer_str<'a>(root: &'a Value, pointer: &str) -> Option<&'a str> {
    root.pointer(pointer).and_then(Value::as_str)
}

fn extract_text(
    root: &Value,
    target: &str,
    rule: &FieldRule,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    let value = match root.pointer(&rule.source) {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(_) | None => None,
    };

    let Some(text) = value else {
        if rule.required {
            issues.push(FieldIssue {
                field: target.to_string(),
                value: None,
                reason: format!("required field missing at {}", rule.source),
            });
        }
        return None;
    };

    if let Some(max) = rule.max_len {
        if text.chars().count() > max {
            match rule.on_overflow {
                OverflowPolicy::Truncate => {
                    return Some(text.chars().take(max).collect());
                }
                OverflowPolicy::Reject => {
                    issues.push(FieldIssue {
                        field: target.to_string(),
                        value: Some(text),
                        reason: format!("exceeds maximum length {}", max),
                    });
                    return None;
                }
            }
        }
    }

    Some(text)
}

fn translate_category(
    root: &Value,
    rule: &VocabRule,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    let code = pointer_str(root, &rule.source)?;
    if let Some(mapped) = rule.map.get(code) {
        return Some(mapped.clone());
    }
    match &rule.default {
        Some(default) => Some(default.clone()),
        None => {
            issues.push(FieldIssue {
                field: "category".to_string(),
                value: Some(code.to_string()),
                reason: "no vocabulary entry and no default".to_string(),
            });
            None
        }
    }
}

fn extract_tags(root: &Value, pointer: &str) -> Vec<String> {
    let Some(Value::Array(items)) = root.pointer(pointer) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(fix_tag)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Repair tags the target catalog rejects: ampersands become "and".
fn fix_tag(tag: &str) -> String {
    tag.trim().replace('&', "and")
}

fn extract_date(
    root: &Value,
    target: &str,
    rule: &DateRule,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    let Some(raw) = pointer_str(root, &rule.source) else {
        if rule.required {
            issues.push(FieldIssue {
                field: target.to_string(),
                value: None,
                reason: format!("required date missing at {}", rule.source),
            });
        }
        return None;
    };

    match to_iso_date(raw) {
        Some(iso) => Some(iso),
        None => {
            issues.push(FieldIssue {
                field: target.to_string(),
                value: Some(raw.to_string()),
                reason: "unrecognized date format".to_string(),
            });
            None
        }
    }
}

/// Coerce the date formats seen in the wild to canonical `YYYY-MM-DD`.
fn to_iso_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

fn extract_resources(root: &Value, rule: &ResourceRule) -> Vec<MappedResource> {
    let Some(Value::Array(items)) = root.pointer(&rule.source) else {
        return Vec::new();
    };

    let mut resources = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let url = rule
            .url
            .iter()
            .find_map(|pointer| pointer_str(item, pointer));
        let Some(url) = url else {
            // A distribution without any usable URL is not importable.
            continue;
        };

        let name = rule
            .name
            .as_ref()
            .and_then(|pointer| pointer_str(item, pointer))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Resource {}", index + 1));

        let format = rule
            .format
            .as_ref()
            .and_then(|pointer| pointer_str(item, pointer))
            .map(str::to_string);

        resources.push(MappedResource {
            name,
            url: url.to_string(),
            format,
        });
    }
    resources
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

/// Remove markup tags, keeping text content only.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// The extract is the first sentence of the plain-text description.
fn first_sentence(text: &str) -> String {
    let text = text.trim();
    match text.find('.') {
        Some(index) => text[..=index].to_string(),
        None => text.to_string(),
    }
}
