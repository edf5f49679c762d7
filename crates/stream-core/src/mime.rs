//! Minimal MIME type parsing for the `contentType` header.

use thiserror::Error;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// Errors produced when parsing a content type value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MimeError {
    /// Blank value.
    #[error("empty content type")]
    Empty,
    /// No `/` between type and subtype.
    #[error("content type '{0}' is missing a '/' separator")]
    MissingSubtype(String),
    /// `/` present but one side is blank.
    #[error("content type '{0}' has an empty type or subtype")]
    EmptyPart(String),
}

/// Parsed `type/subtype; key=value` content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    type_: String,
    subtype: String,
    params: Vec<(String, String)>,
}

impl MimeType {
    /// Parse a content type. Type, subtype and parameter names are lowercased;
    /// parameter values keep their case with surrounding quotes removed.
    pub fn parse(raw: &str) -> Result<Self, MimeError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MimeError::Empty);
        }
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (t, s) = essence
            .split_once('/')
            .ok_or_else(|| MimeError::MissingSubtype(raw.to_string()))?;
        let (t, s) = (t.trim(), s.trim());
        if t.is_empty() || s.is_empty() {
            return Err(MimeError::EmptyPart(raw.to_string()));
        }
        let params = parts
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                let k = k.trim().to_ascii_lowercase();
                if k.is_empty() {
                    return None;
                }
                Some((k, v.trim().trim_matches('"').to_string()))
            })
            .collect();
        Ok(Self { type_: t.to_ascii_lowercase(), subtype: s.to_ascii_lowercase(), params })
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    /// Parameter value by case-insensitive name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    /// `application/json` or any `+json` structured suffix.
    pub fn is_json(&self) -> bool {
        self.subtype == "json" || self.subtype.ends_with("+json")
    }

    /// Payloads of this type are character data.
    pub fn is_textual(&self) -> bool {
        self.type_ == "text" || self.is_json() || self.subtype.ends_with("+xml")
    }
}

impl std::str::FromStr for MimeType {
    type Err = MimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
