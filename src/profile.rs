//! Conversion profiles: the static route → engine-settings table.
//!
//! Every format-specific quirk lives here so the invoker stays generic.
//! Word-origin documents are forced through the Writer PDF exporter, slide
//! decks through the Impress exporter, and spreadsheets through the Calc
//! exporter with a page-layout profile that keeps each sheet on one page so
//! embedded charts are never split across PDF pages.
//!
//! The table is plain data: built once at startup (optionally with
//! per-route timeout overrides), stored in [`crate::ConverterConfig`], and
//! only ever read afterwards.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Office → PDF routes get 30 s; PDF → Office routes get 60 s.
const TO_PDF_TIMEOUT: Duration = Duration::from_secs(30);
const FROM_PDF_TIMEOUT: Duration = Duration::from_secs(60);

const WRITER_PDF_EXPORT: &str = "writer_pdf_Export";
const IMPRESS_PDF_EXPORT: &str = "impress_pdf_Export";
const WRITER_WEB_PDF_EXPORT: &str = "writer_web_pdf_Export";
const CALC_PDF_EXPORT: &str = concat!(
    "calc_pdf_Export:{",
    r#""SinglePageSheets":{"type":"boolean","value":"true"},"#,
    r#""ScaleToPagesX":{"type":"long","value":"1"},"#,
    r#""ScaleToPagesY":{"type":"long","value":"1"}"#,
    "}"
);

/// One supported (source format, target format) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKey {
    WordToPdf,
    PdfToWord,
    PptToPdf,
    PdfToPpt,
    ExcelToPdf,
    PdfToExcel,
    HtmlToPdf,
    HtmToPdf,
}

impl RouteKey {
    pub const ALL: [RouteKey; 8] = [
        RouteKey::WordToPdf,
        RouteKey::PdfToWord,
        RouteKey::PptToPdf,
        RouteKey::PdfToPpt,
        RouteKey::ExcelToPdf,
        RouteKey::PdfToExcel,
        RouteKey::HtmlToPdf,
        RouteKey::HtmToPdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKey::WordToPdf => "word-to-pdf",
            RouteKey::PdfToWord => "pdf-to-word",
            RouteKey::PptToPdf => "ppt-to-pdf",
            RouteKey::PdfToPpt => "pdf-to-ppt",
            RouteKey::ExcelToPdf => "excel-to-pdf",
            RouteKey::PdfToExcel => "pdf-to-excel",
            RouteKey::HtmlToPdf => "html-to-pdf",
            RouteKey::HtmToPdf => "htm-to-pdf",
        }
    }

    /// Comma-separated list of every route key, for error messages.
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Guess the local route from a source filename's extension.
    ///
    /// PDF inputs are ambiguous (three possible targets) and return `None`.
    pub fn infer_from_filename(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "docx" | "doc" | "odt" | "rtf" => Some(RouteKey::WordToPdf),
            "pptx" | "ppt" | "odp" => Some(RouteKey::PptToPdf),
            "xlsx" | "xls" | "ods" => Some(RouteKey::ExcelToPdf),
            "html" => Some(RouteKey::HtmlToPdf),
            "htm" => Some(RouteKey::HtmToPdf),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteKey {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == key)
            .ok_or_else(|| ConvertError::UnsupportedRoute {
                route: s.to_string(),
            })
    }
}

/// Where a route is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSite {
    /// Converted in-process by the headless engine.
    Local,
    /// Serviced by the separate remote conversion backend.
    Remote,
}

/// Immutable engine settings for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionProfile {
    pub route: RouteKey,
    /// Target extension token, e.g. `pdf`, `docx`.
    pub target_format: &'static str,
    /// Export filter (with optional JSON filter options) appended to the
    /// `--convert-to` argument after a colon.
    pub export_filter: Option<&'static str>,
    /// Hard deadline for each engine invocation on this route.
    pub timeout: Duration,
    /// Try the scripted page-setup engine before the CLI engine.
    pub fallback_eligible: bool,
    pub site: ExecutionSite,
}

impl ConversionProfile {
    /// Value for `--convert-to`, e.g. `pdf:writer_pdf_Export`.
    pub fn convert_to_arg(&self) -> String {
        match self.export_filter {
            Some(filter) => format!("{}:{}", self.target_format, filter),
            None => self.target_format.to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.site == ExecutionSite::Local
    }

    pub fn targets_pdf(&self) -> bool {
        self.target_format.eq_ignore_ascii_case("pdf")
    }
}

fn builtin_profile(route: RouteKey) -> ConversionProfile {
    use ExecutionSite::{Local, Remote};

    let (target_format, export_filter, timeout, fallback_eligible, site) = match route {
        RouteKey::WordToPdf => ("pdf", Some(WRITER_PDF_EXPORT), TO_PDF_TIMEOUT, false, Local),
        RouteKey::PptToPdf => ("pdf", Some(IMPRESS_PDF_EXPORT), TO_PDF_TIMEOUT, false, Local),
        RouteKey::ExcelToPdf => ("pdf", Some(CALC_PDF_EXPORT), TO_PDF_TIMEOUT, true, Local),
        RouteKey::HtmlToPdf | RouteKey::HtmToPdf => {
            ("pdf", Some(WRITER_WEB_PDF_EXPORT), TO_PDF_TIMEOUT, false, Local)
        }
        RouteKey::PdfToWord => ("docx", None, FROM_PDF_TIMEOUT, false, Remote),
        RouteKey::PdfToPpt => ("pptx", None, FROM_PDF_TIMEOUT, false, Remote),
        RouteKey::PdfToExcel => ("xlsx", None, FROM_PDF_TIMEOUT, false, Remote),
    };
    ConversionProfile {
        route,
        target_format,
        export_filter,
        timeout,
        fallback_eligible,
        site,
    }
}

/// Total, read-only mapping from [`RouteKey`] to [`ConversionProfile`].
///
/// Backed by an array indexed by the route discriminant, so every key has
/// exactly one profile and lookup is O(1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    profiles: [ConversionProfile; 8],
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            profiles: RouteKey::ALL.map(builtin_profile),
        }
    }
}

impl ProfileTable {
    pub fn get(&self, route: RouteKey) -> &ConversionProfile {
        &self.profiles[route.index()]
    }

    /// Parse a raw route key and return its profile.
    ///
    /// Fails with [`ConvertError::UnsupportedRoute`] for unknown keys; this
    /// is the first check of every conversion and touches no filesystem.
    pub fn lookup(&self, route_key: &str) -> Result<&ConversionProfile, ConvertError> {
        let route: RouteKey = route_key.parse()?;
        Ok(self.get(route))
    }

    /// Override the deadline of a single route.
    pub fn with_timeout(mut self, route: RouteKey, timeout: Duration) -> Self {
        self.profiles[route.index()].timeout = timeout;
        self
    }

    /// Override the deadline of every route.
    pub fn with_all_timeouts(mut self, timeout: Duration) -> Self {
        for p in self.profiles.iter_mut() {
            p.timeout = timeout;
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversionProfile> {
        self.profiles.iter()
    }
}
