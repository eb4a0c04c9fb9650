//! Fiscal summary aggregation over invoice XML files.

use crate::types::{FiscalSummary, Issuer};
use chrono::NaiveDate;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Fields read from one invoice
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvoiceFields {
    /// `ide/mod`, "55" (NF-e) or "65" (NFC-e)
    pub model: Option<String>,
    /// `ide/tpNF`, "0" entry or "1" exit
    pub operation: Option<String>,
    /// Date part of `ide/dhEmi` (or `ide/dEmi`)
    pub emitted_on: Option<NaiveDate>,
    /// `emit/CNPJ` or `emit/CPF`
    pub issuer_tax_id: Option<String>,
    /// `emit/xNome`
    pub issuer_name: Option<String>,
}

/// Why a file did not count as an invoice
#[derive(Debug, PartialEq, Eq)]
pub enum InvoiceParseError {
    /// The document root is not an invoice element
    NotAnInvoice(String),
    /// The XML could not be read
    Malformed(String),
}

impl std::fmt::Display for InvoiceParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceParseError::NotAnInvoice(root) => write!(f, "unexpected root element <{root}>"),
            InvoiceParseError::Malformed(reason) => write!(f, "malformed XML: {reason}"),
        }
    }
}

/// Decode XML bytes: BOM first, then the declared encoding, then UTF-8,
/// finally Windows-1252
pub fn decode_xml(bytes: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text;
    }

    if let Some(encoding) = declared_encoding(bytes)
        && encoding != UTF_8
    {
        let (text, _) = encoding.decode_without_bom_handling(bytes);
        return text;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text
        }
    }
}

/// Encoding named in the XML declaration, if any
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(200)];
    let head = String::from_utf8_lossy(head);
    let decl_end = head.find("?>")?;
    let decl = &head[..decl_end];
    let start = decl.find("encoding")? + "encoding".len();
    let rest = decl[start..].trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &rest[1..];
    let label = &value[..value.find(quote)?];
    Encoding::for_label(label.trim().as_bytes())
}

/// Parse one invoice document
pub fn parse_invoice(
    text: &str,
    root_elements: &[String],
) -> std::result::Result<InvoiceFields, InvoiceParseError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut fields = InvoiceFields::default();
    let mut path: Vec<String> = Vec::new();
    let mut root_checked = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if !root_checked {
                    if !root_elements.iter().any(|r| r == &name) {
                        return Err(InvoiceParseError::NotAnInvoice(name));
                    }
                    root_checked = true;
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if !root_checked {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    return Err(InvoiceParseError::NotAnInvoice(name));
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let value = t
                    .unescape()
                    .map_err(|e| InvoiceParseError::Malformed(e.to_string()))?;
                record_field(&mut fields, &path, value.trim());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(InvoiceParseError::Malformed(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if !root_checked {
        return Err(InvoiceParseError::Malformed("document has no root element".into()));
    }
    if let Some(open) = path.last() {
        return Err(InvoiceParseError::Malformed(format!("unclosed element <{open}>")));
    }
    Ok(fields)
}

fn record_field(fields: &mut InvoiceFields, path: &[String], value: &str) {
    if value.is_empty() || path.len() < 2 {
        return;
    }
    let parent = path[path.len() - 2].as_str();
    let leaf = path[path.len() - 1].as_str();

    match (parent, leaf) {
        ("ide", "mod") if fields.model.is_none() => fields.model = Some(value.to_string()),
        ("ide", "tpNF") if fields.operation.is_none() => {
            fields.operation = Some(value.to_string())
        }
        ("ide", "dhEmi" | "dEmi") if fields.emitted_on.is_none() => {
            fields.emitted_on = value
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        }
        ("emit", "CNPJ" | "CPF") if fields.issuer_tax_id.is_none() => {
            fields.issuer_tax_id = Some(value.to_string())
        }
        ("emit", "xNome") if fields.issuer_name.is_none() => {
            fields.issuer_name = Some(value.to_string())
        }
        _ => {}
    }
}

/// Accumulates invoice fields into a [`FiscalSummary`]
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    summary: FiscalSummary,
    dates: BTreeSet<NaiveDate>,
    seen_issuers: HashSet<String>,
}

impl SummaryBuilder {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a file that was not a usable invoice
    pub fn record_invalid(&mut self) {
        self.summary.total_xml_files_analyzed += 1;
        self.summary.invalid_or_ignored_files += 1;
    }

    /// Count a parsed invoice
    pub fn record_invoice(&mut self, fields: InvoiceFields) {
        let summary = &mut self.summary;
        summary.total_xml_files_analyzed += 1;
        summary.valid_invoices_found += 1;

        if let Some(model) = fields.model {
            *summary.by_model.entry(model).or_insert(0) += 1;
        }
        match fields.operation.as_deref() {
            Some("0") => summary.by_operation.entry += 1,
            Some("1") => summary.by_operation.exit += 1,
            _ => {}
        }
        if let Some(date) = fields.emitted_on {
            self.dates.insert(date);
        }
        if let Some(tax_id) = fields.issuer_tax_id
            && self.seen_issuers.insert(tax_id.clone())
        {
            summary.issuers.push(Issuer {
                tax_id,
                name: fields.issuer_name.unwrap_or_default(),
            });
        }
    }

    /// Finish with sorted, deduplicated emission dates
    pub fn build(mut self) -> FiscalSummary {
        self.summary.emission_dates = self
            .dates
            .into_iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect();
        self.summary
    }
}

/// Summarize every `.xml` file under `root`
///
/// Unreadable or non-invoice files are counted as invalid and skipped.
pub fn summarize_directory(root: &Path, root_elements: &[String]) -> FiscalSummary {
    let mut builder = SummaryBuilder::new();

    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        });

    for entry in files {
        let path = entry.path();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(?path, error = %e, "could not read XML file");
                builder.record_invalid();
                continue;
            }
        };

        match parse_invoice(&decode_xml(&bytes), root_elements) {
            Ok(fields) => builder.record_invoice(fields),
            Err(InvoiceParseError::NotAnInvoice(root)) => {
                debug!(?path, %root, "ignoring non-invoice XML");
                builder.record_invalid();
            }
            Err(e) => {
                warn!(?path, error = %e, "skipping unparseable XML");
                builder.record_invalid();
            }
        }
    }

    let summary = builder.build();
    info!(
        ?root,
        total = summary.total_xml_files_analyzed,
        valid = summary.valid_invoices_found,
        invalid = summary.invalid_or_ignored_files,
        issuers = summary.issuers.len(),
        "fiscal summary computed"
    );
    summary
}
