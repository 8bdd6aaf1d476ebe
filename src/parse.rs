//! Reference [`Parser`]: text, Markdown, PDF and Office Open XML uploads.
//!
//! Format is chosen by file extension. Slides and worksheets become one
//! document each, tagged with a `page` number and a `chunk_type`, so the
//! extraction archive keeps their position. Paragraph ends in Word and
//! PowerPoint XML become blank lines, which the chunker splits on.
//!
//! ZIP entries are read with a decompressed-size cap and worksheets are
//! bounded in count and cells.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use serde_json::json;

use doc_intake_core::gateway::Parser;
use doc_intake_core::models::Document;
use doc_intake_core::{IngestError, Result};

const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl Format {
    fn from_file_name(file_name: &str) -> Option<Self> {
        let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" | "csv" | "json" => Some(Format::Text),
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "pptx" => Some(Format::Pptx),
            "xlsx" => Some(Format::Xlsx),
            _ => None,
        }
    }
}

/// One section of extracted text with its position in the source file.
struct Section {
    page: Option<usize>,
    kind: &'static str,
    text: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileParser;

impl FileParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for FileParser {
    fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        let format = Format::from_file_name(file_name)
            .ok_or_else(|| IngestError::parse(file_name, "unsupported file type"))?;

        let sections = match format {
            Format::Text => Ok(vec![Section {
                page: None,
                kind: "text",
                text: String::from_utf8_lossy(bytes).into_owned(),
            }]),
            Format::Pdf => pdf_extract::extract_text_from_mem(bytes)
                .map(|text| {
                    vec![Section {
                        page: None,
                        kind: "text",
                        text,
                    }]
                })
                .map_err(|e| format!("PDF: {}", e)),
            Format::Docx => docx_sections(bytes),
            Format::Pptx => pptx_sections(bytes),
            Format::Xlsx => xlsx_sections(bytes),
        }
        .map_err(|reason| IngestError::parse(file_name, reason))?;

        let docs: Vec<Document> = sections
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| {
                let mut doc = Document::new(file_name, s.text);
                if let Some(page) = s.page {
                    doc.metadata.extra.insert("page".into(), json!(page));
                }
                doc.metadata.extra.insert("chunk_type".into(), json!(s.kind));
                doc
            })
            .collect();

        if docs.is_empty() {
            return Err(IngestError::parse(file_name, "no extractable text"));
        }
        Ok(docs)
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;
type SectionResult = std::result::Result<Vec<Section>, String>;

fn open_archive(bytes: &[u8]) -> std::result::Result<Archive<'_>, String> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not an OOXML archive: {}", e))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let entry = archive
        .by_name(name)
        .map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| format!("{}: {}", name, e))?;
    if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
        return Err(format!(
            "{} exceeds {} decompressed bytes",
            name, MAX_ZIP_ENTRY_BYTES
        ));
    }
    Ok(out)
}

/// Entries under `prefix` named `<prefix><n>.xml`, in numeric order.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    names.sort();
    names.into_iter().map(|(_, n)| n).collect()
}

/// Text of every `<*:t>` run, with a blank line after each `<*:p>`.
fn paragraph_text(xml: &[u8]) -> std::result::Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run = true,
            Ok(Event::Text(t)) if in_run => {
                out.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" => {
                    let trimmed = out.trim_end().len();
                    out.truncate(trimmed);
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn docx_sections(bytes: &[u8]) -> SectionResult {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    Ok(vec![Section {
        page: None,
        kind: "text",
        text: paragraph_text(&xml)?,
    }])
}

fn pptx_sections(bytes: &[u8]) -> SectionResult {
    let mut archive = open_archive(bytes)?;
    let mut sections = Vec::new();
    for (i, name) in numbered_entries(&archive, "ppt/slides/slide").into_iter().enumerate() {
        let xml = read_entry(&mut archive, &name)?;
        sections.push(Section {
            page: Some(i + 1),
            kind: "slide",
            text: paragraph_text(&xml)?,
        });
    }
    Ok(sections)
}

fn xlsx_sections(bytes: &[u8]) -> SectionResult {
    let mut archive = open_archive(bytes)?;
    let shared = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        shared_strings(&read_entry(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sections = Vec::new();
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    for (i, name) in sheets.into_iter().take(MAX_SHEETS).enumerate() {
        let xml = read_entry(&mut archive, &name)?;
        sections.push(Section {
            page: Some(i + 1),
            kind: "table",
            text: sheet_cells(&xml, &shared)?,
        });
    }
    Ok(sections)
}

fn shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("sharedStrings XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet, one row per line, cells tab separated.
fn sheet_cells(xml: &[u8], shared: &[String]) -> std::result::Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    let mut cells = 0usize;
    while cells < MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t.unescape().map_err(|e| e.to_string())?;
                let raw = raw.trim();
                let value = if shared_cell {
                    raw.parse::<usize>().ok().and_then(|i| shared.get(i).cloned())
                } else {
                    Some(raw.to_string())
                };
                if let (Some(v), Some(row)) = (value, rows.last_mut()) {
                    if !v.is_empty() {
                        row.push(v);
                        cells += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => shared_cell = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("worksheet XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows
        .into_iter()
        .filter(|r| !r.is_empty())
        .map(|r| r.join("\t"))
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn plain_text_is_one_document() {
        let docs = FileParser.parse("notes.md", b"# Plan\n\nDeductible: $500").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name(), "notes.md");
        assert!(docs[0].id.is_empty());
        assert!(docs[0].text.contains("Deductible"));
    }

    #[test]
    fn unsupported_and_blank_inputs_fail() {
        let err = FileParser.parse("image.png", b"\x89PNG").unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }));
        assert!(FileParser.parse("empty.txt", b"  \n").is_err());
        assert!(FileParser.parse("broken.pdf", b"not a pdf").is_err());
        assert!(FileParser.parse("broken.docx", b"not a zip").is_err());
    }

    #[test]
    fn docx_paragraphs_become_blank_lines() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Plan name: Gold</w:t></w:r></w:p>
            <w:p><w:r><w:t>Copay </w:t></w:r><w:r><w:t>$20</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let docs = FileParser.parse("plan.docx", &bytes).unwrap();
        assert_eq!(docs[0].text, "Plan name: Gold\n\nCopay $20");
    }

    #[test]
    fn slides_are_numbered_in_order() {
        let slide = |t: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, t);
        let (ten, two) = (slide("ten"), slide("two"));
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", ten.as_str()),
            ("ppt/slides/slide2.xml", two.as_str()),
        ]);
        let docs = FileParser.parse("deck.pptx", &bytes).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "two");
        assert_eq!(docs[0].metadata.extra["page"], json!(1));
        assert_eq!(docs[1].text, "ten");
        assert_eq!(docs[1].metadata.extra["chunk_type"], json!("slide"));
    }

    #[test]
    fn worksheet_rows_resolve_shared_strings() {
        let shared = r#"<sst><si><t>Deductible</t></si><si><t>Copay</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row><c t="s"><v>0</v></c><c><v>500</v></c></row>
            <row><c t="s"><v>1</v></c><c><v>20</v></c></row>
            </sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let docs = FileParser.parse("rates.xlsx", &bytes).unwrap();
        assert_eq!(docs[0].text, "Deductible\t500\nCopay\t20");
        assert_eq!(docs[0].metadata.extra["chunk_type"], json!("table"));
    }
}
