//! Document serialization backends.
//!
//! A backend turns an assembled [`ReportDocument`] into bytes. Which backend is used is a
//! configuration choice; an unknown name means the export cannot run at all.

use super::{Artifact, ReportDocument, ReportSection};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    /// The backend is missing or misconfigured.
    #[error("document serializer unavailable: {0}")]
    Unavailable(String),
    #[error("failed to render document: {0}")]
    Render(String),
}

impl From<std::fmt::Error> for SerializeError {
    fn from(e: std::fmt::Error) -> Self {
        SerializeError::Render(e.to_string())
    }
}

pub trait DocumentSerializer: Send + Sync {
    /// Configuration name of the backend.
    fn format(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn serialize(&self, document: &ReportDocument) -> Result<Vec<u8>, SerializeError>;
}

/// Looks up a backend by its configuration name.
pub fn serializer_for(format: &str) -> Result<Box<dyn DocumentSerializer>, SerializeError> {
    match format.trim().to_ascii_lowercase().as_str() {
        "html" => Ok(Box::new(HtmlSerializer)),
        "markdown" | "md" => Ok(Box::new(MarkdownSerializer)),
        other => Err(SerializeError::Unavailable(format!(
            "no report backend named '{}' (expected html or markdown)",
            other
        ))),
    }
}

/// Self-contained HTML with diagrams inlined as base64 data URIs.
pub struct HtmlSerializer;

impl DocumentSerializer for HtmlSerializer {
    fn format(&self) -> &'static str {
        "html"
    }

    fn file_extension(&self) -> &'static str {
        "html"
    }

    fn serialize(&self, document: &ReportDocument) -> Result<Vec<u8>, SerializeError> {
        let mut out = String::new();
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html>\n<head>\n<meta charset=\"utf-8\">")?;
        writeln!(out, "<title>{}</title>\n</head>\n<body>", escape_html(&document.title))?;
        writeln!(out, "<h1>{}</h1>", escape_html(&document.title))?;
        writeln!(
            out,
            "<p class=\"meta\">Session {} &middot; generated {}</p>",
            escape_html(&document.session_id),
            document.generated_at.format("%Y-%m-%d %H:%M UTC")
        )?;

        if !document.recommendations.is_empty() {
            writeln!(out, "<h2>Key Recommendations</h2>\n<ul>")?;
            for item in &document.recommendations {
                writeln!(out, "<li>{}</li>", escape_html(item))?;
            }
            writeln!(out, "</ul>")?;
        }

        writeln!(out, "<h2>Contents</h2>\n<ol>")?;
        for section in &document.sections {
            writeln!(
                out,
                "<li><a href=\"#{}\">{}</a></li>",
                section.anchor(),
                escape_html(&section.title)
            )?;
        }
        writeln!(out, "</ol>")?;

        for section in &document.sections {
            writeln!(
                out,
                "<h2 id=\"{}\">{}</h2>",
                section.anchor(),
                escape_html(&section.title)
            )?;
            write_html_body(&mut out, section)?;
            if section.is_artifact_section() {
                write_html_artifacts(&mut out, &document.artifacts)?;
            }
        }

        writeln!(out, "</body>\n</html>")?;
        Ok(out.into_bytes())
    }
}

fn write_html_body(out: &mut String, section: &ReportSection) -> std::fmt::Result {
    if let Some(note) = &section.note {
        writeln!(out, "<p class=\"warning\"><em>{}</em></p>", escape_html(note))?;
    }
    for paragraph in paragraphs(&section.body) {
        writeln!(
            out,
            "<p>{}</p>",
            escape_html(paragraph).replace('\n', "<br>\n")
        )?;
    }
    Ok(())
}

fn write_html_artifacts(out: &mut String, artifacts: &[Artifact]) -> std::fmt::Result {
    if artifacts.is_empty() {
        return writeln!(out, "<p><em>No diagrams generated.</em></p>");
    }
    for artifact in artifacts {
        match artifact {
            Artifact::Embedded(diagram) => match std::fs::read(&diagram.path) {
                Ok(bytes) => writeln!(
                    out,
                    "<figure><img src=\"data:{};base64,{}\" alt=\"{}\" style=\"width:{:.2}in;height:{:.2}in\"><figcaption>{}</figcaption></figure>",
                    mime_type(&diagram.path),
                    STANDARD.encode(bytes),
                    escape_html(&diagram.name),
                    diagram.display.width,
                    diagram.display.height,
                    escape_html(&diagram.name)
                )?,
                Err(e) => writeln!(
                    out,
                    "<p class=\"placeholder\"><em>Diagram {} could not be embedded: {}</em></p>",
                    escape_html(&diagram.name),
                    escape_html(&e.to_string())
                )?,
            },
            Artifact::Placeholder(placeholder) => writeln!(
                out,
                "<p class=\"placeholder\"><em>Diagram {} could not be embedded: {}</em></p>",
                escape_html(&placeholder.name),
                escape_html(&placeholder.reason)
            )?,
        }
    }
    Ok(())
}

/// Markdown that references diagram files by path, sized with pandoc attributes.
pub struct MarkdownSerializer;

impl DocumentSerializer for MarkdownSerializer {
    fn format(&self) -> &'static str {
        "markdown"
    }

    fn file_extension(&self) -> &'static str {
        "md"
    }

    fn serialize(&self, document: &ReportDocument) -> Result<Vec<u8>, SerializeError> {
        let mut out = String::new();
        writeln!(out, "# {}\n", document.title)?;
        writeln!(
            out,
            "_Session {} - generated {}_\n",
            document.session_id,
            document.generated_at.format("%Y-%m-%d %H:%M UTC")
        )?;

        if !document.recommendations.is_empty() {
            writeln!(out, "## Key Recommendations\n")?;
            for item in &document.recommendations {
                writeln!(out, "- {}", item)?;
            }
            writeln!(out)?;
        }

        writeln!(out, "## Contents\n")?;
        for (i, section) in document.sections.iter().enumerate() {
            writeln!(out, "{}. [{}](#{})", i + 1, section.title, section.anchor())?;
        }
        writeln!(out)?;

        for section in &document.sections {
            writeln!(out, "## {}\n", section.title)?;
            if let Some(note) = &section.note {
                writeln!(out, "> {}\n", note)?;
            }
            for paragraph in paragraphs(&section.body) {
                writeln!(out, "{}\n", paragraph)?;
            }
            if section.is_artifact_section() {
                write_markdown_artifacts(&mut out, &document.artifacts)?;
            }
        }
        Ok(out.into_bytes())
    }
}

fn write_markdown_artifacts(out: &mut String, artifacts: &[Artifact]) -> std::fmt::Result {
    if artifacts.is_empty() {
        return writeln!(out, "_No diagrams generated._\n");
    }
    for artifact in artifacts {
        match artifact {
            Artifact::Embedded(diagram) => writeln!(
                out,
                "![{}]({}){{width={:.2}in height={:.2}in}}\n",
                diagram.name,
                diagram.path.display(),
                diagram.display.width,
                diagram.display.height
            )?,
            Artifact::Placeholder(placeholder) => writeln!(
                out,
                "_Diagram {} could not be embedded: {}_\n",
                placeholder.name, placeholder.reason
            )?,
        }
    }
    Ok(())
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
