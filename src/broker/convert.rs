// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Caller-facing shapes of language-server results, with 1-based coordinates.

use lsp_types::{
    Diagnostic, DiagnosticSeverity, DocumentSymbol, DocumentSymbolResponse,
    GotoDefinitionResponse, Hover, HoverContents, Location, LocationLink, MarkedString,
    NumberOrString, Range,
};
use serde::Serialize;
use std::path::PathBuf;

use crate::lsp::uri_to_path;
use crate::position::to_one_based;

/// A 1-based, end-exclusive text range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// First line.
    pub start_line: u32,
    /// First column.
    pub start_column: u32,
    /// Last line.
    pub end_line: u32,
    /// Column after the last character.
    pub end_column: u32,
}

impl From<&Range> for Span {
    fn from(range: &Range) -> Self {
        Self {
            start_line: to_one_based(range.start.line),
            start_column: to_one_based(range.start.character),
            end_line: to_one_based(range.end.line),
            end_column: to_one_based(range.end.character),
        }
    }
}

/// Rendered hover text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverInfo {
    /// Hover contents, flattened to one string.
    pub contents: String,
    /// Range the hover applies to, if the server said.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Span>,
}

impl From<&Hover> for HoverInfo {
    fn from(hover: &Hover) -> Self {
        let contents = match &hover.contents {
            HoverContents::Scalar(marked) => render_marked(marked),
            HoverContents::Array(parts) => parts
                .iter()
                .map(render_marked)
                .collect::<Vec<_>>()
                .join("\n\n"),
            HoverContents::Markup(markup) => markup.value.clone(),
        };
        Self {
            contents,
            range: hover.range.as_ref().map(Span::from),
        }
    }
}

fn render_marked(marked: &MarkedString) -> String {
    match marked {
        MarkedString::String(text) => text.clone(),
        MarkedString::LanguageString(code) => {
            format!("```{}\n{}\n```", code.language, code.value)
        }
    }
}

/// A location in some file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    /// Local path, when the URI is a `file://` URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// URI as the server sent it.
    pub uri: String,
    /// Range in the target file.
    pub span: Span,
}

impl From<&Location> for LocationInfo {
    fn from(location: &Location) -> Self {
        Self {
            file: uri_to_path(&location.uri),
            uri: location.uri.as_str().to_string(),
            span: Span::from(&location.range),
        }
    }
}

impl From<&LocationLink> for LocationInfo {
    fn from(link: &LocationLink) -> Self {
        Self {
            file: uri_to_path(&link.target_uri),
            uri: link.target_uri.as_str().to_string(),
            span: Span::from(&link.target_selection_range),
        }
    }
}

/// Flattens the three shapes a definition response can take.
#[must_use]
pub fn locations(response: &GotoDefinitionResponse) -> Vec<LocationInfo> {
    match response {
        GotoDefinitionResponse::Scalar(location) => vec![LocationInfo::from(location)],
        GotoDefinitionResponse::Array(locations) => locations.iter().map(LocationInfo::from).collect(),
        GotoDefinitionResponse::Link(links) => links.iter().map(LocationInfo::from).collect(),
    }
}

/// A document symbol whose name matched a query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMatch {
    /// Symbol name.
    pub name: String,
    /// Symbol kind, e.g. `function`.
    pub kind: String,
    /// Enclosing symbol, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Full extent of the symbol.
    pub span: Span,
    /// Range of the name itself.
    pub selection: Span,
}

/// Every symbol named exactly `name`; if there is none, every symbol whose
/// name matches ignoring case.
#[must_use]
pub fn find_symbols(response: &DocumentSymbolResponse, name: &str) -> Vec<SymbolMatch> {
    let all = flatten_symbols(response);
    let exact: Vec<SymbolMatch> = all.iter().filter(|s| s.name == name).cloned().collect();
    if !exact.is_empty() {
        return exact;
    }
    all.into_iter()
        .filter(|s| s.name.eq_ignore_ascii_case(name))
        .collect()
}

fn flatten_symbols(response: &DocumentSymbolResponse) -> Vec<SymbolMatch> {
    match response {
        DocumentSymbolResponse::Flat(symbols) => symbols
            .iter()
            .map(|symbol| {
                let span = Span::from(&symbol.location.range);
                SymbolMatch {
                    name: symbol.name.clone(),
                    kind: format!("{:?}", symbol.kind).to_lowercase(),
                    container: symbol.container_name.clone(),
                    span,
                    selection: span,
                }
            })
            .collect(),
        DocumentSymbolResponse::Nested(symbols) => {
            let mut out = Vec::new();
            walk_nested(symbols, None, &mut out);
            out
        }
    }
}

fn walk_nested(symbols: &[DocumentSymbol], container: Option<&str>, out: &mut Vec<SymbolMatch>) {
    for symbol in symbols {
        out.push(SymbolMatch {
            name: symbol.name.clone(),
            kind: format!("{:?}", symbol.kind).to_lowercase(),
            container: container.map(str::to_string),
            span: Span::from(&symbol.range),
            selection: Span::from(&symbol.selection_range),
        });
        if let Some(children) = &symbol.children {
            walk_nested(children, Some(&symbol.name), out);
        }
    }
}

/// One pushed diagnostic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInfo {
    /// `error`, `warning`, `info`, `hint` or `unknown`.
    pub severity: &'static str,
    /// Message text.
    pub message: String,
    /// Tool that produced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Diagnostic code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Affected range.
    pub span: Span,
}

impl From<&Diagnostic> for DiagnosticInfo {
    fn from(diagnostic: &Diagnostic) -> Self {
        let severity = match diagnostic.severity {
            Some(DiagnosticSeverity::ERROR) => "error",
            Some(DiagnosticSeverity::WARNING) => "warning",
            Some(DiagnosticSeverity::INFORMATION) => "info",
            Some(DiagnosticSeverity::HINT) => "hint",
            _ => "unknown",
        };
        Self {
            severity,
            message: diagnostic.message.clone(),
            source: diagnostic.source.clone(),
            code: diagnostic.code.as_ref().map(|code| match code {
                NumberOrString::Number(n) => n.to_string(),
                NumberOrString::String(s) => s.clone(),
            }),
            span: Span::from(&diagnostic.range),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use lsp_types::{
        LanguageString, MarkupContent, MarkupKind, Position, SymbolKind, Uri,
    };
    use std::str::FromStr;

    fn range(line: u32, start: u32, end: u32) -> Range {
        Range {
            start: Position { line, character: start },
            end: Position { line, character: end },
        }
    }

    #[allow(deprecated, reason = "DocumentSymbol still carries the deprecated field")]
    fn symbol(name: &str, line: u32, children: Vec<DocumentSymbol>) -> DocumentSymbol {
        DocumentSymbol {
            name: name.to_string(),
            detail: None,
            kind: SymbolKind::FUNCTION,
            tags: None,
            deprecated: None,
            range: range(line, 0, 20),
            selection_range: range(line, 4, 4 + u32::try_from(name.len()).unwrap()),
            children: if children.is_empty() { None } else { Some(children) },
        }
    }

    #[test]
    fn test_span_is_one_based() {
        let span = Span::from(&range(0, 0, 5));
        assert_eq!(
            span,
            Span {
                start_line: 1,
                start_column: 1,
                end_line: 1,
                end_column: 6
            }
        );
    }

    #[test]
    fn test_hover_contents_flattened() {
        let hover = Hover {
            contents: HoverContents::Array(vec![
                MarkedString::LanguageString(LanguageString {
                    language: "python".into(),
                    value: "def greet(name)".into(),
                }),
                MarkedString::String("Says hello.".into()),
            ]),
            range: None,
        };
        let info = HoverInfo::from(&hover);
        assert_eq!(info.contents, "```python\ndef greet(name)\n```\n\nSays hello.");

        let markup = Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: "**x**: int".into(),
            }),
            range: Some(range(2, 0, 1)),
        };
        assert_eq!(HoverInfo::from(&markup).range.unwrap().start_line, 3);
    }

    #[test]
    fn test_definition_shapes() {
        let uri = Uri::from_str("file:///work/app.py").unwrap();
        let location = Location {
            uri: uri.clone(),
            range: range(9, 4, 9),
        };
        let scalar = locations(&GotoDefinitionResponse::Scalar(location.clone()));
        assert_eq!(scalar.len(), 1);
        assert_eq!(scalar[0].span.start_line, 10);
        assert_eq!(scalar[0].file, Some(PathBuf::from("/work/app.py")));

        let links = locations(&GotoDefinitionResponse::Link(vec![LocationLink {
            origin_selection_range: None,
            target_uri: uri,
            target_range: range(0, 0, 30),
            target_selection_range: range(1, 4, 9),
        }]));
        assert_eq!(links[0].span.start_line, 2);
        assert!(locations(&GotoDefinitionResponse::Array(vec![])).is_empty());
    }

    #[test]
    fn test_find_symbols_nested_and_ambiguous() {
        let response = DocumentSymbolResponse::Nested(vec![
            symbol("Greeter", 0, vec![symbol("greet", 2, vec![])]),
            symbol("greet", 10, vec![]),
        ]);

        let matches = find_symbols(&response, "greet");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].container.as_deref(), Some("Greeter"));
        assert_eq!(matches[0].selection.start_line, 3);
        assert_eq!(matches[1].container, None);
        assert_eq!(matches[1].kind, "function");
    }

    #[test]
    fn test_find_symbols_falls_back_to_case_insensitive() {
        let response = DocumentSymbolResponse::Nested(vec![symbol("Greeter", 0, vec![])]);
        assert_eq!(find_symbols(&response, "greeter").len(), 1);
        assert!(find_symbols(&response, "Greet").is_empty());
    }

    #[test]
    fn test_diagnostic_info() {
        let diagnostic = Diagnostic {
            range: range(4, 2, 8),
            severity: Some(DiagnosticSeverity::WARNING),
            code: Some(NumberOrString::String("unused".into())),
            source: Some("mockls".into()),
            message: "unused variable".into(),
            ..Diagnostic::default()
        };
        let info = DiagnosticInfo::from(&diagnostic);
        assert_eq!(info.severity, "warning");
        assert_eq!(info.code.as_deref(), Some("unused"));
        assert_eq!(info.span.start_line, 5);
        assert_eq!(info.span.start_column, 3);
    }
}
