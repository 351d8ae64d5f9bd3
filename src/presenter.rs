//! Read-only rendering of a stored report.
//!
//! The presenter walks the declared [`ReportSchema`] so sections always appear
//! in declaration order, whatever order the collaborator produced them in.

use serde::Serialize;
use serde_json::Value;

use crate::report::{Report, ReportFieldType, ReportSchema};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SectionBody {
    Text(String),
    Items(Vec<String>),
    Sections(Vec<ReportSection>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    pub name: String,
    pub title: String,
    /// The field's declared description, if any.
    pub description: Option<String>,
    pub body: SectionBody,
}

/// A report arranged for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    pub sections: Vec<ReportSection>,
    pub prompt_digest: String,
}

impl ReportView {
    /// Build the view. Absent optional fields are left out.
    pub fn new(report: &Report, schema: &ReportSchema) -> Self {
        Self {
            sections: sections(&report.content, schema),
            prompt_digest: report.prompt_digest.clone(),
        }
    }

    pub fn section(&self, name: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        for section in &self.sections {
            write_section(&mut output, section, 2);
        }
        output
    }
}

/// Render a report as markdown, one heading per top-level field.
pub fn render_markdown(report: &Report, schema: &ReportSchema) -> String {
    ReportView::new(report, schema).to_markdown()
}

fn sections(content: &serde_json::Map<String, Value>, schema: &ReportSchema) -> Vec<ReportSection> {
    schema
        .fields
        .iter()
        .filter_map(|field| {
            let value = content.get(&field.name)?;
            let body = match (&field.field_type, value) {
                (ReportFieldType::String, Value::String(text)) => SectionBody::Text(text.clone()),
                (ReportFieldType::StringArray, Value::Array(items)) => SectionBody::Items(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                ),
                (ReportFieldType::Object { schema }, Value::Object(nested)) => {
                    SectionBody::Sections(sections(nested, schema))
                }
                _ => return None,
            };
            Some(ReportSection {
                name: field.name.clone(),
                title: title_case(&field.name),
                description: field.description.clone(),
                body,
            })
        })
        .collect()
}

fn write_section(output: &mut String, section: &ReportSection, depth: usize) {
    output.push_str(&format!("{} {}\n\n", "#".repeat(depth.min(6)), section.title));
    if let Some(description) = &section.description {
        output.push_str(&format!("_{}_\n\n", description.trim()));
    }
    match &section.body {
        SectionBody::Text(text) => {
            output.push_str(&format!("{}\n\n", text.trim()));
        }
        SectionBody::Items(items) => {
            for item in items {
                output.push_str(&format!("- {item}\n"));
            }
            output.push('\n');
        }
        SectionBody::Sections(children) => {
            for child in children {
                write_section(output, child, depth + 1);
            }
        }
    }
}

/// `career_paths` / `careerPaths` -> `Career Paths`.
fn title_case(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
