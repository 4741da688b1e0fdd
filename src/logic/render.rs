use handlebars::{Handlebars, RenderError, TemplateError};
use pulldown_cmark::{html, Event, Options, Parser};
use serde_json::{json, Map, Value};
use std::fmt::Write;

use crate::model::{Column, Field, Form, Link, TableSpec, View, ViewEntity};

/// The structural shape of a pipeline result, decided once before rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape<'a> {
    /// Null, an empty object or an empty sequence.
    Absent,
    Scalar(&'a Value),
    Object(&'a Map<String, Value>),
    Sequence(&'a [Value]),
}

impl<'a> Shape<'a> {
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::Null => Shape::Absent,
            Value::Array(items) if items.is_empty() => Shape::Absent,
            Value::Array(items) => Shape::Sequence(items),
            Value::Object(map) if map.is_empty() => Shape::Absent,
            Value::Object(map) => Shape::Object(map),
            scalar => Shape::Scalar(scalar),
        }
    }
}

/// Renders every entity of a view against the same result, concatenated in order.
pub fn render(view: &View, result: &Value) -> String {
    let shape = Shape::of(result);
    view.entities
        .iter()
        .map(|entity| render_entity(entity, shape))
        .collect()
}

const LAYOUT: &str = "layout";

/// The page document a rendered view is placed into when a browser navigates to it.
///
/// The layout loads htmx, which the `hx-put` and `hx-delete` attributes of forms rely on.
pub struct Layout {
    registry: Handlebars<'static>,
    title: String,
}

impl Layout {
    pub fn new(title: impl Into<String>) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_template_string(LAYOUT, include_str!("../../templates/layout.hbs"))?;
        Ok(Self {
            registry,
            title: title.into(),
        })
    }

    /// Wraps an already rendered fragment. The fragment is inserted unescaped.
    pub fn page(&self, content: &str) -> Result<String, RenderError> {
        self.registry.render(
            LAYOUT,
            &json!({ "title": self.title, "content": content }),
        )
    }
}

pub fn render_entity(entity: &ViewEntity, shape: Shape<'_>) -> String {
    match entity {
        ViewEntity::Links(links) => render_links(links),
        ViewEntity::Form(form) => render_form(form),
        ViewEntity::Markdown => render_markdown(shape),
        ViewEntity::Object => render_object(shape),
        ViewEntity::Table(spec) => render_table(&table_model(spec, shape)),
    }
}

fn render_links(links: &[Link]) -> String {
    let mut out = String::from("<nav><ul>");
    for link in links {
        let _ = write!(
            out,
            r#"<li><a href="{}">{}</a></li>"#,
            escape_html(&link.target),
            escape_html(&link.label)
        );
    }
    out.push_str("</ul></nav>");
    out
}

fn render_form(form: &Form) -> String {
    let kind = form.kind.as_str();
    let target = escape_html(&form.target);
    let mut out = format!(
        r#"<form hx-{kind}="{target}" action="{target}" method="{kind}"><fieldset>"#,
        kind = kind,
        target = target
    );
    if let Some(title) = &form.title {
        let _ = write!(out, "<legend>{}</legend>", escape_html(title));
    }
    for field in &form.fields {
        render_field(&mut out, field);
    }
    out.push_str(r#"<button type="submit">Submit</button></fieldset></form>"#);
    out
}

fn render_field(out: &mut String, field: &Field) {
    let id = escape_html(&field.id);
    if let Some(label) = &field.label {
        let _ = write!(out, r#"<label for="{}">{}</label>"#, id, escape_html(label));
    }
    let _ = write!(
        out,
        r#"<input type="{}" id="{id}" name="{id}""#,
        escape_html(&field.input),
        id = id
    );
    if let Some(value) = &field.value {
        let _ = write!(out, r#" value="{}""#, escape_html(value));
    }
    out.push('>');
}

fn render_markdown(shape: Shape<'_>) -> String {
    match shape {
        Shape::Absent => String::new(),
        Shape::Scalar(value) => markdown_to_html(&scalar_text(value)),
        Shape::Object(map) => render_fields(map),
        Shape::Sequence(items) => items
            .iter()
            .map(|item| render_markdown(Shape::of(item)))
            .collect(),
    }
}

/// Renders untrusted markdown. Raw HTML in the source is emitted as text.
fn markdown_to_html(markdown: &str) -> String {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, opts).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}

/// `field: value` lines for structured results given to a markdown entity.
fn render_fields(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(key, value)| {
            format!(
                "<p><strong>{}</strong>: {}</p>",
                escape_html(key),
                escape_html(&cell_text(Some(value)))
            )
        })
        .collect()
}

fn render_object(shape: Shape<'_>) -> String {
    match shape {
        Shape::Absent => String::new(),
        Shape::Scalar(value) => escape_html(&scalar_text(value)),
        Shape::Object(map) => {
            let mut out = String::from("<dl>");
            for (key, value) in map {
                let _ = write!(
                    out,
                    "<dt>{}</dt><dd>{}</dd>",
                    escape_html(key),
                    render_object(Shape::of(value))
                );
            }
            out.push_str("</dl>");
            out
        }
        Shape::Sequence(items) => {
            let mut out = String::from("<ul>");
            for item in items {
                let _ = write!(out, "<li>{}</li>", render_object(Shape::of(item)));
            }
            out.push_str("</ul>");
            out
        }
    }
}

/// Header and cell text of a table, before markup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableModel {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Lays a result out as a grid.
///
/// Without explicit columns, a sequence of objects takes its columns from the first
/// element's keys in order and missing keys become empty cells; a single object is one
/// row; scalars go under a single `value` column; an absent result has no columns.
pub fn table_model(spec: &TableSpec, shape: Shape<'_>) -> TableModel {
    if !spec.columns.is_empty() {
        return explicit_table(&spec.columns, shape);
    }

    match shape {
        Shape::Absent => TableModel::default(),
        Shape::Scalar(value) => TableModel {
            columns: vec!["value".to_string()],
            rows: vec![vec![cell_text(Some(value))]],
        },
        Shape::Object(map) => TableModel {
            columns: map.keys().cloned().collect(),
            rows: vec![map.values().map(|v| cell_text(Some(v))).collect()],
        },
        Shape::Sequence(items) => match &items[0] {
            Value::Object(first) => {
                let columns: Vec<String> = first.keys().cloned().collect();
                let rows = items
                    .iter()
                    .map(|item| {
                        columns
                            .iter()
                            .map(|column| cell_text(item.as_object().and_then(|row| row.get(column))))
                            .collect()
                    })
                    .collect();
                TableModel { columns, rows }
            }
            _ => TableModel {
                columns: vec!["value".to_string()],
                rows: items.iter().map(|item| vec![cell_text(Some(item))]).collect(),
            },
        },
    }
}

fn explicit_table(columns: &[Column], shape: Shape<'_>) -> TableModel {
    let row_of = |item: &Value| -> Vec<String> {
        columns
            .iter()
            .map(|column| cell_text(lookup(item, column.accessor())))
            .collect()
    };

    let rows = match shape {
        Shape::Absent | Shape::Scalar(_) => Vec::new(),
        Shape::Object(map) => vec![columns
            .iter()
            .map(|column| cell_text(lookup_map(map, column.accessor())))
            .collect()],
        Shape::Sequence(items) => items.iter().map(row_of).collect(),
    };

    TableModel {
        columns: columns.iter().map(|c| c.name.clone()).collect(),
        rows,
    }
}

/// Resolves a dotted accessor such as `author.name`.
fn lookup<'a>(value: &'a Value, accessor: &str) -> Option<&'a Value> {
    value.as_object().and_then(|map| lookup_map(map, accessor))
}

fn lookup_map<'a>(map: &'a Map<String, Value>, accessor: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(accessor) {
        return Some(value);
    }
    let (head, rest) = accessor.split_once('.')?;
    map.get(head).and_then(|value| lookup(value, rest))
}

fn render_table(model: &TableModel) -> String {
    let mut out = String::from("<table><thead><tr>");
    for column in &model.columns {
        let _ = write!(out, "<th>{}</th>", escape_html(column));
    }
    out.push_str("</tr></thead><tbody>");
    for row in &model.rows {
        out.push_str("<tr>");
        for cell in row {
            let _ = write!(out, "<td>{}</td>", escape_html(cell));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
    out
}

/// Cell text: empty for missing or null, bare text for strings, JSON for everything else.
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn scalar_text(value: &Value) -> String {
    cell_text(Some(value))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
