use serde::Deserialize;

/// Ordered list of entities rendered for a route, in declaration order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct View {
    pub entities: Vec<ViewEntity>,
}

impl View {
    pub fn new(entities: Vec<ViewEntity>) -> Self {
        Self { entities }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "EntityConfig")]
pub enum ViewEntity {
    Links(Vec<Link>),
    Form(Form),
    Markdown,
    Object,
    Table(TableSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Post,
    Put,
    Delete,
}

impl FormKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormKind::Post => "post",
            FormKind::Put => "put",
            FormKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "LinkConfig")]
pub struct Link {
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub title: Option<String>,
    pub target: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(rename = "type", default = "default_input")]
    pub input: String,
    pub label: Option<String>,
    pub value: Option<String>,
}

fn default_input() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TableSpec {
    /// Explicit columns. Empty means columns are detected from the data.
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Column {
    pub name: String,
    pub accessor: Option<String>,
}

impl Column {
    pub fn accessor(&self) -> &str {
        self.accessor.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum EntityConfig {
    Links {
        #[serde(alias = "fields")]
        links: Vec<Link>,
    },
    #[serde(rename = "POSTFORM")]
    PostForm(FormConfig),
    #[serde(rename = "PUTFORM")]
    PutForm(FormConfig),
    #[serde(rename = "DELETEFORM")]
    DeleteForm(FormConfig),
    Markdown,
    Object,
    Table {
        #[serde(default)]
        columns: Vec<Column>,
    },
}

#[derive(Deserialize)]
struct FormConfig {
    title: Option<String>,
    target: String,
    #[serde(default)]
    fields: Vec<Field>,
}

impl FormConfig {
    fn into_form(self, kind: FormKind) -> Form {
        Form {
            kind,
            title: self.title,
            target: self.target,
            fields: self.fields,
        }
    }
}

impl From<EntityConfig> for ViewEntity {
    fn from(config: EntityConfig) -> Self {
        match config {
            EntityConfig::Links { links } => ViewEntity::Links(links),
            EntityConfig::PostForm(form) => ViewEntity::Form(form.into_form(FormKind::Post)),
            EntityConfig::PutForm(form) => ViewEntity::Form(form.into_form(FormKind::Put)),
            EntityConfig::DeleteForm(form) => ViewEntity::Form(form.into_form(FormKind::Delete)),
            EntityConfig::Markdown => ViewEntity::Markdown,
            EntityConfig::Object => ViewEntity::Object,
            EntityConfig::Table { columns } => ViewEntity::Table(TableSpec { columns }),
        }
    }
}

/// A link is either a bare target (used as its own label) or `{target, label}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum LinkConfig {
    Target(String),
    Full { target: String, label: Option<String> },
}

impl From<LinkConfig> for Link {
    fn from(config: LinkConfig) -> Self {
        match config {
            LinkConfig::Target(target) => Link {
                label: target.clone(),
                target,
            },
            LinkConfig::Full { target, label } => Link {
                label: label.unwrap_or_else(|| target.clone()),
                target,
            },
        }
    }
}
