use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The closed set of surface types a server may push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Form,
    Card,
    Table,
    Summary,
    ActionButtons,
    Progress,
    Message,
    ActivityPreview,
    AarTemplate,
    ApprovalRequest,
}

impl SurfaceKind {
    pub const ALL: [SurfaceKind; 10] = [
        SurfaceKind::Form,
        SurfaceKind::Card,
        SurfaceKind::Table,
        SurfaceKind::Summary,
        SurfaceKind::ActionButtons,
        SurfaceKind::Progress,
        SurfaceKind::Message,
        SurfaceKind::ActivityPreview,
        SurfaceKind::AarTemplate,
        SurfaceKind::ApprovalRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SurfaceKind::Form => "form",
            SurfaceKind::Card => "card",
            SurfaceKind::Table => "table",
            SurfaceKind::Summary => "summary",
            SurfaceKind::ActionButtons => "action_buttons",
            SurfaceKind::Progress => "progress",
            SurfaceKind::Message => "message",
            SurfaceKind::ActivityPreview => "activity_preview",
            SurfaceKind::AarTemplate => "aar_template",
            SurfaceKind::ApprovalRequest => "approval_request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

pub fn is_known_surface_type(surface_type: &str) -> bool {
    SurfaceKind::parse(surface_type).is_some()
}

/// A declarative UI payload. Immutable once received; replaced wholesale by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Surface {
    Form(FormSurface),
    Card(CardSurface),
    Table(TableSurface),
    Summary(SummarySurface),
    ActionButtons(ActionButtonsSurface),
    Progress(ProgressSurface),
    Message(MessageSurface),
    ActivityPreview(ActivityPreviewSurface),
    AarTemplate(AarTemplateSurface),
    ApprovalRequest(ApprovalRequestSurface),
    /// Raw payload of a type outside the catalog, kept verbatim for passthrough rendering.
    #[serde(untagged)]
    Unrecognized(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSurface {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

fn default_field_type() -> String {
    "text".to_string()
}

/// A button or link a surface offers; triggering it goes through the side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceAction {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSurface {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub actions: Vec<SurfaceAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSurface {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub columns: Vec<TableColumn>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub key: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarySurface {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub items: Vec<SummaryItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionButtonsSurface {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(alias = "buttons")]
    pub actions: Vec<SurfaceAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSurface {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSurface {
    pub id: String,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub level: MessageLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPreviewSurface {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// After-action review form: titled sections the user fills in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AarTemplateSurface {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub sections: Vec<AarSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AarSection {
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestSurface {
    pub id: String,
    pub approval_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Surface {
    /// Classify and decode a raw surface. Unknown types become
    /// [`Surface::Unrecognized`]; a known type with a bad payload is an error.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        if !raw.is_object() {
            return Err(serde_json::Error::custom("surface must be a JSON object"));
        }
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .and_then(SurfaceKind::parse);

        let Some(kind) = kind else {
            return Ok(Surface::Unrecognized(raw));
        };

        let surface = match kind {
            SurfaceKind::Form => Surface::Form(serde_json::from_value(raw)?),
            SurfaceKind::Card => Surface::Card(serde_json::from_value(raw)?),
            SurfaceKind::Table => Surface::Table(serde_json::from_value(raw)?),
            SurfaceKind::Summary => Surface::Summary(serde_json::from_value(raw)?),
            SurfaceKind::ActionButtons => Surface::ActionButtons(serde_json::from_value(raw)?),
            SurfaceKind::Progress => Surface::Progress(serde_json::from_value(raw)?),
            SurfaceKind::Message => Surface::Message(serde_json::from_value(raw)?),
            SurfaceKind::ActivityPreview => {
                Surface::ActivityPreview(serde_json::from_value(raw)?)
            }
            SurfaceKind::AarTemplate => Surface::AarTemplate(serde_json::from_value(raw)?),
            SurfaceKind::ApprovalRequest => {
                Surface::ApprovalRequest(serde_json::from_value(raw)?)
            }
        };
        Ok(surface)
    }

    pub fn id(&self) -> &str {
        match self {
            Surface::Form(surface) => &surface.id,
            Surface::Card(surface) => &surface.id,
            Surface::Table(surface) => &surface.id,
            Surface::Summary(surface) => &surface.id,
            Surface::ActionButtons(surface) => &surface.id,
            Surface::Progress(surface) => &surface.id,
            Surface::Message(surface) => &surface.id,
            Surface::ActivityPreview(surface) => &surface.id,
            Surface::AarTemplate(surface) => &surface.id,
            Surface::ApprovalRequest(surface) => &surface.id,
            Surface::Unrecognized(raw) => raw.get("id").and_then(Value::as_str).unwrap_or(""),
        }
    }

    pub fn kind(&self) -> Option<SurfaceKind> {
        let kind = match self {
            Surface::Form(_) => SurfaceKind::Form,
            Surface::Card(_) => SurfaceKind::Card,
            Surface::Table(_) => SurfaceKind::Table,
            Surface::Summary(_) => SurfaceKind::Summary,
            Surface::ActionButtons(_) => SurfaceKind::ActionButtons,
            Surface::Progress(_) => SurfaceKind::Progress,
            Surface::Message(_) => SurfaceKind::Message,
            Surface::ActivityPreview(_) => SurfaceKind::ActivityPreview,
            Surface::AarTemplate(_) => SurfaceKind::AarTemplate,
            Surface::ApprovalRequest(_) => SurfaceKind::ApprovalRequest,
            Surface::Unrecognized(_) => return None,
        };
        Some(kind)
    }

    /// Wire `type` string, including unknown ones.
    pub fn type_name(&self) -> &str {
        match self {
            Surface::Unrecognized(raw) => raw.get("type").and_then(Value::as_str).unwrap_or(""),
            known => known.kind().map(SurfaceKind::as_str).unwrap_or(""),
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.kind().is_some()
    }
}

impl<'de> Deserialize<'de> for Surface {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Surface::from_value(raw).map_err(D::Error::custom)
    }
}
