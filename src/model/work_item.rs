use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Story,
    Defect,
}

impl EntityKind {
    /// Type name used in Rally WSAPI query paths.
    pub fn query_type(&self) -> &'static str {
        match self {
            EntityKind::Story => "hierarchicalrequirement",
            EntityKind::Defect => "defect",
        }
    }

    /// Token used by Rally's web UI routing in detail page links.
    pub fn route_token(&self) -> &'static str {
        match self {
            EntityKind::Story => "userstory",
            EntityKind::Defect => "defect",
        }
    }

    pub fn attachment_label(&self) -> &'static str {
        match self {
            EntityKind::Story => "Rally User Story",
            EntityKind::Defect => "Rally Defect",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Story => "user stories",
            EntityKind::Defect => "defects",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Story => f.write_str("story"),
            EntityKind::Defect => f.write_str("defect"),
        }
    }
}

/// A story or defect as fetched from Rally for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub formatted_id: String,
    pub object_id: u64,
    pub name: String,
    /// Object id of the owning Rally project.
    pub project_id: u64,
    /// Rich text (HTML) as stored in Rally.
    pub description: String,
    pub acceptance_criteria: String,
    pub plan_estimate: Option<f64>,
    pub kind: EntityKind,
}
