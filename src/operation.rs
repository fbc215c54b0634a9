use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ContentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutableSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub routables: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoutable {
    pub spec: RoutableSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRoutable {
    pub spec: RoutableSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRoutable {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub spec: PipelineSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePipeline {
    pub spec: PipelineSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePipeline {
    pub name: String,
}

/// One administrative change recorded in the operation log.
///
/// The wire form keeps one optional slot per content kind. Operations built
/// through the constructors always carry exactly one; decoded operations are
/// checked by [`Operation::content`] before the log accepts them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_routable: Option<CreateRoutable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update_routable: Option<UpdateRoutable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete_routable: Option<DeleteRoutable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_pipeline: Option<CreatePipeline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update_pipeline: Option<UpdatePipeline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete_pipeline: Option<DeletePipeline>,
}

impl Operation {
    pub fn create_routable(spec: RoutableSpec) -> Self {
        Self {
            create_routable: Some(CreateRoutable { spec }),
            ..Default::default()
        }
    }

    pub fn update_routable(spec: RoutableSpec) -> Self {
        Self {
            update_routable: Some(UpdateRoutable { spec }),
            ..Default::default()
        }
    }

    pub fn delete_routable(name: impl Into<String>) -> Self {
        Self {
            delete_routable: Some(DeleteRoutable { name: name.into() }),
            ..Default::default()
        }
    }

    pub fn create_pipeline(spec: PipelineSpec) -> Self {
        Self {
            create_pipeline: Some(CreatePipeline { spec }),
            ..Default::default()
        }
    }

    pub fn update_pipeline(spec: PipelineSpec) -> Self {
        Self {
            update_pipeline: Some(UpdatePipeline { spec }),
            ..Default::default()
        }
    }

    pub fn delete_pipeline(name: impl Into<String>) -> Self {
        Self {
            delete_pipeline: Some(DeletePipeline { name: name.into() }),
            ..Default::default()
        }
    }

    fn populated(&self) -> usize {
        [
            self.create_routable.is_some(),
            self.update_routable.is_some(),
            self.delete_routable.is_some(),
            self.create_pipeline.is_some(),
            self.update_pipeline.is_some(),
            self.delete_pipeline.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }

    /// The single content this operation carries.
    pub fn content(&self) -> Result<OperationContent<'_>, ContentError> {
        match self.populated() {
            0 => return Err(ContentError::Empty),
            1 => {}
            n => return Err(ContentError::Multiple(n)),
        }

        let content = if let Some(c) = &self.create_routable {
            OperationContent::CreateRoutable(&c.spec)
        } else if let Some(c) = &self.update_routable {
            OperationContent::UpdateRoutable(&c.spec)
        } else if let Some(c) = &self.delete_routable {
            OperationContent::DeleteRoutable(&c.name)
        } else if let Some(c) = &self.create_pipeline {
            OperationContent::CreatePipeline(&c.spec)
        } else if let Some(c) = &self.update_pipeline {
            OperationContent::UpdatePipeline(&c.spec)
        } else if let Some(c) = &self.delete_pipeline {
            OperationContent::DeletePipeline(&c.name)
        } else {
            return Err(ContentError::Empty);
        };

        Ok(content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperationContent<'a> {
    CreateRoutable(&'a RoutableSpec),
    UpdateRoutable(&'a RoutableSpec),
    DeleteRoutable(&'a str),
    CreatePipeline(&'a PipelineSpec),
    UpdatePipeline(&'a PipelineSpec),
    DeletePipeline(&'a str),
}

impl OperationContent<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationContent::CreateRoutable(_) => "create routable",
            OperationContent::UpdateRoutable(_) => "update routable",
            OperationContent::DeleteRoutable(_) => "delete routable",
            OperationContent::CreatePipeline(_) => "create pipeline",
            OperationContent::UpdatePipeline(_) => "update pipeline",
            OperationContent::DeletePipeline(_) => "delete pipeline",
        }
    }

    /// Name of the routable or pipeline the content targets.
    pub fn target(&self) -> &str {
        match self {
            OperationContent::CreateRoutable(spec) | OperationContent::UpdateRoutable(spec) => {
                &spec.name
            }
            OperationContent::CreatePipeline(spec) | OperationContent::UpdatePipeline(spec) => {
                &spec.name
            }
            OperationContent::DeleteRoutable(name) | OperationContent::DeletePipeline(name) => name,
        }
    }
}

impl fmt::Display for OperationContent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.as_str(), self.target())
    }
}
