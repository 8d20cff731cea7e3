//! Stage and pipeline definition types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// One named step of a workflow
///
/// Immutable once the owning definition is built. Each stage is executed by
/// submitting work to `POST /api/{domain}/{endpoint}` and polling the returned task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Zero-based ordinal inside the pipeline
    #[serde(default)]
    pub position: usize,
    /// Stage-start path under the pipeline domain
    pub endpoint: String,
    #[serde(default)]
    pub input: StageInput,
}

/// Where a stage takes its request payload from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "from", content = "stage")]
pub enum StageInput {
    /// The payload the workflow was launched with
    #[default]
    Launch,
    /// The accumulated result of an earlier stage
    Stage(String),
}

/// Ordered, static list of stages walked by a pipeline instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// Path segment under `/api/` that stage-start calls are issued against
    pub domain: String,
    pub stages: Vec<Stage>,
}

/// Errors raised while building or loading a pipeline definition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("pipeline '{0}' has no stages")]
    Empty(String),

    #[error("stage at position {0} has a blank id")]
    BlankId(usize),

    #[error("duplicate stage id '{0}'")]
    DuplicateId(String),

    #[error("stage '{stage}' reads from '{source_stage}', which does not run before it")]
    UnknownInput { stage: String, source_stage: String },

    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("invalid pipeline definition: {0}")]
    Parse(String),
}

/// Names of the definitions returned by [`PipelineDefinition::builtin`]
pub const BUILTIN_PIPELINES: &[&str] = &["video-to-book", "testimony-to-scene"];

impl Stage {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
        input: StageInput,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            position: 0,
            endpoint: endpoint.into(),
            input,
        }
    }
}

impl PipelineDefinition {
    /// Builds a definition, assigning positions in list order and validating it
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        stages: Vec<Stage>,
    ) -> Result<Self, DefinitionError> {
        let mut definition = Self {
            name: name.into(),
            domain: domain.into(),
            stages,
        };
        definition.renumber();
        definition.validate()?;
        Ok(definition)
    }

    /// Parses a definition from JSON
    ///
    /// Positions in the document are ignored and reassigned from list order.
    pub fn from_json(source: &str) -> Result<Self, DefinitionError> {
        let mut definition: Self =
            serde_json::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        definition.renumber();
        definition.validate()?;
        Ok(definition)
    }

    /// Looks up one of the built-in definitions by name
    pub fn builtin(name: &str) -> Result<Self, DefinitionError> {
        match name {
            "video-to-book" => Ok(Self::video_to_book()),
            "testimony-to-scene" => Ok(Self::testimony_to_scene()),
            other => Err(DefinitionError::UnknownPipeline(other.to_string())),
        }
    }

    /// video → cleaned transcript → outline → chapters
    pub fn video_to_book() -> Self {
        Self::trusted(
            "video-to-book",
            "video",
            vec![
                Stage::new(
                    "transcript",
                    "Extract transcript",
                    "Download the video and transcribe its audio track",
                    "transcribe",
                    StageInput::Launch,
                ),
                Stage::new(
                    "clean",
                    "Clean transcript",
                    "Remove filler words, fix punctuation and split paragraphs",
                    "clean",
                    StageInput::Stage("transcript".to_string()),
                ),
                Stage::new(
                    "outline",
                    "Build outline",
                    "Derive a book outline from the cleaned transcript",
                    "outline",
                    StageInput::Stage("clean".to_string()),
                ),
                Stage::new(
                    "chapters",
                    "Write chapters",
                    "Generate chapter drafts following the outline",
                    "chapters",
                    StageInput::Stage("outline".to_string()),
                ),
            ],
        )
    }

    /// testimony → architectural analysis → creative generation → scene
    pub fn testimony_to_scene() -> Self {
        Self::trusted(
            "testimony-to-scene",
            "testimony",
            vec![
                Stage::new(
                    "analysis",
                    "Architectural analysis",
                    "Extract characters, places and events from the testimony",
                    "analyze",
                    StageInput::Launch,
                ),
                Stage::new(
                    "generation",
                    "Creative generation",
                    "Expand the analysis into narrative material",
                    "generate",
                    StageInput::Stage("analysis".to_string()),
                ),
                Stage::new(
                    "scene",
                    "Compose scene",
                    "Assemble the generated material into a finished scene",
                    "scene",
                    StageInput::Stage("generation".to_string()),
                ),
            ],
        )
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage at a zero-based position
    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Position of the stage with the given id
    pub fn position_of(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.id == stage_id)
    }

    /// Validates the definition
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::Empty(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.id.trim().is_empty() {
                return Err(DefinitionError::BlankId(idx));
            }

            if let StageInput::Stage(source) = &stage.input {
                if !seen.contains(source.as_str()) {
                    return Err(DefinitionError::UnknownInput {
                        stage: stage.id.clone(),
                        source_stage: source.clone(),
                    });
                }
            }

            if !seen.insert(stage.id.as_str()) {
                return Err(DefinitionError::DuplicateId(stage.id.clone()));
            }
        }

        Ok(())
    }

    // Built-in definitions are covered by tests, so they skip validation.
    fn trusted(name: &str, domain: &str, stages: Vec<Stage>) -> Self {
        let mut definition = Self {
            name: name.to_string(),
            domain: domain.to_string(),
            stages,
        };
        definition.renumber();
        definition
    }

    fn renumber(&mut self) {
        for (idx, stage) in self.stages.iter_mut().enumerate() {
            stage.position = idx;
        }
    }
}
