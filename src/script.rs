//! Annotated script as returned by the text/rhythm extraction service.
//!
//! Sentences are grouped by the source block (paragraph, image region)
//! they came from. Playback only needs the flattened full text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBlock {
    #[serde(default)]
    pub sentences: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhythmScript {
    pub blocks: Vec<ScriptBlock>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptShape {
    Wrapped(RhythmScript),
    Bare(Vec<ScriptBlock>),
}

impl RhythmScript {
    /// Parse either `{"blocks": [...]}` or a bare array of blocks.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_str::<ScriptShape>(json)? {
            ScriptShape::Wrapped(script) => script,
            ScriptShape::Bare(blocks) => Self { blocks },
        })
    }

    /// Raw-text input: one block per non-empty line.
    pub fn from_plain(text: &str) -> Self {
        let blocks = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| ScriptBlock {
                sentences: vec![line.to_string()],
            })
            .collect();
        Self { blocks }
    }

    /// Sentences joined with spaces, blocks with newlines, in source order.
    pub fn full_text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| {
                block
                    .sentences
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|paragraph| !paragraph.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn sentence_count(&self) -> usize {
        self.blocks.iter().map(|b| b.sentences.len()).sum()
    }
}
