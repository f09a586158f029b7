use tracing::debug;

use crate::core::conversation::Section;
use crate::core::stream::frame::{AuthorizationRequest, StreamEvent};

/// What folding one event did to the section list.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    OpenedText,
    AppendedText,
    /// The delta was already contained in the trailing text section.
    DroppedDuplicate,
    AddedToolOutput,
    /// Control event: nothing was folded, the stream has to stop here.
    Gate(AuthorizationRequest),
    Ignored,
}

/// Folds stream events into the ordered sections of one agent message.
///
/// Text deltas extend the trailing text section unless it already contains
/// the delta, which is taken for a retransmission and dropped. That check is
/// a substring heuristic: a genuine delta that happens to repeat earlier text
/// of the same section is dropped as well.
#[derive(Debug, Clone, Default)]
pub struct SectionAssembler {
    text_sealed: bool,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the trailing text section: the next delta opens a new one.
    /// Used at the boundary between the stream that hit the authorization
    /// gate and the stream that resumes the turn.
    pub fn seal_text(&mut self) {
        self.text_sealed = true;
    }

    pub fn apply_to(&mut self, event: StreamEvent, sections: &mut Vec<Section>) -> Applied {
        match event {
            StreamEvent::TextDelta(delta) => {
                let sealed = std::mem::take(&mut self.text_sealed);
                match sections.last_mut() {
                    Some(Section::Text(content)) if !sealed => {
                        if content.contains(delta.as_str()) {
                            debug!(len = delta.len(), "dropping duplicate text delta");
                            Applied::DroppedDuplicate
                        } else {
                            content.push_str(&delta);
                            Applied::AppendedText
                        }
                    }
                    _ => {
                        sections.push(Section::Text(delta));
                        Applied::OpenedText
                    }
                }
            }
            StreamEvent::ToolOutput(payload) => {
                self.text_sealed = false;
                sections.push(Section::ToolOutput(payload));
                Applied::AddedToolOutput
            }
            StreamEvent::AuthorizationRequest(request) => Applied::Gate(request),
            StreamEvent::Ignorable(reason) => {
                debug!(?reason, "ignoring stream line");
                Applied::Ignored
            }
        }
    }
}

/// Pure fold of one event over a section list.
pub fn apply(event: StreamEvent, mut sections: Vec<Section>) -> Vec<Section> {
    SectionAssembler::new().apply_to(event, &mut sections);
    sections
}
