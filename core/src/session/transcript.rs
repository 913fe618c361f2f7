//! 对话转写聚合。
//!
//! 远端每次都推送完整的话语列表，因此这里只做整表替换，不做按键合并。

use crate::orchestrator::types::{Speaker, TranscriptEntry, Utterance};

#[derive(Debug, Default, Clone, Copy)]
pub struct TranscriptAggregator;

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Produces the full render-ready log for one snapshot.
    pub fn on_snapshot(&self, utterances: &[Utterance]) -> Vec<TranscriptEntry> {
        utterances.iter().map(entry_from_utterance).collect()
    }
}

fn entry_from_utterance(utterance: &Utterance) -> TranscriptEntry {
    let is_agent = utterance.speaker == Speaker::Agent;
    TranscriptEntry {
        text: utterance.text.clone(),
        is_agent,
        is_streaming: is_agent && !utterance.is_final,
    }
}
