//! Speaker-segmented transcripts as delivered by the recording provider.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptWord {
    #[serde(alias = "text")]
    pub word: String,
}

/// Flatten segments into `Speaker: text` lines, merging consecutive
/// segments from the same speaker. Returns `None` when there are no words.
pub fn render_transcript(segments: &[TranscriptSegment]) -> Option<String> {
    let mut lines: Vec<(String, String)> = Vec::new();

    for segment in segments {
        let text = segment
            .words
            .iter()
            .map(|w| w.word.trim())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            continue;
        }

        let speaker = segment
            .speaker
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string();

        match lines.last_mut() {
            Some((last_speaker, last_text)) if *last_speaker == speaker => {
                last_text.push(' ');
                last_text.push_str(&text);
            }
            _ => lines.push((speaker, text)),
        }
    }

    if lines.is_empty() {
        return None;
    }

    Some(
        lines
            .into_iter()
            .map(|(speaker, text)| format!("{speaker}: {text}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
