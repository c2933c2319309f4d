//! Rewrites streamed assistant text before it reaches the UI.
//!
//! Two rewrites apply to the accumulated text of a block:
//! - markdown links `[label](url)` collapse to `label`
//! - citation glyphs `【…】` become sequential `[n]` references
//!
//! Both are computed from the full snapshot, so the rendered text is a pure
//! function of what has arrived so far. As long as the rewrite only extends
//! what was already shown, the filter emits the new suffix. When a rewrite
//! changes text that is already on screen (a link closed), it asks for the
//! whole surface to be replaced.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]\s*\(\s*.*?\s*\)").expect("link pattern is valid"));

static CITATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【.*?】").expect("citation pattern is valid"));

const CITATION_OPEN: char = '【';
const CITATION_CLOSE: char = '】';

/// Per-block accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentationState {
    /// Highest citation number assigned in this block.
    pub last_citation: usize,
    /// Text already pushed to the surface.
    pub emitted: String,
}

/// What the surface should do with a filtered delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutput {
    /// Nothing new to show yet.
    Unchanged,
    /// Append this text to the open surface.
    Append(String),
    /// Discard the open surface and show this text instead.
    Replace(String),
}

#[derive(Debug, Default)]
pub struct PresentationFilter {
    state: PresentationState,
}

impl PresentationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new text block.
    pub fn reset(&mut self) {
        self.state = PresentationState::default();
    }

    pub fn state(&self) -> &PresentationState {
        &self.state
    }

    /// Filter the block's accumulated `snapshot`, of which `delta` is the
    /// newest increment.
    pub fn apply(&mut self, snapshot: &str, delta: &str) -> FilterOutput {
        if delta.is_empty() {
            return FilterOutput::Unchanged;
        }

        self.publish(settled_prefix(snapshot))
    }

    /// Render a finished block in full, releasing any held-back text.
    ///
    /// An unmatched citation glyph is shown as it is.
    pub fn flush(&mut self, final_text: &str) -> FilterOutput {
        self.publish(final_text)
    }

    fn publish(&mut self, text: &str) -> FilterOutput {
        let (display, citations) = render(text);
        self.state.last_citation = self.state.last_citation.max(citations);

        if let Some(suffix) = display.strip_prefix(self.state.emitted.as_str()) {
            if suffix.is_empty() {
                return FilterOutput::Unchanged;
            }
            let suffix = suffix.to_string();
            self.state.emitted = display;
            FilterOutput::Append(suffix)
        } else {
            self.state.emitted.clone_from(&display);
            FilterOutput::Replace(display)
        }
    }
}

/// Text up to an unterminated citation glyph, which is held back until it closes.
fn settled_prefix(snapshot: &str) -> &str {
    match snapshot.rfind(CITATION_OPEN) {
        Some(pos) if !snapshot[pos..].contains(CITATION_CLOSE) => &snapshot[..pos],
        _ => snapshot,
    }
}

/// Apply both rewrites; returns the display text and the citation count.
fn render(text: &str) -> (String, usize) {
    let stripped = LINK_PATTERN.replace_all(text, "$1");
    let mut count = 0;
    let display = CITATION_PATTERN.replace_all(&stripped, |_: &Captures<'_>| {
        count += 1;
        format!("[{count}]")
    });
    let display = display.into_owned();
    (display, count)
}
