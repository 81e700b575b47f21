use storyport_common::StoryRecord;

use crate::error::DecodeError;

/// Decode one export line. Blank lines are `Ok(None)` and are not errors.
pub fn decode_line(line_no: u64, line: &str) -> Result<Option<StoryRecord>, DecodeError> {
    let trimmed = line.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| DecodeError {
            line: line_no,
            message: e.to_string(),
        })
}
