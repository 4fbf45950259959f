use tracing::warn;

use crate::db::SoundMapping;

/// Discord rejects messages longer than this many characters.
pub(crate) const DISCORD_MESSAGE_LIMIT: usize = 2000;

pub(crate) const EMPTY_LIST_REPLY: &str = "No sounds have been added yet.";

pub(crate) const STORAGE_UNAVAILABLE_REPLY: &str =
    "The sound library is unavailable right now, please try again in a moment.";

pub(crate) fn help_text(prefix: &str) -> String {
    format!(
        "**Soundboard commands**\n\
         `{prefix}add <trigger> <url> [seconds]` bind a clip to a trigger, optionally cut off after `seconds`\n\
         `{prefix}remove <trigger>` forget a trigger\n\
         `{prefix}list` show every trigger in this server\n\
         `{prefix}disconnect` stop playing and leave the voice channel\n\
         `{prefix}ping` check that the bot is alive\n\
         `{prefix}help` show this message\n\
         Post a trigger on its own while you are in a voice channel to play it."
    )
}

/// Renders one `list` line: `trigger <source_url> [duration]`.
pub(crate) fn render_mapping_line(mapping: &SoundMapping) -> String {
    match mapping.clip_duration_seconds.filter(|secs| *secs >= 0.0) {
        Some(secs) => format!("{} <{}> [{}s]", mapping.trigger, mapping.source_url, secs),
        None => format!("{} <{}>", mapping.trigger, mapping.source_url),
    }
}

/// Packs lines into messages no longer than `limit` characters, breaking only
/// between lines. A single line over the limit is split on char boundaries.
pub(crate) fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in lines {
        let line_len = line.chars().count();
        if line_len > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            chunks.extend(chars.chunks(limit).map(|part| part.iter().collect::<String>()));
            continue;
        }

        let needed = if current.is_empty() {
            line_len
        } else {
            line_len + 1
        };
        if current_len + needed > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Parses the optional `add` duration argument. Anything that is not a finite
/// non-negative number plays the clip to its natural end.
pub(crate) fn parse_clip_duration(arg: Option<&str>) -> Option<f64> {
    let raw = arg?;
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(secs),
        Ok(secs) if secs < 0.0 => None,
        _ => {
            warn!("ignoring unusable clip duration {raw:?}, clip will play to its end");
            None
        }
    }
}
