/// A prefixed chat command split into its name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Returns `None` when `text` does not start with `prefix`; that is the normal
/// outcome for ordinary chat, not an error. Never fails otherwise: a bare
/// prefix yields an empty command name, and argument counts are checked by
/// the dispatcher.
pub fn parse_prefixed_command(text: &str, prefix: &str) -> Option<ParsedCommand> {
    let rest = text.strip_prefix(prefix)?;
    let mut tokens = rest.split_whitespace();
    let name = tokens.next().unwrap_or_default().to_string();
    let args = tokens.map(ToString::to_string).collect();
    Some(ParsedCommand { name, args })
}
