use std::sync::Arc;

use tracing::{debug, info};

use crate::db::{MappingStore, SoundMapping};
use crate::parsers::ParsedCommand;

use super::SoundboardError;
use super::logic::{
    DISCORD_MESSAGE_LIMIT, EMPTY_LIST_REPLY, chunk_lines, help_text, parse_clip_duration,
    render_mapping_line,
};
use super::playback::PlaybackController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Add,
    Remove,
    List,
    Disconnect,
    Help,
    Ping,
}

/// Arity contract of one command. Arguments are only ever counted here; their
/// contents are not validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDef {
    pub name: &'static str,
    pub kind: CommandKind,
    pub min_args: usize,
    pub max_args: usize,
    pub usage: &'static str,
}

pub const COMMANDS: &[CommandDef] = &[
    CommandDef {
        name: "add",
        kind: CommandKind::Add,
        min_args: 2,
        max_args: 3,
        usage: "add <trigger> <url> [seconds]",
    },
    CommandDef {
        name: "remove",
        kind: CommandKind::Remove,
        min_args: 1,
        max_args: 1,
        usage: "remove <trigger>",
    },
    CommandDef {
        name: "list",
        kind: CommandKind::List,
        min_args: 0,
        max_args: 0,
        usage: "list",
    },
    CommandDef {
        name: "disconnect",
        kind: CommandKind::Disconnect,
        min_args: 0,
        max_args: 0,
        usage: "disconnect",
    },
    CommandDef {
        name: "help",
        kind: CommandKind::Help,
        min_args: 0,
        max_args: 0,
        usage: "help",
    },
    CommandDef {
        name: "ping",
        kind: CommandKind::Ping,
        min_args: 0,
        max_args: 0,
        usage: "ping",
    },
];

pub fn command_def(name: &str) -> Option<&'static CommandDef> {
    COMMANDS.iter().find(|def| def.name == name)
}

impl CommandDef {
    pub fn accepts(&self, arg_count: usize) -> bool {
        (self.min_args..=self.max_args).contains(&arg_count)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    /// `None` for direct messages.
    pub guild_id: Option<&'a str>,
    pub author_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Handled { replies: Vec<String> },
    Rejected(RejectReason),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Arity {
        command: &'static str,
        given: usize,
        usage: &'static str,
    },
    GuildOnly {
        command: &'static str,
    },
}

impl RejectReason {
    pub fn hint(&self, prefix: &str) -> String {
        match self {
            RejectReason::Arity { usage, .. } => format!("Usage: `{prefix}{usage}`"),
            RejectReason::GuildOnly { command } => {
                format!("`{prefix}{command}` only works inside a server.")
            }
        }
    }
}

fn handled(reply: impl Into<String>) -> CommandOutcome {
    CommandOutcome::Handled {
        replies: vec![reply.into()],
    }
}

pub struct CommandDispatcher {
    prefix: String,
    store: Arc<dyn MappingStore>,
    playback: PlaybackController,
}

impl CommandDispatcher {
    pub fn new(
        prefix: impl Into<String>,
        store: Arc<dyn MappingStore>,
        playback: PlaybackController,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            store,
            playback,
        }
    }

    pub async fn dispatch(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext<'_>,
    ) -> Result<CommandOutcome, SoundboardError> {
        let Some(def) = command_def(&command.name) else {
            debug!(command = %command.name, author = %ctx.author_id, "ignoring unknown command");
            return Ok(CommandOutcome::Ignored);
        };

        let given = command.arg_count();
        if !def.accepts(given) {
            debug!(
                command = def.name,
                given,
                author = %ctx.author_id,
                "rejecting command with wrong argument count"
            );
            return Ok(CommandOutcome::Rejected(RejectReason::Arity {
                command: def.name,
                given,
                usage: def.usage,
            }));
        }

        let outcome = match (def.kind, ctx.guild_id) {
            (CommandKind::Help, _) => handled(help_text(&self.prefix)),
            (CommandKind::Ping, _) => handled("Pong!"),
            (_, None) => {
                CommandOutcome::Rejected(RejectReason::GuildOnly { command: def.name })
            }
            (CommandKind::Add, Some(guild_id)) => self.add(guild_id, &command.args).await?,
            (CommandKind::Remove, Some(guild_id)) => {
                self.remove(guild_id, &command.args[0]).await?
            }
            (CommandKind::List, Some(guild_id)) => self.list(guild_id).await?,
            (CommandKind::Disconnect, Some(guild_id)) => {
                let released = self.playback.disconnect(guild_id).await;
                debug!(guild_id = %guild_id, released, "disconnect command handled");
                CommandOutcome::Handled {
                    replies: Vec::new(),
                }
            }
        };
        Ok(outcome)
    }

    async fn add(&self, guild_id: &str, args: &[String]) -> Result<CommandOutcome, SoundboardError> {
        let duration = parse_clip_duration(args.get(2).map(String::as_str));
        let mapping = SoundMapping::new(guild_id, &args[0], &args[1], duration);
        self.store.upsert_mapping(&mapping).await?;

        info!(guild_id = %guild_id, trigger = %mapping.trigger, "sound mapping saved");
        Ok(handled(format!("Added {}", render_mapping_line(&mapping))))
    }

    async fn remove(&self, guild_id: &str, trigger: &str) -> Result<CommandOutcome, SoundboardError> {
        self.store.remove_mapping(guild_id, trigger).await?;

        info!(guild_id = %guild_id, trigger = %trigger, "sound mapping removed");
        Ok(handled(format!("Removed {trigger}")))
    }

    async fn list(&self, guild_id: &str) -> Result<CommandOutcome, SoundboardError> {
        let mappings = self.store.list_mappings(guild_id).await?;
        if mappings.is_empty() {
            return Ok(handled(EMPTY_LIST_REPLY));
        }

        let lines: Vec<String> = mappings.iter().map(render_mapping_line).collect();
        Ok(CommandOutcome::Handled {
            replies: chunk_lines(&lines, DISCORD_MESSAGE_LIMIT),
        })
    }
}
