//! Command registry
//!
//! Centralized registry for all available commands.
//! This allows loose coupling between command implementations and the dispatcher.

use super::{admin, hash, key, list, scripting, set, stream, string, ttl, zset, Command};
use crate::error::{CommandError, CommandResult};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of all available commands
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Create a new command registry and register all commands
    pub fn new() -> Self {
        let mut registry = CommandRegistry {
            commands: HashMap::new(),
        };

        // Register connection and server commands
        registry.register(Arc::new(admin::PingCommand));
        registry.register(Arc::new(admin::EchoCommand));
        registry.register(Arc::new(admin::SelectCommand));
        registry.register(Arc::new(admin::DbSizeCommand));
        registry.register(Arc::new(admin::FlushDbCommand));
        registry.register(Arc::new(admin::FlushAllCommand));

        // Register key commands
        registry.register(Arc::new(key::DelCommand));
        registry.register(Arc::new(key::ExistsCommand));
        registry.register(Arc::new(key::TypeCommand));
        registry.register(Arc::new(key::KeysCommand));
        registry.register(Arc::new(key::ScanCommand));

        // Register TTL commands
        registry.register(Arc::new(ttl::ExpireCommand));
        registry.register(Arc::new(ttl::PExpireCommand));
        registry.register(Arc::new(ttl::TtlCommand));
        registry.register(Arc::new(ttl::PTtlCommand));
        registry.register(Arc::new(ttl::PersistCommand));

        // Register string commands
        registry.register(Arc::new(string::SetCommand));
        registry.register(Arc::new(string::GetCommand));
        registry.register(Arc::new(string::IncrCommand));
        registry.register(Arc::new(string::DecrCommand));
        registry.register(Arc::new(string::IncrByCommand));
        registry.register(Arc::new(string::DecrByCommand));
        registry.register(Arc::new(string::SetBitCommand));
        registry.register(Arc::new(string::GetBitCommand));
        registry.register(Arc::new(string::BitCountCommand));

        // Register list commands
        registry.register(Arc::new(list::LPushCommand));
        registry.register(Arc::new(list::RPushCommand));
        registry.register(Arc::new(list::LPopCommand));
        registry.register(Arc::new(list::RPopCommand));
        registry.register(Arc::new(list::LLenCommand));
        registry.register(Arc::new(list::LRangeCommand));
        registry.register(Arc::new(list::LRemCommand));
        registry.register(Arc::new(list::RPopLPushCommand));
        registry.register(Arc::new(list::BLPopCommand));
        registry.register(Arc::new(list::BRPopCommand));
        registry.register(Arc::new(list::SortCommand));

        // Register set commands
        registry.register(Arc::new(set::SAddCommand));
        registry.register(Arc::new(set::SRemCommand));
        registry.register(Arc::new(set::SMembersCommand));
        registry.register(Arc::new(set::SCardCommand));
        registry.register(Arc::new(set::SIsMemberCommand));
        registry.register(Arc::new(set::SMIsMemberCommand));
        registry.register(Arc::new(set::SPopCommand));
        registry.register(Arc::new(set::SMoveCommand));
        for op in [set::SetOp::Inter, set::SetOp::Union, set::SetOp::Diff] {
            registry.register(Arc::new(set::SetAlgebraCommand::read(op)));
            registry.register(Arc::new(set::SetAlgebraCommand::store(op)));
        }

        // Register hash commands
        registry.register(Arc::new(hash::HSetCommand));
        registry.register(Arc::new(hash::HSetNxCommand));
        registry.register(Arc::new(hash::HGetCommand));
        registry.register(Arc::new(hash::HGetAllCommand));
        registry.register(Arc::new(hash::HDelCommand));
        registry.register(Arc::new(hash::HExistsCommand));
        registry.register(Arc::new(hash::HLenCommand));
        registry.register(Arc::new(hash::HIncrByCommand));
        registry.register(Arc::new(hash::HIncrByFloatCommand));

        // Register sorted set commands
        registry.register(Arc::new(zset::ZAddCommand));
        registry.register(Arc::new(zset::ZScoreCommand));
        registry.register(Arc::new(zset::ZCardCommand));
        registry.register(Arc::new(zset::ZCountCommand));
        registry.register(Arc::new(zset::ZRangeCommand));
        registry.register(Arc::new(zset::ZRemCommand));
        registry.register(Arc::new(zset::ZPopCommand::min()));
        registry.register(Arc::new(zset::ZPopCommand::max()));
        registry.register(Arc::new(zset::BZPopCommand::min()));
        registry.register(Arc::new(zset::BZPopCommand::max()));
        registry.register(Arc::new(zset::ZCombineCommand::union()));
        registry.register(Arc::new(zset::ZCombineCommand::inter()));
        registry.register(Arc::new(zset::ZCombineCommand::union_store()));
        registry.register(Arc::new(zset::ZCombineCommand::inter_store()));

        // Register stream commands
        registry.register(Arc::new(stream::XAddCommand));
        registry.register(Arc::new(stream::XLenCommand));
        registry.register(Arc::new(stream::XRangeCommand::forward()));
        registry.register(Arc::new(stream::XRangeCommand::reverse()));
        registry.register(Arc::new(stream::XDelCommand));
        registry.register(Arc::new(stream::XTrimCommand));
        registry.register(Arc::new(stream::XReadCommand));

        // Register scripting commands
        registry.register(Arc::new(scripting::EvalCommand));
        registry.register(Arc::new(scripting::EvalShaCommand));
        registry.register(Arc::new(scripting::ScriptCommand));

        registry
    }

    /// Register a command
    fn register(&mut self, command: Arc<dyn Command>) {
        let name = command.name().to_uppercase();
        self.commands.insert(name, command);
    }

    /// Get a command by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(&name.to_uppercase()).cloned()
    }

    /// Resolve a command and check its argument count
    pub fn lookup(&self, name: &Bytes, args: &[Bytes]) -> CommandResult<Arc<dyn Command>> {
        let name = String::from_utf8_lossy(name);
        let command = self
            .get(&name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;

        let too_many = command.max_args().is_some_and(|max| args.len() > max);
        if args.len() < command.min_args() || too_many {
            return Err(CommandError::WrongArity(command.name().to_lowercase()));
        }
        Ok(command)
    }

    /// Check if a command exists
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_uppercase())
    }

    /// Get all command names
    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
