//! Named command registry.
//!
//! The orchestration layer invokes operations by name. [`CommandDispatcher`] maps each
//! name to a handler closure registered when the personality is built; a name that
//! was never registered is an [`PersonalityError::UnknownCommand`] lookup miss.

use crate::error::{AppResult, PersonalityError};
use crate::header::AssembledHeader;
use crate::value::{StatusMap, StatusValue};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Keyword under which the caller's tag is merged into every request.
pub const TAG_KEY: &str = "tag";

/// Result of a dispatched command or a query request.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Reply {
    #[default]
    None,
    Value(StatusValue),
    Frames(Vec<String>),
    Header(AssembledHeader),
}

impl Reply {
    /// Wire form. Headers become FITS text, frames are newline-joined, a value is
    /// followed by a newline and `None` is an empty header.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::None => AssembledHeader::new().to_fits_bytes(),
            Self::Value(value) => format!("{}\n", value).into_bytes(),
            Self::Frames(frames) => {
                let mut text = frames.join("\n");
                text.push('\n');
                text.into_bytes()
            }
            Self::Header(header) => header.to_fits_bytes(),
        }
    }

    pub fn header(&self) -> Option<&AssembledHeader> {
        match self {
            Self::Header(header) => Some(header),
            _ => None,
        }
    }
}

/// One invocation: the caller's tag plus positional and keyword arguments.
#[derive(Clone, Debug, Default)]
pub struct CommandRequest {
    pub tag: String,
    pub args: Vec<StatusValue>,
    pub kwargs: StatusMap,
}

impl CommandRequest {
    pub fn new(tag: impl Into<String>, args: Vec<StatusValue>, mut kwargs: StatusMap) -> Self {
        let tag = tag.into();
        kwargs.insert(TAG_KEY.to_string(), StatusValue::Str(tag.clone()));
        Self { tag, args, kwargs }
    }

    /// Keyword `name`, falling back to positional `index`.
    pub fn param(&self, index: usize, name: &str) -> Option<&StatusValue> {
        self.kwargs.get(name).or_else(|| self.args.get(index))
    }

    pub fn f64_or(&self, index: usize, name: &str, default: f64) -> AppResult<f64> {
        match self.param(index, name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| PersonalityError::invalid_argument(name, format!("'{}' is not a number", value))),
        }
    }

    pub fn i64_or(&self, index: usize, name: &str, default: i64) -> AppResult<i64> {
        match self.param(index, name) {
            None => Ok(default),
            Some(value) => value.as_i64().ok_or_else(|| {
                PersonalityError::invalid_argument(name, format!("'{}' is not an integer", value))
            }),
        }
    }

    pub fn bool_or(&self, index: usize, name: &str, default: bool) -> AppResult<bool> {
        match self.param(index, name) {
            None => Ok(default),
            Some(value) => value.as_bool().ok_or_else(|| {
                PersonalityError::invalid_argument(name, format!("'{}' is not a boolean", value))
            }),
        }
    }

    /// String view of a parameter; numbers are rendered with `Display`.
    pub fn string(&self, index: usize, name: &str) -> Option<String> {
        self.param(index, name).map(ToString::to_string)
    }

    pub fn require_string(&self, index: usize, name: &str) -> AppResult<String> {
        self.string(index, name)
            .ok_or_else(|| PersonalityError::invalid_argument(name, "required"))
    }
}

pub type CommandFuture = BoxFuture<'static, AppResult<Reply>>;

/// Handler invoked for one registered command name.
pub type CommandHandler = Box<dyn Fn(CommandRequest) -> CommandFuture + Send + Sync>;

#[derive(Default)]
pub struct CommandDispatcher {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(CommandRequest) -> CommandFuture + Send + Sync + 'static,
    {
        let name = name.into();
        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            warn!("Command '{}' registered twice; keeping the latest", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn dispatch(
        &self,
        tag: &str,
        name: &str,
        args: Vec<StatusValue>,
        kwargs: StatusMap,
    ) -> AppResult<Reply> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| PersonalityError::UnknownCommand(name.to_string()))?;
        debug!("Dispatching '{}' for tag '{}'", name, tag);
        handler(CommandRequest::new(tag, args, kwargs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tag(request: CommandRequest) -> CommandFuture {
        Box::pin(async move { Ok(Reply::Value(request.kwargs[TAG_KEY].clone())) })
    }

    #[tokio::test]
    async fn test_dispatch_merges_tag() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register("echo", echo_tag);

        let reply = dispatcher
            .dispatch("mon.CHARIS.1", "echo", vec![], StatusMap::new())
            .await
            .unwrap();
        assert_eq!(reply, Reply::Value("mon.CHARIS.1".into()));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dispatcher = CommandDispatcher::new();
        let err = dispatcher
            .dispatch("t", "frobnicate", vec![], StatusMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PersonalityError::UnknownCommand(ref n) if n == "frobnicate"));
    }

    #[test]
    fn test_commands_sorted() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register("sleep", echo_tag);
        dispatcher.register("filter", echo_tag);
        assert_eq!(dispatcher.commands(), ["filter", "sleep"]);
        assert!(dispatcher.contains("sleep"));
        assert!(!dispatcher.contains("ramp"));
    }

    #[test]
    fn test_params_prefer_keywords() {
        let mut kwargs = StatusMap::new();
        kwargs.insert("exptime".into(), "2.5".into());
        let request = CommandRequest::new("t", vec![StatusValue::Int(7), StatusValue::Int(3)], kwargs);

        assert_eq!(request.f64_or(0, "exptime", 0.0).unwrap(), 2.5);
        assert_eq!(request.i64_or(1, "nreset", 1).unwrap(), 3);
        assert_eq!(request.i64_or(5, "nread", 0).unwrap(), 0);
        assert!(request.bool_or(0, "fullHeader", true).is_ok());
        assert!(request.i64_or(0, "exptime", 0).is_err());
    }

    #[test]
    fn test_reply_bytes() {
        assert_eq!(Reply::Value(StatusValue::Int(4)).to_bytes(), b"4\n");
        assert_eq!(
            Reply::Frames(vec!["CRSA00000001".into(), "CRSA00000002".into()]).to_bytes(),
            b"CRSA00000001\nCRSA00000002\n"
        );
        assert_eq!(Reply::None.to_bytes().len(), 2880);
    }
}
