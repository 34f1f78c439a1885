//! Command-level errors
//!
//! The `Display` text of every variant is the exact error line sent to the
//! client, so tests written against a real server can assert on it.

use crate::store::StreamError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR hash value is not an integer")]
    HashValueNotAnInteger,

    #[error("ERR hash value is not a float")]
    HashValueNotAFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NanOrInfinity,

    #[error("ERR value is out of range, must be positive")]
    MustBePositive,

    #[error("ERR bit offset is not an integer or out of range")]
    BitOffset,

    #[error("ERR bit is not an integer or out of range")]
    BitValue,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("ERR timeout is negative")]
    NegativeTimeout,

    #[error("ERR timeout is not a float or out of range")]
    TimeoutNotAFloat,

    #[error("ERR timeout is out of range")]
    TimeoutOutOfRange,

    #[error("ERR timeout is not an integer or out of range")]
    TimeoutNotAnInteger,

    #[error("ERR weight value is not a float")]
    WeightNotAFloat,

    #[error("ERR at least 1 input key is needed for '{0}' command")]
    NoInputKeys(String),

    #[error("ERR min or max is not a float")]
    MinMaxNotAFloat,

    #[error("ERR One or more scores can't be converted into double")]
    SortNotANumber,

    #[error("ERR Unbalanced 'xread' list of streams: for each stream key an ID or '$' must be specified.")]
    UnbalancedXRead,

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR DB index is out of range")]
    DbIndexOutOfRange,

    #[error("ERR invalid cursor")]
    InvalidCursor,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,

    #[error("ERR This Redis command is not allowed from script")]
    NotAllowedFromScript,

    #[error("ERR Number of keys can't be greater than number of args")]
    TooManyScriptKeys,

    #[error("ERR Number of keys can't be negative")]
    NegativeScriptKeys,

    #[error("ERR {0}")]
    Script(String),

    /// Error reply raised through `redis.call`, passed on unchanged
    #[error("{0}")]
    Raised(String),
}

pub type CommandResult<T> = Result<T, CommandError>;
