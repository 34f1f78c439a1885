//! Key commands (DEL, EXISTS, TYPE, KEYS, SCAN)

use super::{is_option, parse_count, parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use bytes::Bytes;

/// DEL command - Delete one or more keys
///
/// Syntax: DEL key [key ...]
pub struct DelCommand;

impl Command for DelCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let db = ctx.db();
        let deleted = args.iter().filter(|key| db.remove(key).is_some()).count();
        if deleted > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(deleted as i64))
    }

    fn name(&self) -> &'static str {
        "DEL"
    }

    fn min_args(&self) -> usize {
        1
    }
}

/// EXISTS command - Count how many of the given keys exist
///
/// Syntax: EXISTS key [key ...]
pub struct ExistsCommand;

impl Command for ExistsCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let db = ctx.db();
        let count = args.iter().filter(|key| db.exists(key)).count();
        Ok(RespValue::integer(count as i64))
    }

    fn name(&self) -> &'static str {
        "EXISTS"
    }

    fn min_args(&self) -> usize {
        1
    }
}

/// TYPE command - Collection kind stored at a key
///
/// Syntax: TYPE key
pub struct TypeCommand;

impl Command for TypeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let kind = ctx.db().kind(&args[0]);
        Ok(RespValue::simple_string(kind.map_or("none", |k| k.as_str())))
    }

    fn name(&self) -> &'static str {
        "TYPE"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// KEYS command - Find all keys matching a glob pattern
///
/// Syntax: KEYS pattern
///
/// Supported patterns:
/// - `*` any run of bytes, `?` any single byte
/// - `[abc]`, `[^abc]`, `[a-z]` byte classes
/// - `\x` matches `x` literally
pub struct KeysCommand;

impl Command for KeysCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let mut keys = ctx.db().keys();
        keys.retain(|key| glob_match(&args[0], key));
        keys.sort();
        Ok(RespValue::bulk_array(keys))
    }

    fn name(&self) -> &'static str {
        "KEYS"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// SCAN command - Incrementally iterate the key space
///
/// Syntax: SCAN cursor [MATCH pattern] [COUNT count]
///
/// The cursor is an offset into the sorted key list, so keys added or
/// removed between calls may be skipped or repeated, as the real server allows.
pub struct ScanCommand;

impl Command for ScanCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let cursor = parse_int(&args[0]).map_err(|_| CommandError::InvalidCursor)?;
        let cursor = usize::try_from(cursor).map_err(|_| CommandError::InvalidCursor)?;

        let mut pattern: Option<&Bytes> = None;
        let mut count = 10;
        let mut options = args[1..].iter();
        while let Some(option) = options.next() {
            let value = options.next().ok_or(CommandError::Syntax)?;
            if is_option(option, "MATCH") {
                pattern = Some(value);
            } else if is_option(option, "COUNT") {
                count = parse_count(value)?;
                if count == 0 {
                    return Err(CommandError::Syntax);
                }
            } else {
                return Err(CommandError::Syntax);
            }
        }

        let mut keys = ctx.db().keys();
        keys.sort();

        let end = cursor.saturating_add(count).min(keys.len());
        let next_cursor = if end >= keys.len() { 0 } else { end };
        let page: Vec<Bytes> = keys
            .get(cursor..end)
            .unwrap_or_default()
            .iter()
            .filter(|key| pattern.map_or(true, |p| glob_match(p, key)))
            .cloned()
            .collect();

        Ok(RespValue::array(vec![
            RespValue::bulk_string(next_cursor.to_string()),
            RespValue::bulk_array(page),
        ]))
    }

    fn name(&self) -> &'static str {
        "SCAN"
    }

    fn min_args(&self) -> usize {
        1
    }
}

/// Glob-style match of `text` against `pattern`, byte by byte
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'[', rest)) => {
            let Some((&byte, text_rest)) = text.split_first() else {
                return false;
            };
            match match_class(rest, byte) {
                Some((matched, after)) => matched && glob_match(after, text_rest),
                None => false,
            }
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((&literal, rest)) => text.first() == Some(&literal) && glob_match(rest, &text[1..]),
    }
}

/// Match `byte` against a `[...]` class whose body starts at `class`.
/// Returns whether it matched and the pattern after the closing bracket.
fn match_class(class: &[u8], byte: u8) -> Option<(bool, &[u8])> {
    let (negated, mut body) = match class.first() {
        Some(b'^') => (true, &class[1..]),
        _ => (false, class),
    };

    let mut matched = false;
    loop {
        match body {
            [] => return None,
            [b']', after @ ..] => return Some((matched != negated, after)),
            [b'\\', escaped, after @ ..] => {
                matched |= *escaped == byte;
                body = after;
            }
            [low, b'-', high, after @ ..] if *high != b']' => {
                let (low, high) = if low <= high { (*low, *high) } else { (*high, *low) };
                matched |= (low..=high).contains(&byte);
                body = after;
            }
            [single, after @ ..] => {
                matched |= *single == byte;
                body = after;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bulks, run, Fixture};
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"h*llo", b"heeeello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(glob_match(b"user:\\*", b"user:*"));
        assert!(!glob_match(b"user:\\*", b"user:1"));
        assert!(!glob_match(b"[abc", b"a"));
    }

    #[test]
    fn test_del_exists_type() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "a", "1"]);
        run(&mut ctx, &["RPUSH", "l", "x"]);

        assert_eq!(run(&mut ctx, &["EXISTS", "a", "l", "nope", "a"]), RespValue::integer(3));
        assert_eq!(run(&mut ctx, &["TYPE", "l"]), RespValue::simple_string("list"));
        assert_eq!(run(&mut ctx, &["TYPE", "nope"]), RespValue::simple_string("none"));
        assert_eq!(run(&mut ctx, &["DEL", "a", "nope"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["EXISTS", "a"]), RespValue::integer(0));
    }

    #[test]
    fn test_keys_pattern() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        for key in ["user:1", "user:2", "session:1"] {
            run(&mut ctx, &["SET", key, "v"]);
        }
        assert_eq!(run(&mut ctx, &["KEYS", "user:*"]), bulks(&["user:1", "user:2"]));
        assert_eq!(run(&mut ctx, &["KEYS", "*:1"]), bulks(&["session:1", "user:1"]));
    }

    #[test]
    fn test_scan_pages() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        for key in ["a", "b", "c"] {
            run(&mut ctx, &["SET", key, "v"]);
        }

        let first = run(&mut ctx, &["SCAN", "0", "COUNT", "2"]);
        assert_eq!(
            first,
            RespValue::array(vec![RespValue::bulk_string("2"), bulks(&["a", "b"])])
        );

        let last = run(&mut ctx, &["SCAN", "2", "COUNT", "2", "MATCH", "*"]);
        assert_eq!(
            last,
            RespValue::array(vec![RespValue::bulk_string("0"), bulks(&["c"])])
        );

        assert_eq!(
            run(&mut ctx, &["SCAN", "x"]),
            RespValue::error("ERR invalid cursor")
        );
        assert_eq!(
            run(&mut ctx, &["SCAN", "0", "COUNT"]),
            RespValue::error("ERR syntax error")
        );
    }
}
