//! Stream payload: entry ids and the append-only entry log

use super::sequenced_map::SequencedMap;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stream id validation failures, worded like the real server
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidId,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    ZeroId,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    Top,

    #[error("ERR The stream has exhausted the last possible ID, unable to add more items")]
    IdOverflow,

    #[error("ERR syntax error, LIMIT cannot be used without the special ~ option")]
    LimitWithoutApprox,
}

/// `<millis>-<seq>` entry identifier, ordered by millis then seq
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { millis: 0, seq: 0 };
    pub const MIN: StreamId = StreamId { millis: 0, seq: 1 };
    pub const MAX: StreamId = StreamId {
        millis: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(millis: u64, seq: u64) -> Self {
        StreamId { millis, seq }
    }

    /// Smallest id greater than `self`
    pub fn increment(&self) -> Result<StreamId, StreamError> {
        if self.seq < u64::MAX {
            Ok(StreamId::new(self.millis, self.seq + 1))
        } else if self.millis < u64::MAX {
            Ok(StreamId::new(self.millis + 1, 0))
        } else {
            Err(StreamError::IdOverflow)
        }
    }

    /// Greatest id smaller than `self`, `None` for 0-0
    pub fn decrement(&self) -> Option<StreamId> {
        if self.seq > 0 {
            Some(StreamId::new(self.millis, self.seq - 1))
        } else if self.millis > 0 {
            Some(StreamId::new(self.millis - 1, u64::MAX))
        } else {
            None
        }
    }

    /// XADD refuses 0-0 outright
    pub fn ensure_non_zero(self) -> Result<StreamId, StreamError> {
        if self == StreamId::ZERO {
            Err(StreamError::ZeroId)
        } else {
            Ok(self)
        }
    }

    /// Parse the start bound of a range: `-`, `(id` or a (possibly partial) id.
    pub fn parse_range_start(text: &str) -> Result<StreamId, StreamError> {
        match text {
            "-" => Ok(StreamId::ZERO),
            "+" => Ok(StreamId::MAX),
            _ => match text.strip_prefix('(') {
                Some(rest) => Self::parse_with_default_seq(rest, 0)?
                    .increment()
                    .map_err(|_| StreamError::InvalidId),
                None => Self::parse_with_default_seq(text, 0),
            },
        }
    }

    /// Parse the end bound of a range: `+`, `(id` or a (possibly partial) id.
    /// A bare millisecond value covers every sequence number of that millisecond.
    pub fn parse_range_end(text: &str) -> Result<StreamId, StreamError> {
        match text {
            "+" => Ok(StreamId::MAX),
            "-" => Ok(StreamId::ZERO),
            _ => match text.strip_prefix('(') {
                Some(rest) => Self::parse_with_default_seq(rest, u64::MAX)?
                    .decrement()
                    .ok_or(StreamError::InvalidId),
                None => Self::parse_with_default_seq(text, u64::MAX),
            },
        }
    }

    fn parse_with_default_seq(text: &str, default_seq: u64) -> Result<StreamId, StreamError> {
        match text.split_once('-') {
            Some((millis, seq)) => Ok(StreamId::new(parse_part(millis)?, parse_part(seq)?)),
            None => Ok(StreamId::new(parse_part(text)?, default_seq)),
        }
    }
}

/// One half of an id: plain decimal digits, no sign
fn parse_part(part: &str) -> Result<u64, StreamError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StreamError::InvalidId);
    }
    part.parse().map_err(|_| StreamError::InvalidId)
}

impl FromStr for StreamId {
    type Err = StreamError;

    /// Accepts `ms` (sequence 0) or `ms-seq`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default_seq(s, 0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// Field/value pairs of one stream entry, in the order they were given
pub type StreamFields = SequencedMap<Bytes, Bytes>;

/// Append-only log of entries with strictly increasing ids
#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: SequencedMap<StreamId, StreamFields>,
    last_id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Greatest id ever added, even if that entry was deleted since
    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Turn the id argument of XADD into a concrete id: `*`, `<ms>-*` or an explicit id.
    pub fn resolve_id(&self, text: &str, now_millis: u64) -> Result<StreamId, StreamError> {
        if text == "*" {
            return self.next_auto_id(now_millis);
        }

        let Some(millis) = text.strip_suffix("-*") else {
            return text.parse();
        };
        let millis = parse_part(millis)?;

        if millis == self.last_id.millis {
            if self.last_id.seq == u64::MAX {
                return Err(StreamError::Top);
            }
            Ok(StreamId::new(millis, self.last_id.seq + 1))
        } else if millis > self.last_id.millis {
            Ok(StreamId::new(millis, if millis == 0 { 1 } else { 0 }))
        } else {
            Err(StreamError::Top)
        }
    }

    /// Id generated for `*`: the later of the clock and the last id's millis
    pub fn next_auto_id(&self, now_millis: u64) -> Result<StreamId, StreamError> {
        if now_millis > self.last_id.millis {
            Ok(StreamId::new(now_millis, 0))
        } else {
            self.last_id.increment()
        }
    }

    /// Check that `id` may be appended without touching the stream.
    pub fn validate_new_id(&self, id: StreamId) -> Result<StreamId, StreamError> {
        let id = id.ensure_non_zero()?;
        if id <= self.last_id {
            return Err(StreamError::Top);
        }
        Ok(id)
    }

    pub fn add(&mut self, id: StreamId, fields: StreamFields) -> Result<StreamId, StreamError> {
        let id = self.validate_new_id(id)?;
        self.entries
            .append(id, fields)
            .map_err(|_| StreamError::Top)?;
        self.last_id = id;
        Ok(id)
    }

    /// Delete the given ids, returning how many existed
    pub fn delete(&mut self, ids: &[StreamId]) -> usize {
        ids.iter()
            .filter(|id| self.entries.remove(id).is_some())
            .count()
    }

    /// Evict the oldest entries until at most `max_len` remain.
    /// At most `limit` entries are evicted when a limit is given.
    pub fn trim_len(&mut self, max_len: usize, limit: Option<usize>) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_len && limit.map_or(true, |l| evicted < l) {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Evict the oldest entries whose id is below `min_id`.
    pub fn trim_min_id(&mut self, min_id: StreamId, limit: Option<usize>) -> usize {
        let mut evicted = 0;
        while self.entries.head().is_some_and(|head| *head < min_id)
            && limit.map_or(true, |l| evicted < l)
        {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Entries with `start <= id <= end` in ascending order
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> Vec<(StreamId, &StreamFields)> {
        let mut out = Vec::new();
        if start > end || count == Some(0) {
            return out;
        }

        let mut cursor = self.entries.cursor();
        cursor.find_first_suitable(&self.entries, &start);
        while let Some((id, fields)) = cursor.next(&self.entries) {
            if *id > end || count.is_some_and(|c| out.len() >= c) {
                break;
            }
            out.push((*id, fields));
        }
        out
    }

    /// Entries with `start <= id <= end` in descending order
    pub fn rev_range(
        &self,
        end: StreamId,
        start: StreamId,
        count: Option<usize>,
    ) -> Vec<(StreamId, &StreamFields)> {
        let mut out = Vec::new();
        if start > end || count == Some(0) {
            return out;
        }

        let mut cursor = self.entries.reverse_cursor();
        cursor.find_first_suitable(&self.entries, &end);
        while let Some((id, fields)) = cursor.next(&self.entries) {
            if *id < start || count.is_some_and(|c| out.len() >= c) {
                break;
            }
            out.push((*id, fields));
        }
        out
    }

    /// Entries strictly after `after`, as XREAD sees them
    pub fn read_after(&self, after: StreamId, count: Option<usize>) -> Vec<(StreamId, &StreamFields)> {
        match after.increment() {
            Ok(start) => self.range(start, StreamId::MAX, count),
            Err(_) => Vec::new(),
        }
    }

    /// True once an entry newer than `baseline` exists
    pub fn has_entries_after(&self, baseline: StreamId) -> bool {
        self.entries.tail().is_some_and(|tail| *tail > baseline)
    }
}
