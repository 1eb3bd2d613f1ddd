//! In-process store with the same command semantics as the remote one.
//!
//! Used by tests (several clients can share one `Arc<MemoryStore>`) and for
//! offline runs. Supports failure injection per command verb.

use super::StoreClient;
use crate::error::StoreError;
use chat_protocol::{Command, Verb};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Keyspace {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    strings: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Counters {
    calls: HashMap<Verb, usize>,
    pending_failures: HashMap<Verb, usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    counters: Mutex<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` commands with this verb fail with a transport error.
    pub fn fail_next(&self, verb: Verb, times: usize) {
        let mut counters = lock(&self.counters);
        *counters.pending_failures.entry(verb).or_insert(0) += times;
    }

    /// Number of commands with this verb seen so far, including failed ones.
    pub fn calls(&self, verb: Verb) -> usize {
        lock(&self.counters).calls.get(&verb).copied().unwrap_or(0)
    }

    fn take_failure(&self, verb: Verb) -> bool {
        let mut counters = lock(&self.counters);
        *counters.calls.entry(verb).or_insert(0) += 1;
        match counters.pending_failures.get_mut(&verb) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl StoreClient for MemoryStore {
    fn execute(&self, command: &Command) -> Result<Value, StoreError> {
        if self.take_failure(command.verb()) {
            return Err(StoreError::Transport {
                command: command.name().to_string(),
                details: "injected failure".to_string(),
            });
        }

        let mut keyspace = lock(&self.keyspace);
        apply(&mut keyspace, command).map_err(|message| StoreError::Rejected {
            command: command.name().to_string(),
            message,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn apply(keyspace: &mut Keyspace, command: &Command) -> Result<Value, String> {
    let args = command.args();
    match command.verb() {
        Verb::Lpush => {
            let (key, values) = split_key(args, 2)?;
            let list = keyspace.lists.entry(key.to_string()).or_default();
            for value in values {
                list.push_front(value.clone());
            }
            Ok(json!(list.len()))
        }
        Verb::Lrange => {
            expect_arity(args, 3)?;
            let start = parse_index(&args[1])?;
            let stop = parse_index(&args[2])?;
            let items = keyspace
                .lists
                .get(&args[0])
                .map(|list| range(list, start, stop))
                .unwrap_or_default();
            Ok(json!(items))
        }
        Verb::Llen => {
            expect_arity(args, 1)?;
            Ok(json!(keyspace.lists.get(&args[0]).map_or(0, VecDeque::len)))
        }
        Verb::Sadd => {
            let (key, members) = split_key(args, 2)?;
            let set = keyspace.sets.entry(key.to_string()).or_default();
            let added = members
                .iter()
                .filter(|member| set.insert((*member).clone()))
                .count();
            Ok(json!(added))
        }
        Verb::Smembers => {
            expect_arity(args, 1)?;
            let members: Vec<&String> = keyspace
                .sets
                .get(&args[0])
                .map(|set| set.iter().collect())
                .unwrap_or_default();
            Ok(json!(members))
        }
        Verb::Zadd => {
            expect_arity(args, 3)?;
            let score = parse_score(&args[1])?;
            let zset = keyspace.zsets.entry(args[0].clone()).or_default();
            let added = zset.insert(args[2].clone(), score).is_none();
            Ok(json!(usize::from(added)))
        }
        Verb::Zremrangebyscore => {
            expect_arity(args, 3)?;
            let min = parse_bound(&args[1])?;
            let max = parse_bound(&args[2])?;
            let Some(zset) = keyspace.zsets.get_mut(&args[0]) else {
                return Ok(json!(0));
            };
            let before = zset.len();
            zset.retain(|_, score| !(min.admits_from_below(*score) && max.admits_from_above(*score)));
            Ok(json!(before - zset.len()))
        }
        Verb::Zcard => {
            expect_arity(args, 1)?;
            Ok(json!(keyspace.zsets.get(&args[0]).map_or(0, HashMap::len)))
        }
        Verb::Get => {
            expect_arity(args, 1)?;
            Ok(keyspace
                .strings
                .get(&args[0])
                .map_or(Value::Null, |value| json!(value)))
        }
        Verb::Set => {
            expect_arity(args, 2)?;
            keyspace.strings.insert(args[0].clone(), args[1].clone());
            Ok(json!("OK"))
        }
        Verb::Del => {
            if args.is_empty() {
                return Err(wrong_arity());
            }
            let removed = args
                .iter()
                .filter(|key| {
                    let list = keyspace.lists.remove(key.as_str()).is_some();
                    let set = keyspace.sets.remove(key.as_str()).is_some();
                    let zset = keyspace.zsets.remove(key.as_str()).is_some();
                    let string = keyspace.strings.remove(key.as_str()).is_some();
                    list || set || zset || string
                })
                .count();
            Ok(json!(removed))
        }
    }
}

fn wrong_arity() -> String {
    "ERR wrong number of arguments".to_string()
}

fn expect_arity(args: &[String], count: usize) -> Result<(), String> {
    if args.len() == count {
        Ok(())
    } else {
        Err(wrong_arity())
    }
}

fn split_key(args: &[String], min: usize) -> Result<(&str, &[String]), String> {
    if args.len() < min {
        return Err(wrong_arity());
    }
    Ok((args[0].as_str(), &args[1..]))
}

fn parse_index(raw: &str) -> Result<i64, String> {
    raw.parse::<i64>()
        .map_err(|_| "ERR value is not an integer or out of range".to_string())
}

fn parse_score(raw: &str) -> Result<f64, String> {
    match raw {
        "-inf" => Ok(f64::NEG_INFINITY),
        "+inf" | "inf" => Ok(f64::INFINITY),
        _ => raw
            .parse::<f64>()
            .map_err(|_| "ERR value is not a valid float".to_string()),
    }
}

/// Inclusive LRANGE with negative indices counted from the tail.
fn range(list: &VecDeque<String>, start: i64, stop: i64) -> Vec<String> {
    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return Vec::new();
    }
    list.iter()
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ScoreBound {
    value: f64,
    exclusive: bool,
}

impl ScoreBound {
    fn admits_from_below(self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_from_above(self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

fn parse_bound(raw: &str) -> Result<ScoreBound, String> {
    match raw.strip_prefix('(') {
        Some(rest) => Ok(ScoreBound {
            value: parse_score(rest)?,
            exclusive: true,
        }),
        None => Ok(ScoreBound {
            value: parse_score(raw)?,
            exclusive: false,
        }),
    }
}
