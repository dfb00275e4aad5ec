// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Table-driven environment overlay.
//!
//! Every configuration record lists its settable fields as [`Field`]s. The
//! variable name is the upper-cased field name behind the record's prefix, so
//! `completes` on the jobs-pi record is read from
//! `K8S_TESTER_ADD_ON_JOBS_PI_COMPLETES`.

use super::AddOnConfig;
use crate::error::{Result, TesterError};
use std::collections::BTreeMap;
use std::time::Duration;

/// Map fields that accept a JSON object
const JSON_MAP_FIELDS: &[&str] = &["node_selector", "deployment_node_selector", "tags"];

/// Source of variable values, `std::env::var` outside of tests.
pub type Lookup<'l> = &'l dyn Fn(&str) -> Option<String>;

type RecordBinder<'a> = Box<dyn FnMut(&str, Lookup<'_>) -> Result<usize> + 'a>;

/// A record whose fields can be overridden from the environment.
pub trait EnvBinding {
    fn env_fields(&mut self) -> Vec<Field<'_>>;
}

pub enum Target<'a> {
    String(&'a mut String),
    Bool(&'a mut bool),
    I32(&'a mut i32),
    U32(&'a mut u32),
    U64(&'a mut u64),
    Usize(&'a mut usize),
    F32(&'a mut f32),
    Duration(&'a mut Duration),
    List(&'a mut Vec<String>),
    Map(&'a mut BTreeMap<String, String>),
    /// Nested record bound under `<KEY>_`
    Record(RecordBinder<'a>),
}

pub struct Field<'a> {
    pub name: &'static str,
    pub read_only: bool,
    pub target: Target<'a>,
}

impl<'a> Field<'a> {
    fn new(name: &'static str, target: Target<'a>) -> Self {
        Self {
            name,
            read_only: false,
            target,
        }
    }

    pub fn string(name: &'static str, value: &'a mut String) -> Self {
        Self::new(name, Target::String(value))
    }

    pub fn bool(name: &'static str, value: &'a mut bool) -> Self {
        Self::new(name, Target::Bool(value))
    }

    pub fn i32(name: &'static str, value: &'a mut i32) -> Self {
        Self::new(name, Target::I32(value))
    }

    pub fn u32(name: &'static str, value: &'a mut u32) -> Self {
        Self::new(name, Target::U32(value))
    }

    pub fn u64(name: &'static str, value: &'a mut u64) -> Self {
        Self::new(name, Target::U64(value))
    }

    pub fn usize(name: &'static str, value: &'a mut usize) -> Self {
        Self::new(name, Target::Usize(value))
    }

    pub fn f32(name: &'static str, value: &'a mut f32) -> Self {
        Self::new(name, Target::F32(value))
    }

    pub fn duration(name: &'static str, value: &'a mut Duration) -> Self {
        Self::new(name, Target::Duration(value))
    }

    pub fn list(name: &'static str, value: &'a mut Vec<String>) -> Self {
        Self::new(name, Target::List(value))
    }

    pub fn map(name: &'static str, value: &'a mut BTreeMap<String, String>) -> Self {
        Self::new(name, Target::Map(value))
    }

    /// Optional nested record. It is only instantiated when one of its
    /// variables is set.
    pub fn record<T>(name: &'static str, slot: &'a mut Option<T>) -> Self
    where
        T: EnvBinding + Default,
    {
        Self::new(
            name,
            Target::Record(Box::new(move |key: &str, lookup: Lookup<'_>| {
                bind_slot(&mut *slot, key, lookup, T::default)
            })),
        )
    }

    /// Always-present nested record bound under `<KEY>_`.
    pub fn nested(name: &'static str, binding: &'a mut dyn EnvBinding) -> Self {
        Self::new(
            name,
            Target::Record(Box::new(move |key: &str, lookup: Lookup<'_>| {
                apply_env(&format!("{key}_"), &mut *binding, lookup)
            })),
        )
    }

    /// Add-on record. Setting `<KEY>` itself toggles `enable`, instantiating
    /// the record with its defaults when absent.
    pub fn add_on<T>(name: &'static str, slot: &'a mut Option<T>) -> Self
    where
        T: AddOnConfig,
    {
        Self::add_on_with(name, slot, T::default)
    }

    /// Like [`Field::add_on`] with a custom constructor for absent records.
    pub fn add_on_with<T>(name: &'static str, slot: &'a mut Option<T>, make: fn() -> T) -> Self
    where
        T: AddOnConfig,
    {
        Self::new(
            name,
            Target::Record(Box::new(move |key: &str, lookup: Lookup<'_>| {
                let mut set = 0;
                if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                    let enabled = parse_bool(key, &value)?;
                    slot.get_or_insert_with(make).set_enabled(enabled);
                    set += 1;
                }
                Ok(set + bind_slot(&mut *slot, key, lookup, make)?)
            })),
        )
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

fn bind_slot<T>(slot: &mut Option<T>, key: &str, lookup: Lookup<'_>, make: fn() -> T) -> Result<usize>
where
    T: EnvBinding,
{
    let prefix = format!("{key}_");
    if let Some(record) = slot.as_mut() {
        return apply_env(&prefix, record, lookup);
    }
    let mut record = make();
    let set = apply_env(&prefix, &mut record, lookup)?;
    if set > 0 {
        *slot = Some(record);
    }
    Ok(set)
}

/// Apply every variable under `prefix` to `binding`, returning how many were set.
///
/// Empty values count as unset. Writing a read-only field is an error naming
/// the variable.
pub fn apply_env(prefix: &str, binding: &mut dyn EnvBinding, lookup: Lookup<'_>) -> Result<usize> {
    let mut set = 0;
    for field in binding.env_fields() {
        let key = format!("{prefix}{}", field.name.to_uppercase());

        if let Target::Record(mut bind) = field.target {
            set += bind(&key, lookup)?;
            continue;
        }

        let Some(value) = lookup(&key).filter(|v| !v.is_empty()) else {
            continue;
        };
        if field.read_only {
            return Err(TesterError::ReadOnlyField { key, value });
        }
        assign(field.name, field.target, &key, &value)?;
        set += 1;
    }
    Ok(set)
}

fn assign(name: &str, target: Target<'_>, key: &str, value: &str) -> Result<()> {
    match target {
        Target::String(v) => *v = value.to_string(),
        Target::Bool(v) => *v = parse_bool(key, value)?,
        Target::I32(v) => *v = value.parse().map_err(|e| parse_error(key, value, e))?,
        Target::U32(v) => *v = value.parse().map_err(|e| parse_error(key, value, e))?,
        Target::U64(v) => *v = value.parse().map_err(|e| parse_error(key, value, e))?,
        Target::Usize(v) => *v = value.parse().map_err(|e| parse_error(key, value, e))?,
        Target::F32(v) => *v = value.parse().map_err(|e| parse_error(key, value, e))?,
        Target::Duration(v) => *v = humantime::parse_duration(value).map_err(|e| parse_error(key, value, e))?,
        Target::List(v) => *v = value.split(',').map(str::to_string).collect(),
        Target::Map(v) => {
            if !JSON_MAP_FIELDS.contains(&name) {
                return Err(parse_error(key, value, format!("field {name:?} is not supported as a map")));
            }
            *v = serde_json::from_str(value).map_err(|e| parse_error(key, value, e))?;
        }
        Target::Record(_) => {}
    }
    Ok(())
}

/// Accepts `1 t T TRUE true True` and the matching false spellings.
pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(parse_error(key, value, "invalid boolean")),
    }
}

fn parse_error(key: &str, value: &str, reason: impl ToString) -> TesterError {
    TesterError::EnvParse {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
