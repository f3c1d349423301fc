//! Flags generated from field schemas, and their binding back into a
//! message and field mask.
//!
//! Setter flags are named after the dotted field path with dots and
//! underscores turned into dashes; the presence of a flag, not its value,
//! puts the path in the mask. Select flags are booleans named after the
//! readable top-level paths.

use std::collections::{BTreeMap, BTreeSet};

use clap::{Arg, ArgAction, ArgMatches};
use lwstack_core::fieldmask::{value, FieldMask};
use lwstack_core::registry::{Paging, SearchQuery};
use lwstack_core::schema::{flag_name, FieldKind, FieldSpec};
use serde_json::{json, Value};

use crate::error::CliError;

const SELECT_PREFIX: &str = "select:";

/// Long flag of a field. Identifier paths drop their `ids.` prefix.
pub fn field_flag(path: &str) -> String {
    flag_name(path.strip_prefix("ids.").unwrap_or(path))
}

fn value_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Eui => "EUI",
        FieldKind::DevAddr => "DEVADDR",
        FieldKind::Key => "KEY",
        FieldKind::Bytes => "BYTES",
        FieldKind::Timestamp => "TIME",
        FieldKind::Duration => "DURATION",
        FieldKind::StringMap => "KEY=VALUE,...",
        FieldKind::StringList | FieldKind::UintList => "LIST",
        FieldKind::Json => "JSON",
        FieldKind::Int | FieldKind::Uint | FieldKind::Float => "NUMBER",
        FieldKind::Enum(_) => "ENUM",
        FieldKind::MacVersion => "VERSION",
        FieldKind::Bool => "BOOL",
        FieldKind::String => "STRING",
    }
}

fn field_arg(field: &'static FieldSpec) -> Arg {
    let long = field_flag(field.path);
    let snake = long.replace('-', "_");
    let mut arg = Arg::new(field.path)
        .long(long.clone())
        .help(field.help)
        .value_name(value_name(field.kind))
        .help_heading("Fields");
    if snake != long {
        arg = arg.alias(snake);
    }
    match field.kind {
        FieldKind::Bool => arg
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true"),
        FieldKind::Int | FieldKind::Float => arg.allow_negative_numbers(true),
        _ => arg,
    }
}

/// Setter flags for every field.
pub fn field_args(fields: &'static [FieldSpec]) -> Vec<Arg> {
    fields.iter().map(field_arg).collect()
}

/// `--unset` with a comma separated list of paths or flag names.
pub fn unset_arg() -> Arg {
    Arg::new("unset")
        .long("unset")
        .value_name("PATHS")
        .value_delimiter(',')
        .action(ArgAction::Append)
        .help("paths to clear")
}

/// One boolean select flag per readable path, plus `--all`.
pub fn select_args(paths: &[&str]) -> Vec<Arg> {
    let mut seen = BTreeSet::new();
    let mut args: Vec<Arg> = paths
        .iter()
        .filter(|path| seen.insert(flag_name(path)))
        .map(|path| {
            Arg::new(format!("{}{}", SELECT_PREFIX, path))
                .long(flag_name(path))
                .action(ArgAction::SetTrue)
                .help(format!("select the {} field", path))
                .help_heading("Select")
        })
        .collect();
    args.push(
        Arg::new("all")
            .long("all")
            .action(ArgAction::SetTrue)
            .help("select all fields")
            .help_heading("Select"),
    );
    args
}

pub fn paging_args() -> Vec<Arg> {
    vec![
        Arg::new("limit")
            .long("limit")
            .value_parser(clap::value_parser!(u32))
            .help("maximum number of results per page"),
        Arg::new("page")
            .long("page")
            .value_parser(clap::value_parser!(u32))
            .help("page number, starting at 1"),
        Arg::new("order")
            .long("order")
            .help("field to order by, prefix with - for descending"),
    ]
}

pub fn search_args() -> Vec<Arg> {
    vec![
        Arg::new("query").long("query").help("free text query"),
        Arg::new("id_contains").long("id-contains"),
        Arg::new("name_contains").long("name-contains"),
        Arg::new("description_contains").long("description-contains"),
        Arg::new("attributes_contain")
            .long("attributes-contain")
            .value_name("KEY=VALUE")
            .action(ArgAction::Append),
    ]
}

/// A boolean flag that can be given as `--flag`, `--flag=true` or
/// `--flag=false`.
pub fn bool_arg(id: &'static str, default: bool) -> Arg {
    Arg::new(id)
        .long(id)
        .action(ArgAction::Set)
        .value_parser(clap::value_parser!(bool))
        .num_args(0..=1)
        .require_equals(true)
        .default_missing_value("true")
        .default_value(if default { "true" } else { "false" })
}

// Lookups tolerate ids the command does not define, so shared binders work
// across commands with different flag sets.

pub fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

pub fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .try_get_many::<String>(id)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

pub fn required(matches: &ArgMatches, id: &str) -> Result<String, CliError> {
    string(matches, id).ok_or_else(|| CliError::InvalidArgument(format!("`{}` is required", id)))
}

pub fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

pub fn number<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Option<T> {
    matches.try_get_one::<T>(id).ok().flatten().cloned()
}

/// Message and mask of the setter flags given on the command line.
pub fn bind_fields(matches: &ArgMatches, fields: &[FieldSpec]) -> Result<(Value, FieldMask), CliError> {
    let mut message = json!({});
    let mut mask = FieldMask::new();
    for field in fields {
        let Some(raw) = string(matches, field.path) else {
            continue;
        };
        value::set(&mut message, field.path, field.parse(&raw)?);
        mask.insert(field.path);
    }
    Ok((message, mask))
}

fn resolve_path(fields: &[FieldSpec], raw: &str) -> String {
    let raw = raw.trim();
    fields
        .iter()
        .find(|f| f.path == raw || field_flag(f.path) == raw || f.flag_name() == raw)
        .map(|f| f.path.to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Paths named by `--unset`.
pub fn unset_paths(matches: &ArgMatches, fields: &[FieldSpec]) -> FieldMask {
    strings(matches, "unset")
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| resolve_path(fields, raw))
        .collect()
}

/// Message and update mask: the set paths plus the unset paths. A path both
/// set and unset fails before anything is sent.
pub fn bind_update(matches: &ArgMatches, fields: &[FieldSpec]) -> Result<(Value, FieldMask), CliError> {
    let (message, mut mask) = bind_fields(matches, fields)?;
    let unset = unset_paths(matches, fields);
    mask.check_conflicts(&unset)?;
    mask.extend(unset.to_vec());
    Ok((message, mask))
}

/// Paths of the given select flags; `--all` selects every path.
pub fn selected_paths(matches: &ArgMatches, paths: &[&str]) -> FieldMask {
    if flag(matches, "all") {
        return paths.iter().copied().collect();
    }
    paths
        .iter()
        .copied()
        .filter(|path| flag(matches, &format!("{}{}", SELECT_PREFIX, path)))
        .collect()
}

pub fn paging(matches: &ArgMatches) -> Paging {
    Paging {
        order: string(matches, "order"),
        limit: number(matches, "limit"),
        page: number(matches, "page"),
        deleted: flag(matches, "deleted"),
    }
}

pub fn search_query(matches: &ArgMatches) -> Result<SearchQuery, CliError> {
    let mut attributes_contain = BTreeMap::new();
    for pair in strings(matches, "attributes_contain") {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument(format!("`{}` is not key=value", pair)))?;
        attributes_contain.insert(key.to_string(), value.to_string());
    }
    Ok(SearchQuery {
        query: string(matches, "query"),
        id_contains: string(matches, "id_contains"),
        name_contains: string(matches, "name_contains"),
        description_contains: string(matches, "description_contains"),
        attributes_contain,
    })
}
