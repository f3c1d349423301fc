//! End device commands.
//!
//! `create` and `set` run once with the flags, or once per JSON document on
//! stdin when stdin is not a terminal, with the flags applied on top of
//! each document.

use std::io::IsTerminal;
use std::path::Path;

use base64::Engine;
use clap::ArgMatches;
use lwstack_core::devices::downlink::{self, Downlink};
use lwstack_core::devices::{self, relay, templates, CreateOptions, UpdateOptions};
use lwstack_core::fieldmask::{top_level, value, FieldMask};
use lwstack_core::ids::EndDeviceIds;
use lwstack_core::io::{read_documents, JsonDecoder};
use lwstack_core::lorawan::Eui64;
use lwstack_core::schema::entities::END_DEVICE_FIELDS;
use lwstack_core::schema::parse_bytes;
use serde_json::{json, Value};
use tokio::io::Stdin;
use tracing::{debug, info};

use crate::commands::entities::subcommand;
use crate::context::Context;
use crate::error::CliError;
use crate::tree::end_devices::readable_paths;
use crate::tree::flags::{
    bind_fields, bind_update, flag, number, paging, required, search_query, selected_paths, string, strings,
};

pub async fn run_end_devices(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    match verb {
        "create" => run_create(ctx, m).await,
        "get" => run_get(ctx, m).await,
        "list" => run_list(ctx, m).await,
        "search" => run_search(ctx, m).await,
        "set" => run_set(ctx, m).await,
        "delete" => run_delete(ctx, m).await,
        "batch-delete" => run_batch_delete(ctx, m).await,
        "reset" => run_reset(ctx, m).await,
        "claim" => run_claim(ctx, m).await,
        "generate-qr" => run_generate_qr(ctx, m).await,
        "list-qr-formats" => {
            let client = ctx.client()?;
            ctx.output.print_list(&templates::list_qr_formats(&client).await?)
        }
        "templates" => run_templates(ctx, m).await,
        "downlink" => run_downlink(ctx, m).await,
        "relay" => run_relay(ctx, m).await,
        other => Err(CliError::InvalidArgument(format!("unknown end-devices command `{}`", other))),
    }
}

fn device_ids(m: &ArgMatches) -> Result<EndDeviceIds, CliError> {
    Ok(EndDeviceIds::new(
        required(m, "application_id")?,
        required(m, "device_id")?,
    ))
}

/// JSON documents on stdin, when stdin is not a terminal.
fn stdin_documents() -> Option<JsonDecoder<Stdin>> {
    if std::io::stdin().is_terminal() {
        return None;
    }
    debug!("reading end devices from stdin");
    Some(JsonDecoder::new(tokio::io::stdin()))
}

/// The next document to process. Without input, a single empty document.
async fn next_document(
    input: &mut Option<JsonDecoder<Stdin>>,
    processed: usize,
    ctx: &Context,
) -> Result<Option<Value>, CliError> {
    let document = match input.as_mut() {
        Some(decoder) => decoder.next(&ctx.cancel).await?,
        None => None,
    };
    Ok(match document {
        Some(document) => Some(document),
        None if processed == 0 => Some(json!({})),
        None => None,
    })
}

/// Overlay the flag values and positional identifiers on a document.
fn device_from(mut document: Value, flags: &Value, mask: &FieldMask, m: &ArgMatches) -> Result<Value, CliError> {
    if !document.is_object() {
        return Err(CliError::InvalidArgument("end devices must be JSON objects".to_string()));
    }
    value::copy_paths(&mut document, flags, mask.iter());
    if let Some(application_id) = string(m, "application_id") {
        value::set(&mut document, "ids.application_ids.application_id", json!(application_id));
    }
    if let Some(device_id) = string(m, "device_id") {
        value::set(&mut document, "ids.device_id", json!(device_id));
    }
    Ok(document)
}

/// Settable paths present in a document.
fn document_paths(document: &Value) -> FieldMask {
    let mut mask: FieldMask = END_DEVICE_FIELDS
        .iter()
        .filter(|f| !f.path.starts_with("ids.") && value::has(document, f.path))
        .map(|f| f.path)
        .collect();
    for path in value::top_level_paths(document) {
        let covered = mask.iter().any(|p| top_level(p) == path);
        if !covered && !matches!(path.as_str(), "ids" | "created_at" | "updated_at" | "picture") {
            mask.insert(path);
        }
    }
    mask
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// An embedded picture from `--picture-local-file`.
async fn picture(m: &ArgMatches) -> Result<Option<Value>, CliError> {
    let Some(path) = string(m, "picture_local_file") else {
        return Ok(None);
    };
    let path = Path::new(&path);
    let data = tokio::fs::read(path).await?;
    Ok(Some(json!({
        "embedded": {
            "mime_type": mime_type(path),
            "data": base64::engine::general_purpose::STANDARD.encode(data),
        }
    })))
}

/// Authentication codes may be given as `hex:`.
fn claim_code(raw: &str) -> String {
    match raw.strip_prefix("hex:") {
        Some(hex) => hex.to_ascii_uppercase(),
        None => raw.to_string(),
    }
}

fn create_options(m: &ArgMatches, device: &Value) -> CreateOptions {
    CreateOptions {
        abp: flag(m, "abp"),
        multicast: device.get("multicast").and_then(Value::as_bool).unwrap_or(false),
        defaults: flag(m, "defaults"),
        with_session: flag(m, "with_session"),
        with_root_keys: flag(m, "with_root_keys"),
        request_dev_eui: flag(m, "request_dev_eui"),
        claim_authentication_code: string(m, "with_claim_authentication_code").map(|c| claim_code(&c)),
    }
}

async fn run_create(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let (flags, mask) = bind_fields(m, END_DEVICE_FIELDS)?;
    let picture = picture(m).await?;
    let client = ctx.client()?;

    let mut input = stdin_documents();
    let mut created = 0;
    while let Some(document) = next_document(&mut input, created, ctx).await? {
        let mut device = device_from(document, &flags, &mask, m)?;
        if let Some(picture) = &picture {
            device["picture"] = picture.clone();
        }
        let opts = create_options(m, &device);
        let device = devices::create(&client, device, &opts).await?;
        ctx.output.print(&device)?;
        created += 1;
    }
    info!(count = created, "created end devices");
    Ok(())
}

async fn run_set(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    // Conflicting paths fail here, before a client exists.
    let (flags, mask) = bind_update(m, END_DEVICE_FIELDS)?;
    let picture = picture(m).await?;
    let opts = UpdateOptions { touch: flag(m, "touch") };
    let client = ctx.client()?;

    let mut input = stdin_documents();
    let mut updated = 0;
    while let Some(document) = next_document(&mut input, updated, ctx).await? {
        let mut paths = document_paths(&document);
        paths.extend(mask.to_vec());
        let mut device = device_from(document, &flags, &mask, m)?;
        if let Some(picture) = &picture {
            device["picture"] = picture.clone();
        }
        let device = devices::update(&client, device, &paths, &opts).await?;
        ctx.output.print(&device)?;
        updated += 1;
    }
    Ok(())
}

async fn run_get(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let ids = device_ids(m)?;
    let mask = selected_paths(m, &readable_paths());
    let client = ctx.client()?;
    ctx.output.print(&devices::get(&client, &ids, &mask).await?)
}

async fn run_list(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let application_id = required(m, "application_id")?;
    let mask = selected_paths(m, &readable_paths());
    let client = ctx.client()?;
    let found = devices::list(&client, &application_id, &mask, &paging(m)).await?;
    ctx.output.print_list(&found)
}

async fn run_search(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let application_id = required(m, "application_id")?;
    let mask = selected_paths(m, &readable_paths());
    let query = search_query(m)?;
    let client = ctx.client()?;
    let found = devices::search(&client, &application_id, &query, &mask, &paging(m)).await?;
    ctx.output.print_list(&found)
}

async fn run_delete(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let ids = device_ids(m)?;
    let client = ctx.client()?;
    devices::delete(&client, &ids).await?;
    info!(device_id = ids.device_id.as_str(), "deleted end device");
    Ok(())
}

async fn run_batch_delete(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let application_id = required(m, "application_id")?;
    let device_ids = strings(m, "device_ids");
    let client = ctx.client()?;
    devices::batch_delete(&client, &application_id, &device_ids).await?;
    info!(count = device_ids.len(), "deleted end devices");
    Ok(())
}

async fn run_reset(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let ids = device_ids(m)?;
    let client = ctx.client()?;
    ctx.output.print(&devices::reset(&client, &ids).await?)
}

async fn run_claim(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let mut ids = device_ids(m)?;
    let code = claim_code(&required(m, "authentication_code")?);
    if let Some(dev_eui) = string(m, "dev_eui") {
        ids.dev_eui = Some(dev_eui.parse::<Eui64>()?);
    }
    if let Some(join_eui) = string(m, "join_eui") {
        ids.join_eui = Some(join_eui.parse::<Eui64>()?);
    }
    let client = ctx.client()?;
    if !ids.has_euis() {
        let stored = devices::get(&client, &ids, &FieldMask::new()).await?;
        let stored = EndDeviceIds::from_device(&stored)?;
        ids.dev_eui = ids.dev_eui.or(stored.dev_eui);
        ids.join_eui = ids.join_eui.or(stored.join_eui);
    }
    devices::claim(&client, &ids, &code).await?;
    Ok(())
}

async fn run_generate_qr(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let ids = device_ids(m)?;
    let format_id = required(m, "format_id")?;
    let client = ctx.client()?;
    let mask: FieldMask = ["claim_authentication_code", "version_ids"].into_iter().collect();
    let device = devices::get(&client, &ids, &mask).await?;
    let qr = templates::generate_qr(&client, &format_id, &device, number(m, "size")).await?;
    ctx.output.print(&qr)
}

async fn run_templates(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    match verb {
        "list-formats" => {
            let client = ctx.client()?;
            ctx.output.print(&templates::list_formats(&client).await?)
        }
        "from-data" => {
            let format_id = required(m, "format_id")?;
            let data = tokio::fs::read(required(m, "local_file")?).await?;
            let mappings = match string(m, "mapping_local_file") {
                Some(path) => read_documents(Path::new(&path), &ctx.cancel).await?,
                None => Vec::new(),
            };
            let client = ctx.client()?;
            let converted = templates::from_data(&client, &format_id, &data, &mappings).await?;
            ctx.output.print_list(&converted)
        }
        other => Err(CliError::InvalidArgument(format!("unknown templates command `{}`", other))),
    }
}

fn queued_downlink(m: &ArgMatches) -> Result<Downlink, CliError> {
    let payload = match string(m, "frm_payload") {
        Some(raw) => parse_bytes(&raw).map_err(|e| CliError::InvalidArgument(format!("--frm-payload: {}", e)))?,
        None => Vec::new(),
    };
    let mut downlink = Downlink::new(number(m, "f_port").unwrap_or(0), &payload);
    downlink.confirmed = flag(m, "confirmed");
    downlink.priority = string(m, "priority").map(|p| p.to_ascii_uppercase());
    Ok(downlink)
}

async fn run_downlink(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    let ids = device_ids(m)?;
    match verb {
        "push" | "replace" => {
            let queued = [queued_downlink(m)?];
            let client = ctx.client()?;
            if verb == "push" {
                downlink::push(&client, &ids, &queued).await?;
            } else {
                downlink::replace(&client, &ids, &queued).await?;
            }
            info!(f_port = queued[0].f_port, "queued downlink");
            Ok(())
        }
        "list" => {
            let client = ctx.client()?;
            ctx.output.print_list(&downlink::list(&client, &ids).await?)
        }
        "clear" => {
            let client = ctx.client()?;
            downlink::clear(&client, &ids).await?;
            info!("cleared downlink queue");
            Ok(())
        }
        other => Err(CliError::InvalidArgument(format!("unknown downlink command `{}`", other))),
    }
}

fn json_flag(m: &ArgMatches, id: &str) -> Result<Option<Value>, CliError> {
    string(m, id)
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| CliError::InvalidArgument(format!("--{}: {}", id, e)))
        })
        .transpose()
}

/// Relay settings and the paths they set.
fn relay_settings(m: &ArgMatches) -> Result<(Value, FieldMask), CliError> {
    let mut settings = json!({});
    let mut mask = FieldMask::new();
    for mode in ["serving", "served"] {
        if let Some(v) = json_flag(m, mode)? {
            settings[mode] = v;
            mask.insert(format!("settings.{}", mode));
        }
    }
    Ok((settings, mask))
}

async fn run_relay(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    if verb == "uplink-forwarding-rule" {
        return run_forwarding_rule(ctx, m).await;
    }
    let ids = device_ids(m)?;
    match verb {
        "create" => {
            let (settings, _) = relay_settings(m)?;
            let client = ctx.client()?;
            ctx.output.print(&relay::create(&client, &ids, settings).await?)
        }
        "get" => {
            let mask = selected_paths(m, &["settings"]);
            let client = ctx.client()?;
            ctx.output.print(&relay::get(&client, &ids, &mask).await?)
        }
        "set" => {
            let (settings, mask) = relay_settings(m)?;
            let client = ctx.client()?;
            ctx.output.print(&relay::update(&client, &ids, settings, &mask).await?)
        }
        "delete" => {
            let client = ctx.client()?;
            relay::delete(&client, &ids).await?;
            info!(device_id = ids.device_id.as_str(), "removed relay configuration");
            Ok(())
        }
        other => Err(CliError::InvalidArgument(format!("unknown relay command `{}`", other))),
    }
}

async fn run_forwarding_rule(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    let ids = device_ids(m)?;
    let index: u32 = number(m, "index").unwrap_or(0);
    let client = ctx.client()?;
    match verb {
        "add" => {
            let rule = json_flag(m, "rule")?.unwrap_or_else(|| json!({}));
            ctx.output
                .print(&relay::add_forwarding_rule(&client, &ids, index, rule).await?)
        }
        "delete" => {
            relay::delete_forwarding_rule(&client, &ids, index).await?;
            info!(index, "deleted forwarding rule");
            Ok(())
        }
        other => Err(CliError::InvalidArgument(format!(
            "unknown uplink-forwarding-rule command `{}`",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::end_devices;

    fn matches_of(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["end-devices"];
        argv.extend_from_slice(args);
        end_devices::command().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_documents() {
        let matches = matches_of(&["create", "app1", "dev1", "--name=flagged", "--abp", "--with-session"]);
        let (_, m) = matches.subcommand().unwrap();
        let (flags, mask) = bind_fields(m, END_DEVICE_FIELDS).unwrap();
        let device = device_from(
            json!({"name": "document", "description": "kept", "ids": {"device_id": "other"}}),
            &flags,
            &mask,
            m,
        )
        .unwrap();
        assert_eq!(device["name"], "flagged");
        assert_eq!(device["description"], "kept");
        assert_eq!(device["ids"]["device_id"], "dev1");
        assert_eq!(device["ids"]["application_ids"]["application_id"], "app1");

        let opts = create_options(m, &device);
        assert!(opts.abp && opts.with_session && opts.defaults);
        assert!(!opts.supports_join());
    }

    #[test]
    fn test_claim_code_and_multicast() {
        let matches = matches_of(&[
            "create",
            "app1",
            "dev1",
            "--multicast",
            "--defaults=false",
            "--with-claim-authentication-code=hex:aabbccdd",
        ]);
        let (_, m) = matches.subcommand().unwrap();
        let (flags, mask) = bind_fields(m, END_DEVICE_FIELDS).unwrap();
        let device = device_from(json!({}), &flags, &mask, m).unwrap();
        let opts = create_options(m, &device);
        assert!(opts.multicast);
        assert!(!opts.defaults);
        assert_eq!(opts.claim_authentication_code.as_deref(), Some("AABBCCDD"));
    }

    #[test]
    fn test_document_paths() {
        let mask = document_paths(&json!({
            "ids": {"device_id": "dev1"},
            "name": "x",
            "mac_settings": {"rx2_frequency": 869525000},
            "lora_alliance_profile_ids": {"vendor_id": 1}
        }));
        assert_eq!(
            mask.to_vec(),
            vec!["lora_alliance_profile_ids", "mac_settings.rx2_frequency", "name"]
        );
    }

    #[test]
    fn test_set_conflict_is_detected_before_any_call() {
        let matches = matches_of(&["set", "app1", "dev1", "--frequency-plan-id=EU_863_870", "--unset=frequency-plan-id"]);
        let (_, m) = matches.subcommand().unwrap();
        let err = bind_update(m, END_DEVICE_FIELDS).unwrap_err().to_api_error();
        assert_eq!(err.name, "conflicting_paths");
    }

    #[test]
    fn test_mime_type_from_extension() {
        assert_eq!(mime_type(Path::new("dev.PNG")), "image/png");
        assert_eq!(mime_type(Path::new("dev")), "application/octet-stream");
    }
}
