//! `lorawan decode` and `lorawan encode`.

use std::io::IsTerminal;

use base64::Engine;
use lwstack_core::io::JsonDecoder;
use lwstack_core::lorawan::{self, band, parse_input, AesKey, CodecOptions, Frame, InputEncoding, SessionKeys};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::cli::{CodecArgs, DecodeArgs, EncodeArgs, LorawanCommands};
use crate::context::Context;
use crate::error::CliError;

fn key(raw: &Option<String>) -> Result<Option<AesKey>, CliError> {
    Ok(raw.as_deref().map(str::parse).transpose()?)
}

/// Codec keys and context from flags.
pub(crate) fn codec_options(args: &CodecArgs) -> Result<CodecOptions, CliError> {
    let band = band::for_frequency_plan(&args.frequency_plan_id)
        .or_else(|| band::by_id(&args.frequency_plan_id))
        .ok_or_else(|| {
            CliError::InvalidArgument(format!("unknown frequency plan `{}`", args.frequency_plan_id))
        })?;
    let nwk_s_key = key(&args.nwk_s_key)?;
    Ok(CodecOptions {
        mac_version: args.lorawan_version.parse()?,
        band,
        app_key: key(&args.app_key)?,
        nwk_key: key(&args.nwk_key)?,
        session: SessionKeys {
            app_s_key: key(&args.app_s_key)?,
            f_nwk_s_int_key: key(&args.f_nwk_s_int_key)?.or(nwk_s_key),
            s_nwk_s_int_key: key(&args.s_nwk_s_int_key)?,
            nwk_s_enc_key: key(&args.nwk_s_enc_key)?,
        },
        dev_eui: args.dev_eui.as_deref().map(str::parse).transpose()?,
        join_eui: args.join_eui.as_deref().map(str::parse).transpose()?,
        dev_nonce: args.dev_nonce,
        conf_f_cnt: args.conf_f_cnt,
        tx_dr: args.tx_dr,
        tx_ch: args.tx_ch,
        ..Default::default()
    })
}

fn input_encoding(format: &str) -> InputEncoding {
    match format.to_ascii_lowercase().as_str() {
        "hex" => InputEncoding::Hex,
        _ => InputEncoding::Base64,
    }
}

fn decode_one(raw: &str, encoding: InputEncoding, opts: &CodecOptions) -> Result<lorawan::DecodedFrame, CliError> {
    let bytes = parse_input(raw, encoding)?;
    let decoded = lorawan::decode(&bytes, opts)?;
    for warning in &decoded.warnings {
        warn!("{}", warning);
    }
    Ok(decoded)
}

async fn run_decode(ctx: &Context, args: DecodeArgs) -> Result<(), CliError> {
    let opts = codec_options(&args.codec)?;
    let encoding = input_encoding(&ctx.config.input_format);

    if let Some(payload) = &args.payload {
        return ctx.output.print(&decode_one(payload, encoding, &opts)?);
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if ctx.cancel.is_cancelled() {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let decoded = decode_one(&line, encoding, &opts)?;
        ctx.output.print_item(&serde_json::to_value(&decoded)?)?;
    }
    Ok(())
}

fn encoded(bytes: &[u8], encoding: InputEncoding) -> Value {
    match encoding {
        InputEncoding::Hex => json!({ "raw_payload": hex::encode_upper(bytes) }),
        InputEncoding::Base64 => {
            json!({ "raw_payload": base64::engine::general_purpose::STANDARD.encode(bytes) })
        }
    }
}

async fn run_encode(ctx: &Context, args: EncodeArgs) -> Result<(), CliError> {
    let opts = codec_options(&args.codec)?;
    let encoding = input_encoding(&ctx.config.input_format);
    let document = match &args.frame {
        Some(frame) => serde_json::from_str(frame)?,
        None if !std::io::stdin().is_terminal() => JsonDecoder::new(tokio::io::stdin())
            .next(&ctx.cancel)
            .await?
            .ok_or_else(|| CliError::InvalidArgument("no frame on stdin".to_string()))?,
        None => return Err(CliError::InvalidArgument("give a frame as JSON or on stdin".to_string())),
    };
    let frame: Frame = serde_json::from_value(document)?;
    let bytes = lorawan::encode(&frame, &opts)?;
    ctx.output.print(&encoded(&bytes, encoding))
}

pub async fn run_lorawan(ctx: &Context, command: LorawanCommands) -> Result<(), CliError> {
    match command {
        LorawanCommands::Decode(args) => run_decode(ctx, args).await,
        LorawanCommands::Encode(args) => run_encode(ctx, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwstack_core::lorawan::MacVersion;

    fn codec(lorawan_version: &str, frequency_plan_id: &str) -> CodecArgs {
        CodecArgs {
            lorawan_version: lorawan_version.to_string(),
            frequency_plan_id: frequency_plan_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_codec_options_from_flags() {
        let mut args = codec("1.1", "US_902_928_FSB_2");
        args.nwk_s_key = Some("00112233445566778899AABBCCDDEEFF".to_string());
        let opts = codec_options(&args).unwrap();
        assert_eq!(opts.mac_version, MacVersion::V1_1);
        assert_eq!(opts.band.id, "US_902_928");
        assert_eq!(opts.session.f_nwk_s_int_key, opts.session.nwk_s_enc().copied());
        assert!(opts.app_key.is_none());
    }

    #[test]
    fn test_unknown_frequency_plan() {
        let err = codec_options(&codec("1.0.3", "MARS_1")).unwrap_err();
        assert!(err.to_string().contains("MARS_1"));
    }

    #[test]
    fn test_join_accept_decodes_without_warnings() {
        let mut args = codec("1.0.3", "EU_863_870");
        args.app_key = Some("5CF2BD4810FD92E9271050D2541A0F2B".to_string());
        let opts = codec_options(&args).unwrap();
        let decoded = decode_one(
            "IAUNJTHDK7t2zM+eeFmGIyjAlSyqfNfAWPzZTjhcVfAg",
            InputEncoding::Base64,
            &opts,
        )
        .unwrap();
        assert!(matches!(decoded.frame, Frame::JoinAccept(_)));
        assert!(decoded.mic.is_some());
    }

    #[test]
    fn test_encoded_output_follows_input_format() {
        assert_eq!(encoded(&[0x40, 0x01], InputEncoding::Hex)["raw_payload"], "4001");
        assert_eq!(encoded(&[0x40, 0x01], InputEncoding::Base64)["raw_payload"], "QAE=");
    }
}
