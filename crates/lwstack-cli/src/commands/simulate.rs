//! `simulate join-request` and `simulate uplink`.

use lwstack_core::config::parse_duration;
use lwstack_core::ids::GatewayIds;
use lwstack_core::lorawan::{DataFrame, FCtrl, Frame, JoinRequestFrame};
use lwstack_core::schema::parse_bytes;
use lwstack_core::simulate::{self, RadioSettings, SimulateOptions, DEFAULT_DOWNLINKS, DEFAULT_TIMEOUT};
use tracing::{info, warn};

use crate::cli::{CodecArgs, SimulateCommands, SimulateCommonArgs, SimulateJoinArgs, SimulateUplinkArgs};
use crate::commands::lorawan::codec_options;
use crate::context::Context;
use crate::error::CliError;

fn simulate_options(args: &SimulateCommonArgs) -> Result<SimulateOptions, CliError> {
    let timeout = match &args.timeout {
        Some(raw) => parse_duration(raw).map_err(|e| CliError::InvalidArgument(format!("--timeout: {}", e)))?,
        None => DEFAULT_TIMEOUT,
    };
    Ok(SimulateOptions {
        gateway: GatewayIds {
            gateway_id: args.gateway_id.clone(),
            eui: args.gateway_eui.as_deref().map(str::parse).transpose()?,
        },
        radio: RadioSettings {
            frequency: args.frequency,
            channel_index: args.channel_index,
            data_rate_index: args.data_rate_index,
            spreading_factor: args.spreading_factor,
            bandwidth: args.bandwidth,
            rssi: args.rssi,
            snr: args.snr,
            timestamp: args.timestamp,
            time: args.time,
        },
        timeout,
        downlinks: args.downlinks.unwrap_or(DEFAULT_DOWNLINKS),
        dry_run: args.dry_run,
    })
}

fn bytes_flag(name: &str, raw: &str) -> Result<Vec<u8>, CliError> {
    parse_bytes(raw).map_err(|e| CliError::InvalidArgument(format!("--{}: {}", name, e)))
}

fn join_request(args: &SimulateJoinArgs) -> Result<Frame, CliError> {
    let codec = &args.codec;
    let missing = |flag: &str| CliError::InvalidArgument(format!("--{} is required for a join-request", flag));
    Ok(Frame::JoinRequest(JoinRequestFrame {
        join_eui: codec.join_eui.as_deref().ok_or_else(|| missing("join-eui"))?.parse()?,
        dev_eui: codec.dev_eui.as_deref().ok_or_else(|| missing("dev-eui"))?.parse()?,
        dev_nonce: codec.dev_nonce.unwrap_or_else(rand::random),
    }))
}

fn uplink(args: &SimulateUplinkArgs) -> Result<Frame, CliError> {
    let data = DataFrame {
        dev_addr: args.dev_addr.parse()?,
        f_ctrl: FCtrl {
            adr: args.adr,
            ..Default::default()
        },
        f_cnt: args.f_cnt,
        f_opts: bytes_flag("f-opts", &args.f_opts)?.into(),
        f_port: Some(args.f_port),
        frm_payload: bytes_flag("frm-payload", &args.frm_payload)?.into(),
    };
    Ok(if args.confirmed {
        Frame::ConfirmedUp(data)
    } else {
        Frame::UnconfirmedUp(data)
    })
}

async fn run(ctx: &Context, frame: Frame, common: &SimulateCommonArgs, codec: &CodecArgs) -> Result<(), CliError> {
    let codec = codec_options(codec)?;
    let opts = simulate_options(common)?;
    let client = ctx.client()?;
    let result = simulate::run(&client, &frame, &codec, &opts).await?;
    if opts.dry_run {
        return ctx.output.print(&result.uplink);
    }
    for downlink in &result.downlinks {
        for warning in &downlink.warnings {
            warn!("{}", warning);
        }
    }
    if result.downlinks.len() < opts.downlinks {
        info!(
            expected = opts.downlinks,
            received = result.downlinks.len(),
            "stopped waiting for downlinks"
        );
    }
    ctx.output.print(&result)
}

pub async fn run_simulate(ctx: &Context, command: SimulateCommands) -> Result<(), CliError> {
    match command {
        SimulateCommands::JoinRequest(args) => {
            let frame = join_request(&args)?;
            run(ctx, frame, &args.common, &args.codec).await
        }
        SimulateCommands::Uplink(args) => {
            let frame = uplink(&args)?;
            run(ctx, frame, &args.common, &args.codec).await
        }
    }
}
