//! `packet-broker`: registration, routing policies and gateway visibility.

use lwstack_core::packetbroker::{
    self, DownlinkPolicy, GatewayVisibility, HomeNetwork, NetworkFilter, RoutingPolicy, UplinkPolicy,
};
use tracing::info;

use crate::cli::{
    GatewayVisibilityCommands, HomeNetworksCommands, NetworksCommands, PacketBrokerCommands, PolicyCommands,
    SetPolicyArgs,
};
use crate::context::Context;
use crate::error::CliError;

fn routing_policy(args: &SetPolicyArgs) -> Result<RoutingPolicy, CliError> {
    Ok(RoutingPolicy {
        uplink: UplinkPolicy::parse(&args.uplink)?,
        downlink: DownlinkPolicy::parse(&args.downlink)?,
    })
}

async fn run_policies(ctx: &Context, command: PolicyCommands) -> Result<(), CliError> {
    match command {
        PolicyCommands::Get(args) => {
            let home = HomeNetwork::parse(&args.home_network)?;
            let client = ctx.client()?;
            ctx.output.print(&packetbroker::get_routing_policy(&client, &home).await?)
        }
        PolicyCommands::Set(args) => {
            let home = HomeNetwork::parse(&args.home.home_network)?;
            let policy = routing_policy(&args)?;
            let client = ctx.client()?;
            packetbroker::set_routing_policy(&client, &home, &policy).await?;
            info!(home_network = %args.home.home_network, "set routing policy");
            Ok(())
        }
        PolicyCommands::Delete(args) => {
            let home = HomeNetwork::parse(&args.home_network)?;
            let client = ctx.client()?;
            packetbroker::delete_routing_policy(&client, &home).await?;
            info!(home_network = %args.home_network, "deleted routing policy");
            Ok(())
        }
    }
}

pub async fn run_packet_broker(ctx: &Context, command: PacketBrokerCommands) -> Result<(), CliError> {
    match command {
        PacketBrokerCommands::Info => {
            let client = ctx.client()?;
            ctx.output.print(&packetbroker::info(&client).await?)
        }
        PacketBrokerCommands::Register(args) => {
            let client = ctx.client()?;
            ctx.output.print(&packetbroker::register(&client, args.listed).await?)
        }
        PacketBrokerCommands::Deregister => {
            let client = ctx.client()?;
            packetbroker::deregister(&client).await?;
            info!("deregistered from Packet Broker");
            Ok(())
        }
        PacketBrokerCommands::Networks(NetworksCommands::List(args)) => {
            let filter = NetworkFilter {
                with_routing_policy: args.with_routing_policy,
                tenant_id_contains: args.tenant_id_contains,
                name_contains: args.name_contains,
                limit: args.limit,
                page: args.page,
            };
            let client = ctx.client()?;
            ctx.output
                .print_list(&packetbroker::list_networks(&client, &filter).await?)
        }
        PacketBrokerCommands::HomeNetworks(HomeNetworksCommands::Policies(command)) => {
            run_policies(ctx, command).await
        }
        PacketBrokerCommands::GatewayVisibility(GatewayVisibilityCommands::Get) => {
            let client = ctx.client()?;
            ctx.output
                .print(&packetbroker::get_gateway_visibility(&client).await?)
        }
        PacketBrokerCommands::GatewayVisibility(GatewayVisibilityCommands::Set(args)) => {
            let visibility = GatewayVisibility::parse(&args.visibility)?;
            let client = ctx.client()?;
            packetbroker::set_gateway_visibility(&client, &visibility).await?;
            info!("set gateway visibility");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::HomeNetworkArgs;

    #[test]
    fn test_routing_policy_from_flags() {
        let policy = routing_policy(&SetPolicyArgs {
            home: HomeNetworkArgs {
                home_network: "000013".to_string(),
            },
            uplink: "join-request,mac-data".to_string(),
            downlink: "all".to_string(),
        })
        .unwrap();
        assert!(policy.uplink.join_request && policy.uplink.mac_data);
        assert!(!policy.uplink.application_data);
        assert!(policy.downlink.join_accept && policy.downlink.application_data);
    }

    #[test]
    fn test_unknown_policy_class() {
        let err = routing_policy(&SetPolicyArgs {
            home: HomeNetworkArgs {
                home_network: "default".to_string(),
            },
            uplink: "everything".to_string(),
            downlink: "none".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.to_api_error().name, "routing_policy");
    }
}
