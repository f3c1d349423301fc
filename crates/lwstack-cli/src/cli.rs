//! CLI argument definitions using clap.
//!
//! Global flags and the fixed commands are derived; the registry nouns
//! (`applications`, `end-devices`, ...) are generated from their schemas in
//! [`crate::tree`] and added to the same root command.

use std::path::PathBuf;

use clap::{Args, Command, CommandFactory, FromArgMatches, Parser, Subcommand};
use lwstack_core::auth::callback::DEFAULT_CALLBACK_ADDRESS;
use lwstack_core::config::{ConfigFile, LogSection, RetrySection};

use crate::error::CliError;

/// lwstack - operate a LoRaWAN network stack from the command line
#[derive(Parser, Debug)]
#[command(name = "lwstack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Root command with the generated registry nouns.
pub fn command() -> Command {
    crate::tree::augment(Cli::command())
}

/// Global flags from matches of the full tree.
pub fn global_args(matches: &clap::ArgMatches) -> Result<GlobalArgs, CliError> {
    GlobalArgs::from_arg_matches(matches).map_err(|e| CliError::InvalidArgument(e.to_string()))
}

/// A fixed command from matches of the full tree.
pub fn fixed_command(matches: &clap::ArgMatches) -> Result<Commands, CliError> {
    Commands::from_arg_matches(matches).map_err(|e| CliError::InvalidArgument(e.to_string()))
}

/// Flags that override the config file. Every flag can also be set in the
/// environment with the `LWSTACK_` prefix.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file to use instead of the default search path
    #[arg(long, global = true, env = "LWSTACK_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, env = "LWSTACK_LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output format (json, yaml)
    #[arg(long, global = true, env = "LWSTACK_OUTPUT_FORMAT", value_name = "FORMAT")]
    pub output_format: Option<String>,

    /// Input format (json; hex or base64 for raw frames)
    #[arg(long, global = true, env = "LWSTACK_INPUT_FORMAT", value_name = "FORMAT")]
    pub input_format: Option<String>,

    /// Print list results as a stream of documents instead of one array
    #[arg(long, global = true, env = "LWSTACK_STREAM_OUTPUT")]
    pub stream_output: bool,

    /// Connect without TLS
    #[arg(long, global = true, env = "LWSTACK_INSECURE", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub insecure: Option<bool>,

    /// CA bundle (PEM) to trust in addition to the system roots
    #[arg(long, global = true, env = "LWSTACK_CA", value_name = "PATH")]
    pub ca: Option<PathBuf>,

    /// Key of the cached credentials to use
    #[arg(long, global = true, env = "LWSTACK_CREDENTIALS_ID", value_name = "ID")]
    pub credentials_id: Option<String>,

    /// Send credentials to hosts they were not issued for
    #[arg(long, global = true, env = "LWSTACK_ALLOW_UNKNOWN_HOSTS", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub allow_unknown_hosts: Option<bool>,

    /// Do not check for a newer release
    #[arg(long, global = true, env = "LWSTACK_SKIP_VERSION_CHECK", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub skip_version_check: Option<bool>,

    /// Timeout of each request, e.g. 30s
    #[arg(long, global = true, env = "LWSTACK_REQUEST_TIMEOUT", value_name = "DURATION")]
    pub request_timeout: Option<String>,

    /// Retries of rate limited or unavailable calls
    #[arg(long, global = true, env = "LWSTACK_RETRY_MAX", value_name = "N", help_heading = "Retries")]
    pub retry_max: Option<u32>,

    /// Wait between retries when the server gives no hint
    #[arg(long, global = true, env = "LWSTACK_RETRY_DEFAULT_TIMEOUT", value_name = "DURATION", help_heading = "Retries")]
    pub retry_default_timeout: Option<String>,

    /// Honor server retry hints
    #[arg(long, global = true, env = "LWSTACK_RETRY_ENABLE_METADATA", value_name = "BOOL", help_heading = "Retries")]
    pub retry_enable_metadata: Option<bool>,

    #[command(flatten)]
    pub servers: ServerArgs,
}

/// Per-role address and enable overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// OAuth server base URL
    #[arg(long, global = true, env = "LWSTACK_OAUTH_SERVER_ADDRESS", value_name = "URL", help_heading = "Servers")]
    pub oauth_server_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_IDENTITY_SERVER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub identity_server_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_GATEWAY_SERVER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub gateway_server_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_NETWORK_SERVER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub network_server_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_APPLICATION_SERVER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub application_server_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_JOIN_SERVER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub join_server_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_DEVICE_CLAIMING_SERVER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub device_claiming_server_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_DEVICE_TEMPLATE_CONVERTER_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub device_template_converter_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_QR_CODE_GENERATOR_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub qr_code_generator_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_PACKET_BROKER_AGENT_GRPC_ADDRESS", value_name = "ADDRESS", help_heading = "Servers")]
    pub packet_broker_agent_grpc_address: Option<String>,

    #[arg(long, global = true, env = "LWSTACK_IDENTITY_SERVER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub identity_server_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_GATEWAY_SERVER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub gateway_server_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_NETWORK_SERVER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub network_server_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_APPLICATION_SERVER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub application_server_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_JOIN_SERVER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub join_server_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_DEVICE_CLAIMING_SERVER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub device_claiming_server_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_DEVICE_TEMPLATE_CONVERTER_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub device_template_converter_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_QR_CODE_GENERATOR_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub qr_code_generator_enabled: Option<bool>,

    #[arg(long, global = true, env = "LWSTACK_PACKET_BROKER_AGENT_ENABLED", value_name = "BOOL", help_heading = "Servers")]
    pub packet_broker_agent_enabled: Option<bool>,
}

impl GlobalArgs {
    /// The environment and flag layer, merged over the config file.
    pub fn to_layer(&self) -> ConfigFile {
        let s = &self.servers;
        let retry = (self.retry_max.is_some()
            || self.retry_default_timeout.is_some()
            || self.retry_enable_metadata.is_some())
        .then(|| RetrySection {
            max: self.retry_max,
            default_timeout: self.retry_default_timeout.clone(),
            enable_metadata: self.retry_enable_metadata,
        });
        ConfigFile {
            credentials_id: self.credentials_id.clone(),
            log: self.log_level.clone().map(|level| LogSection { level: Some(level) }),
            input_format: self.input_format.clone(),
            output_format: self.output_format.clone(),
            insecure: self.insecure,
            ca: self.ca.clone(),
            allow_unknown_hosts: self.allow_unknown_hosts,
            oauth_server_address: s.oauth_server_address.clone(),
            identity_server_grpc_address: s.identity_server_grpc_address.clone(),
            gateway_server_grpc_address: s.gateway_server_grpc_address.clone(),
            network_server_grpc_address: s.network_server_grpc_address.clone(),
            application_server_grpc_address: s.application_server_grpc_address.clone(),
            join_server_grpc_address: s.join_server_grpc_address.clone(),
            device_claiming_server_grpc_address: s.device_claiming_server_grpc_address.clone(),
            device_template_converter_grpc_address: s.device_template_converter_grpc_address.clone(),
            qr_code_generator_grpc_address: s.qr_code_generator_grpc_address.clone(),
            packet_broker_agent_grpc_address: s.packet_broker_agent_grpc_address.clone(),
            identity_server_enabled: s.identity_server_enabled,
            gateway_server_enabled: s.gateway_server_enabled,
            network_server_enabled: s.network_server_enabled,
            application_server_enabled: s.application_server_enabled,
            join_server_enabled: s.join_server_enabled,
            device_claiming_server_enabled: s.device_claiming_server_enabled,
            device_template_converter_enabled: s.device_template_converter_enabled,
            qr_code_generator_enabled: s.qr_code_generator_enabled,
            packet_broker_agent_enabled: s.packet_broker_agent_enabled,
            retry,
            skip_version_check: self.skip_version_check,
            request_timeout: self.request_timeout.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in with OAuth or an API key
    Login(LoginArgs),

    /// Revoke and remove cached credentials
    Logout(LogoutArgs),

    /// Write a config file for a cluster
    Use(UseArgs),

    /// Show the rights of the current credentials
    AuthInfo,

    /// Decode and encode LoRaWAN frames
    #[command(subcommand)]
    Lorawan(LorawanCommands),

    /// Simulate a device behind a gateway
    #[command(subcommand)]
    Simulate(SimulateCommands),

    /// Stream events of entities
    Events(EventsArgs),

    /// Packet Broker routing
    #[command(subcommand)]
    #[command(visible_alias = "pb")]
    PacketBroker(PacketBrokerCommands),

    /// Print version information
    Version,
}

// ==================== Login ====================

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Receive the authorization code on a local callback; with false, paste it
    #[arg(long, action = clap::ArgAction::Set, default_value = "true", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub callback: bool,

    /// Address of the local callback server
    #[arg(long, default_value = DEFAULT_CALLBACK_ADDRESS)]
    pub callback_address: String,

    /// Log in with an API key instead of OAuth
    #[arg(long, env = "LWSTACK_API_KEY")]
    pub api_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct LogoutArgs {
    /// Log out of every cached credentials ID
    #[arg(long)]
    pub all: bool,
}

// ==================== Use ====================

#[derive(Args, Debug)]
pub struct UseArgs {
    /// Hostname of the cluster
    pub host: String,

    /// Capture and trust the CA of the host
    #[arg(long)]
    pub fetch_ca: bool,

    /// Write to the user config directory instead of the working directory
    #[arg(long)]
    pub user: bool,

    /// Replace an existing config file
    #[arg(long)]
    pub overwrite: bool,

    /// RPC port instead of the default
    #[arg(long)]
    pub grpc_port: Option<u16>,
}

// ==================== LoRaWAN ====================

#[derive(Subcommand, Debug)]
pub enum LorawanCommands {
    /// Decode a frame given in hex or base64
    Decode(DecodeArgs),

    /// Encode a JSON frame
    Encode(EncodeArgs),
}

/// Keys and context of the frame codec.
#[derive(Args, Debug, Clone, Default)]
pub struct CodecArgs {
    /// LoRaWAN MAC version, e.g. 1.0.3 or 1.1
    #[arg(long, default_value = "1.0.3")]
    pub lorawan_version: String,

    /// Frequency plan or band ID
    #[arg(long, default_value = "EU_863_870")]
    pub frequency_plan_id: String,

    #[arg(long)]
    pub app_key: Option<String>,

    #[arg(long)]
    pub nwk_key: Option<String>,

    #[arg(long)]
    pub app_s_key: Option<String>,

    /// NwkSKey (1.0.x); fills all three network session keys
    #[arg(long)]
    pub nwk_s_key: Option<String>,

    #[arg(long)]
    pub f_nwk_s_int_key: Option<String>,

    #[arg(long)]
    pub s_nwk_s_int_key: Option<String>,

    #[arg(long)]
    pub nwk_s_enc_key: Option<String>,

    #[arg(long)]
    pub dev_eui: Option<String>,

    #[arg(long)]
    pub join_eui: Option<String>,

    /// DevNonce of the join-request a join-accept answers
    #[arg(long)]
    pub dev_nonce: Option<u16>,

    /// FCnt of the acknowledged frame (1.1 uplink MIC)
    #[arg(long, default_value = "0")]
    pub conf_f_cnt: u16,

    /// Data rate index of the uplink (1.1 uplink MIC)
    #[arg(long, default_value = "0")]
    pub tx_dr: u8,

    /// Channel index of the uplink (1.1 uplink MIC)
    #[arg(long, default_value = "0")]
    pub tx_ch: u8,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame to decode; read line by line from stdin when absent
    pub payload: Option<String>,

    #[command(flatten)]
    pub codec: CodecArgs,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// JSON frame; read from stdin when absent
    pub frame: Option<String>,

    #[command(flatten)]
    pub codec: CodecArgs,
}

// ==================== Simulate ====================

#[derive(Subcommand, Debug)]
pub enum SimulateCommands {
    /// Send a join-request and wait for the join-accept
    JoinRequest(SimulateJoinArgs),

    /// Send a data uplink
    Uplink(SimulateUplinkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateCommonArgs {
    /// Gateway to send the uplink through
    #[arg(long)]
    pub gateway_id: String,

    #[arg(long)]
    pub gateway_eui: Option<String>,

    #[arg(long)]
    pub frequency: Option<u64>,

    #[arg(long)]
    pub channel_index: Option<usize>,

    #[arg(long)]
    pub data_rate_index: Option<u8>,

    #[arg(long)]
    pub spreading_factor: Option<u8>,

    /// Bandwidth in Hz
    #[arg(long)]
    pub bandwidth: Option<u32>,

    #[arg(long, allow_negative_numbers = true)]
    pub rssi: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    pub snr: Option<f32>,

    /// Concentrator timestamp in microseconds
    #[arg(long)]
    pub timestamp: Option<u32>,

    /// Reception time (RFC3339)
    #[arg(long)]
    pub time: Option<chrono::DateTime<chrono::Utc>>,

    /// How long to wait for downlinks, e.g. 20s
    #[arg(long)]
    pub timeout: Option<String>,

    /// Number of downlinks to wait for
    #[arg(long)]
    pub downlinks: Option<usize>,

    /// Print the uplink instead of sending it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SimulateJoinArgs {
    #[command(flatten)]
    pub common: SimulateCommonArgs,

    #[command(flatten)]
    pub codec: CodecArgs,
}

#[derive(Args, Debug)]
pub struct SimulateUplinkArgs {
    #[command(flatten)]
    pub common: SimulateCommonArgs,

    #[command(flatten)]
    pub codec: CodecArgs,

    #[arg(long)]
    pub dev_addr: String,

    #[arg(long, default_value = "0")]
    pub f_cnt: u32,

    #[arg(long, default_value = "1")]
    pub f_port: u8,

    /// Application payload, hex: prefixed or base64
    #[arg(long, default_value = "")]
    pub frm_payload: String,

    /// MAC commands in FOpts, hex: prefixed or base64
    #[arg(long, default_value = "")]
    pub f_opts: String,

    #[arg(long)]
    pub confirmed: bool,

    #[arg(long)]
    pub adr: bool,
}

// ==================== Events ====================

#[derive(Args, Debug)]
pub struct EventsArgs {
    #[arg(long = "application-id", value_name = "ID")]
    pub application_ids: Vec<String>,

    /// End device as <application-id>/<device-id>
    #[arg(long = "end-device-id", value_name = "APP/DEVICE")]
    pub end_device_ids: Vec<String>,

    #[arg(long = "gateway-id", value_name = "ID")]
    pub gateway_ids: Vec<String>,

    #[arg(long = "client-id", value_name = "ID")]
    pub client_ids: Vec<String>,

    #[arg(long = "user-id", value_name = "ID")]
    pub user_ids: Vec<String>,

    #[arg(long = "organization-id", value_name = "ID")]
    pub organization_ids: Vec<String>,

    /// Replay this many historical events
    #[arg(long)]
    pub tail: Option<u32>,

    /// Replay events after this time (RFC3339)
    #[arg(long)]
    pub after: Option<chrono::DateTime<chrono::Utc>>,

    /// Event name filters
    #[arg(long = "name", value_name = "NAME")]
    pub names: Vec<String>,
}

// ==================== Packet Broker ====================

#[derive(Subcommand, Debug)]
pub enum PacketBrokerCommands {
    /// Show the registration of this network
    Info,

    /// Register this network with Packet Broker
    Register(RegisterArgs),

    /// Remove the registration of this network
    Deregister,

    /// Networks known to Packet Broker
    #[command(subcommand)]
    Networks(NetworksCommands),

    /// Routing policies towards home networks
    #[command(subcommand)]
    HomeNetworks(HomeNetworksCommands),

    /// Gateway details shared with other networks
    #[command(subcommand)]
    GatewayVisibility(GatewayVisibilityCommands),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// List the network publicly
    #[arg(long)]
    pub listed: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum NetworksCommands {
    List(NetworksListArgs),
}

#[derive(Args, Debug)]
pub struct NetworksListArgs {
    /// Only networks with a routing policy
    #[arg(long)]
    pub with_routing_policy: bool,

    #[arg(long)]
    pub tenant_id_contains: Option<String>,

    #[arg(long)]
    pub name_contains: Option<String>,

    #[arg(long)]
    pub limit: Option<u32>,

    #[arg(long)]
    pub page: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum HomeNetworksCommands {
    #[command(subcommand)]
    Policies(PolicyCommands),
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    Get(HomeNetworkArgs),
    Set(SetPolicyArgs),
    Delete(HomeNetworkArgs),
}

#[derive(Args, Debug)]
pub struct HomeNetworkArgs {
    /// `default` or <NetID>[/<tenant-id>]
    #[arg(default_value = "default")]
    pub home_network: String,
}

#[derive(Args, Debug)]
pub struct SetPolicyArgs {
    #[command(flatten)]
    pub home: HomeNetworkArgs,

    /// all, none or a comma separated list of uplink message classes
    #[arg(long, default_value = "none")]
    pub uplink: String,

    /// all, none or a comma separated list of downlink message classes
    #[arg(long, default_value = "none")]
    pub downlink: String,
}

#[derive(Subcommand, Debug)]
pub enum GatewayVisibilityCommands {
    Get,
    Set(SetVisibilityArgs),
}

#[derive(Args, Debug)]
pub struct SetVisibilityArgs {
    /// all, none or a comma separated list of gateway details
    #[arg(long)]
    pub visibility: String,
}
