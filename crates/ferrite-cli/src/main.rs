//! Ferrite CLI - list devices, print default assignments, inspect executables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferrite_cli::inspect::{inspect_executable, ProgramLayout};
use ferrite_cli::{parse_alias, AliasArg, ElementType};
use ferrite_runtime::{ClientOptions, CpuClient};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ferrite")]
#[command(about = "Device dispatch runtime for compiled programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Number of host devices (overrides FERRITE_CPU_DEVICE_COUNT)
    #[arg(long, global = true, value_name = "N")]
    device_count: Option<usize>,

    /// Index of this process
    #[arg(long, global = true, default_value = "0")]
    process_index: usize,

    /// Maximum in-flight computations per device (overrides FERRITE_MAX_INFLIGHT)
    #[arg(long, global = true, value_name = "N")]
    max_inflight: Option<usize>,

    /// Use the synchronous in-flight default of one computation per device
    #[arg(long, global = true)]
    synchronous: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the client's devices
    Devices,
    /// Print the default device assignment
    Assign {
        /// Number of replicas
        #[arg(short, long, default_value = "1")]
        replicas: usize,

        /// Number of partitions per replica
        #[arg(short, long, default_value = "1")]
        partitions: usize,
    },
    /// Compile a synthetic program and show its donation set and result buffers
    Inspect {
        /// Number of parameters
        #[arg(long, default_value = "2")]
        parameters: usize,

        /// Number of result elements (more than one makes a tuple result)
        #[arg(long, default_value = "1")]
        results: usize,

        /// Element type of every parameter and result
        #[arg(long, value_enum, default_value = "f32")]
        dtype: ElementType,

        /// Dimensions of every parameter and result (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "4")]
        dims: Vec<usize>,

        /// Alias a result element with a parameter (format: OUTPUT=PARAMETER, can be repeated)
        #[arg(short, long = "alias", value_parser = parse_alias_arg)]
        aliases: Vec<AliasArg>,

        /// Pass parameters as the elements of a single tuple
        #[arg(long)]
        tupled: bool,

        /// Number of replicas to compile for
        #[arg(short, long, default_value = "1")]
        replicas: usize,
    },
}

fn parse_alias_arg(s: &str) -> std::result::Result<AliasArg, String> {
    parse_alias(s).map_err(|e| format!("{e:#}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let client = create_client(&cli)?;

    match cli.command {
        Commands::Devices => cmd_devices(&client),
        Commands::Assign {
            replicas,
            partitions,
        } => cmd_assign(&client, replicas, partitions)?,
        Commands::Inspect {
            parameters,
            results,
            dtype,
            dims,
            aliases,
            tupled,
            replicas,
        } => {
            let layout = ProgramLayout {
                parameters,
                results,
                dtype: dtype.into(),
                dims,
                aliases,
                tupled,
            };
            print!("{}", inspect_executable(&client, &layout, replicas)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn create_client(cli: &Cli) -> Result<CpuClient> {
    let mut options = ClientOptions::from_env()
        .context("Invalid FERRITE_* environment configuration")?
        .with_process_index(cli.process_index)
        .with_asynchronous(!cli.synchronous);
    if let Some(count) = cli.device_count {
        options = options.with_device_count(count);
    }
    if let Some(limit) = cli.max_inflight {
        options = options.with_max_inflight(limit);
    }
    tracing::debug!(?options, "creating client");

    CpuClient::new(options).context("Failed to create client")
}

fn cmd_devices(client: &CpuClient) {
    println!(
        "Platform: {} (id {:#018x}, version {})",
        client.platform_name(),
        client.platform_id(),
        client.platform_version()
    );
    println!(
        "Process {}: {} devices, {} addressable",
        client.process_index(),
        client.device_count(),
        client.addressable_device_count()
    );
    for device in client.devices() {
        let semaphore = device.max_inflight_computations_semaphore();
        println!(
            "  {} kind={} process={} local_hardware_id={} max_inflight={}",
            device,
            device.device_kind(),
            device.process_index(),
            device.local_hardware_id(),
            semaphore.capacity()
        );
    }
}

fn cmd_assign(client: &CpuClient, replicas: usize, partitions: usize) -> Result<()> {
    let assignment = client
        .default_device_assignment(replicas, partitions)
        .with_context(|| {
            format!("Cannot place {} replicas x {} partitions", replicas, partitions)
        })?;
    print!("{}", assignment);
    Ok(())
}
