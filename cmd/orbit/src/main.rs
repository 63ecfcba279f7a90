mod spec;

use crate::spec::ClusterSpec;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{crate_authors, crate_description, crate_version, Parser, Subcommand};
use orbit_cluster::etcd::EtcdMember;
use orbit_ops::backend::{ClusterBackend, MemoryBackend, Site, SiteState};
use orbit_ops::configure::{ConfigureRequest, Configurator, StaticMembership};
use orbit_ops::join::{render_join_script, JoinScriptParams};
use orbit_ops::log::OperationLog;
use orbit_ops::telemetry;
use orbit_ops::upgrade::{check_runtime_upgrade, UpgradePath};
use orbit_pack::DirStore;
use semver::Version;

#[derive(Parser, Debug)]
#[command(
    name = "orbit",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,orbit_ops=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute and store the configuration packages for a new cluster
    Install {
        /// Cluster spec file (YAML)
        #[arg(long)]
        cluster_spec: PathBuf,

        /// Package store directory
        #[arg(long)]
        state_dir: PathBuf,
    },
    /// Configure a server joining an existing cluster
    Expand {
        /// Cluster spec file (YAML); must contain the joining server
        #[arg(long)]
        cluster_spec: PathBuf,

        /// Package store directory
        #[arg(long)]
        state_dir: PathBuf,

        /// Advertise IP of the joining server
        #[arg(long)]
        joining: String,

        /// Current etcd membership file (YAML list of {name, peer_urls})
        #[arg(long)]
        members: PathBuf,
    },
    /// Check whether a runtime version change is supported
    CheckUpgrade {
        /// Package store directory
        #[arg(long)]
        state_dir: PathBuf,

        /// Cluster name (package repository)
        #[arg(long)]
        cluster: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Minimum version allowed to upgrade directly (repeatable)
        #[arg(long = "direct-minimum")]
        direct_minimums: Vec<String>,

        /// Upgrade path through intermediates: "<origin>=<v1>,<v2>" (repeatable)
        #[arg(long = "via")]
        via: Vec<String>,
    },
    /// Render the shell script a joining node bootstraps with
    JoinScript {
        #[arg(long)]
        binary_url: String,

        #[arg(long)]
        ops_url: String,

        #[arg(long)]
        token: String,

        #[arg(long)]
        advertise_addr: String,

        #[arg(long)]
        server_addr: String,

        #[arg(long)]
        role: String,

        #[arg(long, default_value = "")]
        cloud_provider: String,

        #[arg(long)]
        selinux: bool,

        #[arg(long)]
        operation_id: String,

        #[arg(long, default_value_t = 1000)]
        service_uid: u32,

        #[arg(long, default_value_t = 1000)]
        service_gid: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_filter, args.log_format)?;

    match args.command {
        Command::Install {
            cluster_spec,
            state_dir,
        } => install(&cluster_spec, &state_dir).await,
        Command::Expand {
            cluster_spec,
            state_dir,
            joining,
            members,
        } => expand(&cluster_spec, &state_dir, &joining, &members).await,
        Command::CheckUpgrade {
            state_dir,
            cluster,
            from,
            to,
            direct_minimums,
            via,
        } => check_upgrade(&state_dir, &cluster, &from, &to, &direct_minimums, &via).await,
        Command::JoinScript {
            binary_url,
            ops_url,
            token,
            advertise_addr,
            server_addr,
            role,
            cloud_provider,
            selinux,
            operation_id,
            service_uid,
            service_gid,
        } => {
            let script = render_join_script(&JoinScriptParams {
                binary_url,
                ops_url,
                token,
                advertise_addr,
                server_addr,
                role,
                cloud_provider,
                selinux,
                operation_id,
                service_uid,
                service_gid,
            })?;
            print!("{script}");
            Ok(())
        }
    }
}

async fn install(cluster_spec: &PathBuf, state_dir: &PathBuf) -> anyhow::Result<()> {
    let spec = ClusterSpec::load(cluster_spec)?;
    let configurator = Configurator::new(
        DirStore::new(state_dir),
        StaticMembership(Vec::new()),
        MemoryBackend::new(),
    );
    let log = OperationLog::new();
    let request = spec.install_request()?;
    let operation_id = request.operation.id;
    configurator.configure(request, &log).await?;
    report(&log);
    println!("install operation {operation_id} configured");
    Ok(())
}

async fn expand(
    cluster_spec: &PathBuf,
    state_dir: &PathBuf,
    joining: &str,
    members: &PathBuf,
) -> anyhow::Result<()> {
    let spec = ClusterSpec::load(cluster_spec)?;
    let members: Vec<EtcdMember> = {
        let raw = std::fs::read_to_string(members)?;
        serde_yaml::from_str(&raw)?
    };

    // the engine reads the current cluster from the backend; seed it with
    // every spec server except the joiner
    let backend = MemoryBackend::new();
    backend
        .create_site(Site {
            domain: spec.name.clone(),
            state: SiteState::Active,
            servers: spec
                .servers
                .iter()
                .filter(|s| s.advertise_ip != joining)
                .cloned()
                .collect(),
        })
        .await?;

    let configurator = Configurator::new(
        DirStore::new(state_dir),
        StaticMembership(members),
        backend,
    );
    let log = OperationLog::new();
    let request = spec.expand_request(joining)?;
    configurator.configure(request, &log).await?;
    report(&log);
    println!("server {joining} configured");
    Ok(())
}

async fn check_upgrade(
    state_dir: &PathBuf,
    cluster: &str,
    from: &str,
    to: &str,
    direct_minimums: &[String],
    via: &[String],
) -> anyhow::Result<()> {
    let paths = UpgradePath {
        direct_minimums: direct_minimums
            .iter()
            .map(|v| Version::parse(v))
            .collect::<Result<_, _>>()?,
        via: via
            .iter()
            .map(|entry| parse_via(entry))
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?,
    };
    let store = DirStore::new(state_dir);
    check_runtime_upgrade(
        &store,
        cluster,
        &Version::parse(from)?,
        &Version::parse(to)?,
        &paths,
    )
    .await?;
    println!("upgrade {from} -> {to} is supported");
    Ok(())
}

fn parse_via(entry: &str) -> anyhow::Result<(Version, Vec<Version>)> {
    let (origin, intermediates) = entry
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected <origin>=<v1>,<v2>, got {entry:?}"))?;
    Ok((
        Version::parse(origin)?,
        intermediates
            .split(',')
            .map(Version::parse)
            .collect::<Result<_, _>>()?,
    ))
}

fn report(log: &OperationLog) {
    for entry in log.entries() {
        match entry.server {
            Some(server) => tracing::info!(msg = entry.message, server),
            None => tracing::info!(msg = entry.message),
        }
    }
}
