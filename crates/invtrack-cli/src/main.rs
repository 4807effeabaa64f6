use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use invtrack_config::{load_layered_yaml, load_layered_yaml_from_strings, EngineConfig, LoadedConfig};
use invtrack_schemas::MemberStatus;
use invtrack_testkit::{load_replay_script, run_replay, ReplayReport};
use tracing::info;

#[derive(Parser)]
#[command(name = "invtrack")]
#[command(about = "Invite attribution engine tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a JSONL event script through a fresh engine and print the
    /// resulting counts and member history.
    Replay {
        /// JSONL script, one step per line
        #[arg(long)]
        script: String,

        /// Layered config paths in merge order. Defaults apply when omitted.
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Print the full report as JSON instead of text lines.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let loaded = load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Replay {
            script,
            config_paths,
            json,
        } => {
            let loaded = load_config(&config_paths)?;
            let cfg = EngineConfig::from_loaded(&loaded)?;
            let steps = load_replay_script(&script)?;
            info!(
                script = %script,
                steps = steps.len(),
                config_hash = %loaded.config_hash,
                "replay starting"
            );

            let report = run_replay(&steps, cfg).await?;

            if json {
                let out = serde_json::to_string_pretty(&report).context("serialize report")?;
                println!("{out}");
            } else {
                println!("config_hash={}", loaded.config_hash);
                print_report(&report);
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return load_layered_yaml_from_strings(&[]);
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    load_layered_yaml(&path_refs)
}

fn print_report(report: &ReplayReport) {
    println!(
        "steps={} credited={} unattributed={} fetch_failures={} rejected_adjustments={}",
        report.steps,
        report.joins_credited,
        report.joins_unattributed,
        report.fetch_failures,
        report.rejected_adjustments
    );
    for g in &report.guilds {
        let s = &g.summary;
        println!(
            "guild={} populated={} invites={} members={} active_credits={}",
            s.guild_id, s.populated, s.known_invites, s.tracked_members, s.active_credits
        );
        for l in &g.inviters {
            println!("  inviter={} count={}", l.user_id, l.count);
        }
        for m in &g.members {
            let inviter = m
                .inviter_id
                .map(|u| u.to_string())
                .unwrap_or_else(|| "none".to_string());
            let status = match m.status {
                MemberStatus::Active => "active".to_string(),
                MemberStatus::Left => "left".to_string(),
                MemberStatus::Rejoined { times } => format!("rejoined({times})"),
            };
            println!(
                "  member={} inviter={} status={} rejoins={}",
                m.member_id, inviter, status, m.rejoin_count
            );
        }
    }
}
