//! # Carnelia Chat
//!
//! A standalone CLI group chat built on the mesh SDK.
//! Every peer floods each message to all of its links; a per-node delivery
//! engine holds messages back until everything their author had seen has
//! been shown, so a reply never appears before the message it answers.
//!
//! ## Delivery rule
//!
//! ```text
//! m from A is shown at node N when
//!   m.deps[A] - 1 <= N.clock[A]          (A's earlier messages are in)
//!   m.deps[k]     <= N.clock[k]  k != A  (everything A had seen is in)
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use mesh_delivery::{ApplicationSink, DeliveryEngine};
use mesh_sdk::quick::{spawn_mesh, MemoryMesh};
use mesh_sdk::{ChatLog, ChatNode, NodeConfig, NodeEvent, Result, Topology};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(50);

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "carnelia-chat")]
#[command(about = "Peer-to-peer group chat with causal delivery (mesh SDK)")]
#[command(version)]
struct Cli {
    /// JSON file with node settings shared by every peer
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fold delivered ids into per-author watermarks
    #[arg(long, global = true)]
    compact_dedup: bool,

    /// Do not send the causal context on newly opened links
    #[arg(long, global = true)]
    no_context: bool,

    /// Seconds a message may wait for its predecessors before a stall warning
    #[arg(long, global = true)]
    stall_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Three peers chat over a full mesh; every log keeps replies after questions
    Demo,
    /// A second message overtakes the first; the reorder buffer holds it back
    Reorder,
    /// Split a line of peers, chat on one side, rejoin through the causal context
    Partition,
    /// Interactive REPL over an in-memory mesh
    Interactive {
        /// Number of peers
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Initial link layout
        #[arg(short, long, value_enum, default_value_t = Shape::Mesh)]
        topology: Shape,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    Mesh,
    Line,
    Ring,
}

impl Shape {
    fn topology(self) -> Topology {
        match self {
            Shape::Mesh => Topology::FullMesh,
            Shape::Line => Topology::Line,
            Shape::Ring => Topology::Ring,
        }
    }
}

/// Node settings from `--config`, overridden by flags.
fn base_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_json_file(path)?,
        None => NodeConfig::default(),
    };
    if cli.compact_dedup {
        config.compact_dedup = true;
    }
    if cli.no_context {
        config.send_causal_context = false;
    }
    if let Some(secs) = cli.stall_secs {
        config.stall_threshold_ms = secs * 1000;
    }
    config.validate()?;
    Ok(config)
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn warn_line(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn link_arrow(a: &str, b: &str, open: bool) {
    let (arrow, mark) = if open {
        ("◀──link──▶".bright_cyan(), "✓".bright_green())
    } else {
        ("◀──╳╳╳╳──▶".bright_red(), "✗".bright_red())
    };
    println!("  {} {} {} {}", a.bright_magenta(), arrow, b.bright_magenta(), mark);
}

fn show_entries(title: &str, entries: &[String]) {
    let border = "─".repeat(56);
    println!("  ┌{}┐", border);
    println!("  │ {:^54} │", title.bright_yellow().to_string());
    println!("  ├{}┤", border);
    if entries.is_empty() {
        println!("  │ {:^54} │", "(nothing delivered)".dimmed().to_string());
    }
    for (i, entry) in entries.iter().enumerate() {
        let line = format!("{:>3}. {}", i + 1, entry);
        println!("  │ {:<54} │", line);
    }
    println!("  └{}┘", border);
}

fn show_log(node: &ChatNode) {
    show_entries(&format!("Log: {}", node.id()), &node.chat_log().entries());
}

fn causal_result(ok: bool) {
    if ok {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "CAUSAL ORDER HOLDS ON EVERY PEER".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "CAUSAL ORDER VIOLATED".bright_red().bold()
        );
    }
}

async fn say(node: &ChatNode, body: &str) -> Result<()> {
    let message = node.submit(body).await?;
    step(&format!(
        "{} says {}  {}",
        node.id().to_string().bright_magenta(),
        format!("\"{}\"", body).bright_white(),
        format!("deps {}", message.dependencies).dimmed()
    ));
    Ok(())
}

/// Whether `first` precedes `then` in the node's log.
fn shown_before(node: &ChatNode, first: &str, then: &str) -> bool {
    let log = node.chat_log();
    match (log.position_of(first), log.position_of(then)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo(base: NodeConfig) -> Result<()> {
    header("DEMO — Causal Group Chat over a Full Mesh");

    let mesh = spawn_mesh(&["alice", "bob", "carol"], &Topology::FullMesh, base)?;
    link_arrow("alice", "bob", true);
    link_arrow("bob", "carol", true);
    link_arrow("alice", "carol", true);

    section("Phase 1: alice asks a question");
    say(mesh.node(0), "who's up for lunch?").await?;
    for node in &mesh.nodes {
        node.wait_for_entries(1, WAIT).await?;
    }

    section("Phase 2: bob and carol answer at the same time");
    let (b, c) = tokio::join!(
        say(mesh.node(1), "me!"),
        say(mesh.node(2), "count me in")
    );
    b?;
    c?;

    section("Phase 3: alice follows up after hearing both");
    mesh.node(0).wait_for_entries(3, WAIT).await?;
    say(mesh.node(0), "great, noon at the usual place").await?;
    for node in &mesh.nodes {
        node.wait_for_entries(4, WAIT).await?;
    }

    section("Delivered logs");
    for node in &mesh.nodes {
        show_log(node);
    }

    let ok = mesh.nodes.iter().all(|node| {
        shown_before(node, "who's up for lunch?", "me!")
            && shown_before(node, "who's up for lunch?", "count me in")
            && shown_before(node, "me!", "great, noon at the usual place")
            && shown_before(node, "count me in", "great, noon at the usual place")
    });
    causal_result(ok);

    section("Flood statistics");
    for node in &mesh.nodes {
        let report = node.report().await?;
        step(&format!(
            "{}: delivered={} received={} duplicates dropped={}",
            node.id().to_string().bright_magenta(),
            report.buffer.stats.delivered,
            report.buffer.stats.received,
            report.buffer.stats.duplicates
        ));
    }

    mesh.shutdown().await
}

// ─── Reorder ───────────────────────────────────────────────────────────────

fn run_reorder() {
    header("REORDER — Holding Back a Message that Arrived Early");

    let mut x = DeliveryEngine::new("X");
    let mut y = DeliveryEngine::new("Y");
    let log = ChatLog::new();

    section("Phase 1: X sends two messages");
    let m1 = x.submit("first").message;
    let m2 = x.submit("second").message;
    step(&format!("{} deps {}", m1.message_id(), m1.dependencies));
    step(&format!("{} deps {}", m2.message_id(), m2.dependencies));

    section("Phase 2: the second message reaches Y first");
    let receipt = y.receive(m2);
    for message in receipt.delivered() {
        log.deliver(message);
    }
    step(&format!(
        "delivered {} message(s); {} waiting in the reorder buffer",
        receipt.delivered().len(),
        y.buffer().len()
    ));
    step(&format!("Y's clock: {}", y.clock()));

    section("Phase 3: the first message arrives");
    let receipt = y.receive(m1.clone());
    for message in receipt.delivered() {
        log.deliver(message);
        step(&format!("delivered {}", message.message_id().to_string().bright_green()));
    }
    step(&format!("Y's clock: {}", y.clock()));

    section("Phase 4: a flooded copy of the first message shows up again");
    if y.receive(m1).is_duplicate() {
        step("dropped by the dedup set, not forwarded");
    } else {
        warn_line("copy was accepted twice");
    }

    show_entries("Log: Y", &log.entries());
    causal_result(log.position_of("first") < log.position_of("second") && log.len() == 2);
}

// ─── Partition ─────────────────────────────────────────────────────────────

async fn run_partition(base: NodeConfig) -> Result<()> {
    header("PARTITION — Split, Chat, Rejoin via Causal Context");

    let mesh = spawn_mesh(&["alice", "bob", "carol"], &Topology::Line, base)?;
    link_arrow("alice", "bob", true);
    link_arrow("bob", "carol", true);

    section("Phase 1: everyone is connected");
    say(mesh.node(0), "hello everyone").await?;
    for node in &mesh.nodes {
        node.wait_for_entries(1, WAIT).await?;
    }

    section("Phase 2: carol's link drops; alice and bob keep talking");
    mesh.disconnect(1, 2);
    link_arrow("bob", "carol", false);
    say(mesh.node(0), "is carol still here?").await?;
    mesh.node(1).wait_for_entries(2, WAIT).await?;
    say(mesh.node(1), "she dropped off").await?;
    mesh.node(1).wait_for_entries(3, WAIT).await?;
    tokio::time::sleep(SETTLE).await;
    show_log(mesh.node(1));
    show_log(mesh.node(2));

    section("Phase 3: carol reconnects and receives bob's causal context");
    mesh.connect(1, 2);
    link_arrow("bob", "carol", true);
    say(mesh.node(1), "welcome back, carol").await?;
    mesh.node(2).wait_for_entries(2, WAIT).await?;

    let report = mesh.node(2).report().await?;
    step(&format!("carol's clock after the merge: {}", report.clock()));
    step(&format!(
        "buffered at carol: {} (missed messages are not replayed)",
        report.buffer.pending
    ));

    section("Post-rejoin logs");
    for node in &mesh.nodes {
        show_log(node);
    }

    let ok = mesh
        .nodes
        .iter()
        .all(|node| shown_before(node, "hello everyone", "welcome back, carol"))
        && shown_before(mesh.node(1), "she dropped off", "welcome back, carol");
    causal_result(ok);

    mesh.shutdown().await
}

// ─── Interactive ───────────────────────────────────────────────────────────

fn resolve(mesh: &MemoryMesh, name: &str) -> Option<usize> {
    mesh.nodes
        .iter()
        .position(|node| node.id().as_str() == name)
        .or_else(|| name.parse().ok().filter(|&idx: &usize| idx < mesh.len()))
}

fn print_help() {
    println!("  say <peer> <text...> | log <peer> [n] | status [peer] | nodes");
    println!("  connect <a> <b> | disconnect <a> <b> | compact <peer> | quit");
}

async fn show_status(node: &ChatNode) -> Result<()> {
    let report = node.report().await?;
    let links: Vec<_> = report.links.iter().map(|l| l.to_string()).collect();
    let age = report
        .buffer
        .oldest_age
        .map(|a| format!("{:.1}s", a.as_secs_f64()))
        .unwrap_or_else(|| "-".into());
    println!(
        "  {} clock={} links=[{}]",
        node.id().to_string().bright_yellow(),
        report.clock(),
        links.join(", ")
    );
    println!(
        "    delivered={} buffered={} oldest={} dedup={} duplicates={} context merges={}",
        report.buffer.stats.delivered,
        report.buffer.pending,
        age,
        report.buffer.dedup_len,
        report.buffer.stats.duplicates,
        report.buffer.stats.context_merges
    );
    Ok(())
}

async fn run_interactive(base: NodeConfig, count: usize, shape: Shape) -> Result<()> {
    header("INTERACTIVE — Causal Group Chat REPL");

    let names: Vec<String> = (0..count.max(1)).map(|i| format!("n{}", i)).collect();
    let mesh = spawn_mesh(&names, &shape.topology(), base)?;
    step(&format!("Spawned {} peers: {}", mesh.len(), names.join(", ")));

    for node in &mesh.nodes {
        let mut events = node.subscribe();
        let id = node.id().clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let NodeEvent::Stalled {
                    pending,
                    oldest_age,
                    waiting,
                } = event
                {
                    let waiting: Vec<String> = waiting.iter().map(ToString::to_string).collect();
                    println!(
                        "\n  {} {} has {} message(s) waiting {:.1}s for predecessors: {}",
                        "⚠".bright_red(),
                        id,
                        pending,
                        oldest_age.as_secs_f64(),
                        waiting.join(", ").dimmed()
                    );
                }
            }
        });
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", "carnelia> ".bright_cyan().bold());
        let _ = io::stdout().flush();

        let input = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "say" | "s" => {
                if parts.len() < 3 {
                    warn_line("Usage: say <peer> <text...>");
                    continue;
                }
                let Some(idx) = resolve(&mesh, parts[1]) else {
                    warn_line(&format!("Unknown peer '{}'", parts[1]));
                    continue;
                };
                let body = parts[2..].join(" ");
                say(mesh.node(idx), &body).await?;
                tokio::time::sleep(SETTLE).await;
                let reached = mesh
                    .nodes
                    .iter()
                    .filter(|n| n.chat_log().position_of(&body).is_some())
                    .count();
                step(&format!("shown on {}/{} peers", reached, mesh.len()));
            }

            "connect" | "c" | "disconnect" | "dc" => {
                if parts.len() < 3 {
                    warn_line(&format!("Usage: {} <a> <b>", parts[0]));
                    continue;
                }
                match (resolve(&mesh, parts[1]), resolve(&mesh, parts[2])) {
                    (Some(a), Some(b)) if a != b => {
                        let open = matches!(parts[0], "connect" | "c");
                        let changed = if open {
                            mesh.connect(a, b)
                        } else {
                            mesh.disconnect(a, b)
                        };
                        if changed {
                            link_arrow(mesh.node(a).id().as_str(), mesh.node(b).id().as_str(), open);
                        } else {
                            warn_line("Link already in that state");
                        }
                    }
                    _ => warn_line("Need two distinct known peers"),
                }
            }

            "log" | "l" => {
                let Some(idx) = parts.get(1).and_then(|p| resolve(&mesh, p)) else {
                    warn_line("Usage: log <peer> [n]");
                    continue;
                };
                let node = mesh.node(idx);
                let n = parts
                    .get(2)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(node.chat_log().len());
                show_entries(&format!("Log: {}", node.id()), &node.chat_log().tail(n));
            }

            "status" | "st" => match parts.get(1) {
                Some(name) => match resolve(&mesh, name) {
                    Some(idx) => show_status(mesh.node(idx)).await?,
                    None => warn_line(&format!("Unknown peer '{}'", name)),
                },
                None => {
                    for node in &mesh.nodes {
                        show_status(node).await?;
                    }
                }
            },

            "nodes" | "ls" => {
                for node in &mesh.nodes {
                    let report = node.report().await?;
                    let links: Vec<_> = report.links.iter().map(|l| l.to_string()).collect();
                    println!(
                        "  {} ── {}",
                        node.id().to_string().bright_yellow(),
                        if links.is_empty() {
                            "(isolated)".dimmed().to_string()
                        } else {
                            links.join(", ")
                        }
                    );
                }
            }

            "compact" => {
                let Some(idx) = parts.get(1).and_then(|p| resolve(&mesh, p)) else {
                    warn_line("Usage: compact <peer>");
                    continue;
                };
                let dropped = mesh.node(idx).compact().await?;
                step(&format!("{} dropped {} dedup entries", mesh.node(idx).id(), dropped));
            }

            "quit" | "exit" | "q" => {
                println!("  {}", "Goodbye!".dimmed());
                break;
            }

            "help" | "h" | "?" => print_help(),

            other => {
                println!("  {} Unknown command '{}' — type 'help'", "?".bright_yellow(), other);
            }
        }
    }

    mesh.shutdown().await
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match base_config(&cli) {
        Ok(base) => match cli.command {
            Commands::Demo => run_demo(base).await,
            Commands::Reorder => {
                run_reorder();
                Ok(())
            }
            Commands::Partition => run_partition(base).await,
            Commands::Interactive { nodes, topology } => {
                run_interactive(base, nodes, topology).await
            }
        },
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
