use std::error::Error;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use chordnet::config::{
    DEFAULT_BITS, DEFAULT_CACHE_SIZE, DEFAULT_NODE_HOST, DEFAULT_NS_HOST, DEFAULT_NS_PORT,
    FIX_FINGERS_INTERVAL_MS, STABILIZE_INTERVAL_MS,
};
use chordnet::directory::{self, start_registry, DirectoryClient};
use chordnet::error::{ChordError, ChordResult};
use chordnet::node::NodeConfig;
use chordnet::ring::IdSpace;
use chordnet::rpc::{http_client, RemoteNode};
use chordnet::server::{start_node, NodeOptions};

#[derive(Parser)]
#[command(name = "chordnet", about = "Chord distributed key-value store")]
struct Cli {
    /// Identifier-space width in bits (the ring holds 2^BITS ids).
    #[arg(long, global = true, default_value_t = DEFAULT_BITS)]
    bits: u32,

    /// Name-service address as host:port.
    #[arg(long, global = true, default_value_t = format!("{DEFAULT_NS_HOST}:{DEFAULT_NS_PORT}"))]
    ns: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch the name service and serve until interrupted.
    StartNameService {
        #[arg(long, default_value = DEFAULT_NS_HOST)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_NS_PORT)]
        port: u16,
    },
    /// Create a chord node and serve until it is disconnected.
    CreateChordNode {
        /// Node id, taken mod 2^BITS. Omit to pick a free id at random.
        id: Option<u64>,
        /// Per-node key cache capacity.
        #[arg(default_value_t = DEFAULT_CACHE_SIZE)]
        cache_size: usize,
        /// Join incrementally and run the periodic stabilize/fix-fingers
        /// workers; `false` uses the atomic join instead.
        #[arg(default_value_t = true)]
        use_stabilization: bool,
        #[arg(long, default_value = DEFAULT_NODE_HOST)]
        host: String,
        #[arg(long, default_value_t = STABILIZE_INTERVAL_MS)]
        stabilize_ms: u64,
        #[arg(long, default_value_t = FIX_FINGERS_INTERVAL_MS)]
        fix_fingers_ms: u64,
    },
    /// Gracefully remove a node from the ring. Omit the id to pick one at
    /// random.
    DisconnectChordNode { id: Option<u64> },
    /// Print one node's finger table, or every node's when no id is given.
    FingerTable { id: Option<u64> },
    /// Print one node's stored keys, or every node's when no id is given.
    HashTable { id: Option<u64> },
    /// Store a value under a key, routed from a random node.
    Insert { key: String, value: String },
    /// Look a key up, routed from a random node.
    Get { key: String },
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let space = IdSpace::new(cli.bits);
    let client = http_client()?;
    let dir = DirectoryClient::new(&cli.ns, client);

    match cli.command {
        Command::StartNameService { host, port } => {
            let registry = start_registry(&host, port).await?;
            println!("NS running on {}", registry.addr_string());
            registry.wait().await?;
        }

        Command::CreateChordNode {
            id,
            cache_size,
            use_stabilization,
            host,
            stabilize_ms,
            fix_fingers_ms,
        } => {
            let running = start_node(NodeOptions {
                bits: cli.bits,
                id,
                anchor: None,
                node: NodeConfig {
                    cache_size,
                    use_stabilization,
                    stabilize_interval_ms: stabilize_ms,
                    fix_fingers_interval_ms: fix_fingers_ms,
                },
                ns_addr: cli.ns.clone(),
                host,
            })
            .await?;
            println!("Node id => {}", running.id);
            println!("Uri => {}", running.base_url);
            running.wait().await?;
        }

        Command::DisconnectChordNode { id } => {
            let node = match id {
                Some(id) => dir.resolve_chord(space.reduce(id)).await?,
                None => any_node(&dir).await?,
            };
            println!("Disconnect node => {}", node.id());
            node.disconnect().await?;
        }

        Command::FingerTable { id } => {
            for node in pick_nodes(&dir, &space, id).await? {
                print_finger_table(&node).await?;
            }
        }

        Command::HashTable { id } => {
            for node in pick_nodes(&dir, &space, id).await? {
                print_hash_table(&node).await?;
            }
        }

        Command::Insert { key, value } => {
            let node = any_node(&dir).await?;
            node.insert(&key, &value, 0).await?;
            println!("Stored '{}' via node {}", key, node.id());
        }

        Command::Get { key } => {
            let node = any_node(&dir).await?;
            match node.get(&key, 0).await? {
                Some(value) => println!("{value}"),
                None => println!("(not found)"),
            }
        }
    }

    Ok(())
}

async fn any_node(dir: &DirectoryClient) -> ChordResult<RemoteNode> {
    dir.random_chord_node()
        .await?
        .ok_or_else(|| ChordError::UnknownNode("node.chord".to_string()))
}

/// The node with the given id, or every live node sorted by id.
async fn pick_nodes(
    dir: &DirectoryClient,
    space: &IdSpace,
    id: Option<u64>,
) -> ChordResult<Vec<RemoteNode>> {
    let ids = match id {
        Some(id) => vec![space.reduce(id)],
        None => dir.chord_ids().await?,
    };
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        nodes.push(dir.resolve_chord(id).await?);
    }
    Ok(nodes)
}

async fn print_finger_table(node: &RemoteNode) -> ChordResult<()> {
    let entries = node.finger_table().await?;
    println!("{} finger table =>", directory::chord_node_name(node.id()));
    for (slot, entry) in entries.iter().enumerate() {
        let target = match entry.node() {
            Some(id) => id.to_string(),
            None => "-".to_string(),
        };
        if slot == 0 {
            println!("    predecessor => {target}");
        } else {
            println!("    [{slot}] start={} node={target}", entry.start());
        }
    }
    println!();
    Ok(())
}

async fn print_hash_table(node: &RemoteNode) -> ChordResult<()> {
    let keys = node.keys().await?;
    println!(
        "{} hash table keys =>",
        directory::chord_node_name(node.id())
    );
    for key in keys {
        println!("    {key}");
    }
    println!();
    Ok(())
}
