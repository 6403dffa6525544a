//! Catalog maintenance: register and inspect nodes and sensors.
//!
//! Validation and storage failures print their message and exit non-zero;
//! nothing is swallowed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gateway_service::store::{Quantity, Store};

#[derive(Debug, Parser)]
#[command(name = "catalog", about = "Node and sensor catalog maintenance")]
struct Args {
    /// SQLite database path.
    #[arg(long, default_value = "/var/lib/telemetry-hub/telemetry.db")]
    db: PathBuf,
    #[command(subcommand)]
    family: Family,
}

#[derive(Debug, Subcommand)]
enum Family {
    /// Commands to add nodes and display information about nodes.
    #[command(subcommand)]
    Node(NodeCommand),
    /// Commands to add sensors and display information about sensors.
    #[command(subcommand)]
    Sensor(SensorCommand),
}

#[derive(Debug, Subcommand)]
enum NodeCommand {
    /// List all existing nodes.
    List,
    /// Display information for the node.
    Show {
        /// ID of the node to display, an integer in range 0-254.
        id: u8,
    },
    /// Add a node to the database.
    Add {
        /// ID for the node to add, an integer in range 0-254.
        id: u8,
        /// Name for the node to add.
        name: String,
        /// Location for the node to add.
        location: String,
    },
}

#[derive(Debug, Subcommand)]
enum SensorCommand {
    /// List all existing sensors.
    List,
    /// Display information for the sensor.
    Show {
        /// ID of the sensor to display, an integer in range 0-254.
        id: u8,
    },
    /// Add a sensor to the database.
    Add {
        /// ID for the sensor to add, an integer in range 0-254.
        id: u8,
        /// ID of the node the sensor is attached to; must already exist.
        node: u8,
        /// Name for the sensor to add.
        name: String,
        /// SI quantity the sensor measures, e.g. Temperature.
        quantity: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let store = Store::open(&args.db)?;
    match args.family {
        Family::Node(command) => run_node(&store, command),
        Family::Sensor(command) => run_sensor(&store, command),
    }
}

fn run_node(store: &Store, command: NodeCommand) -> Result<()> {
    match command {
        NodeCommand::List => {
            print!("{}", layout_existing("node", &store.list_node_ids()?));
        }
        NodeCommand::Show { id } => {
            let node = store.get_node(id)?;
            let fields = [
                ("ID", format!("0x{:02x}", node.id)),
                ("Name", node.name),
                ("Location", node.location),
            ];
            print!("{}", layout_details("node", id, &fields));
        }
        NodeCommand::Add { id, name, location } => {
            store
                .add_node(id, &name, &location)
                .with_context(|| format!("Unable to create node ID 0x{id:02x}"))?;
            println!("Node ID 0x{id:02x} created in database");
        }
    }
    Ok(())
}

fn run_sensor(store: &Store, command: SensorCommand) -> Result<()> {
    match command {
        SensorCommand::List => {
            print!("{}", layout_existing("sensor", &store.list_sensor_ids()?));
        }
        SensorCommand::Show { id } => {
            let sensor = store.get_sensor(id)?;
            let fields = [
                ("ID", format!("0x{:02x}", sensor.id)),
                ("Node_ID", format!("0x{:02x}", sensor.node_id)),
                ("Name", sensor.name),
                (
                    "Quantity",
                    format!("{} ({})", sensor.quantity, sensor.quantity.symbol()),
                ),
            ];
            print!("{}", layout_details("sensor", id, &fields));
        }
        SensorCommand::Add {
            id,
            node,
            name,
            quantity,
        } => {
            let quantity: Quantity = quantity
                .parse()
                .with_context(|| format!("Unable to create sensor ID 0x{id:02x}"))?;
            store
                .add_sensor(id, node, &name, quantity)
                .with_context(|| format!("Unable to create sensor ID 0x{id:02x}"))?;
            println!("Sensor ID 0x{id:02x} created in database");
        }
    }
    Ok(())
}

/// Lays out existing IDs in rows of 16 hex cells.
fn layout_existing(thing: &str, ids: &[u8]) -> String {
    if ids.is_empty() {
        return format!("No existing {thing}s in database\n");
    }
    let mut out = format!("Existing {}s\n", title_case(thing));
    for (index, id) in ids.iter().enumerate() {
        if index % 16 == 0 {
            out.push('\n');
        }
        out.push_str(&format!("{id:02x} "));
    }
    out.push_str("\n\n");
    out
}

fn layout_details(thing: &str, id: u8, fields: &[(&str, String)]) -> String {
    let mut out = format!("Details for {thing} ID {id}:\n\n");
    for (key, value) in fields {
        out.push_str(&format!("{key} -- {value}\n"));
    }
    out.push('\n');
    out
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
