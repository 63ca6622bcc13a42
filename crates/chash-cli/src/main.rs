//! CHash CLI - administrative client for the dispatcher.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chash")]
#[command(author, version, about = "CHash - consistent-hashing sharded entity store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Dispatcher address (host:port)
    #[arg(short, long, global = true, default_value = "127.0.0.1:5000")]
    dispatcher: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage worker nodes
    Nodes {
        #[command(subcommand)]
        command: NodesCommands,
    },

    /// Move every record onto its ring owner
    Rebalance,

    /// Stop all worker nodes and the dispatcher
    Shutdown {
        /// Name reported to the dispatcher log
        #[arg(long, default_value = "chash-cli")]
        requester: String,
    },

    /// Customer records
    Customer {
        #[command(subcommand)]
        command: CustomerCommands,
    },

    /// Order records
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },

    /// Product records
    Product {
        #[command(subcommand)]
        command: ProductCommands,
    },
}

#[derive(Subcommand)]
enum NodesCommands {
    /// List registered nodes
    List,

    /// Start a new worker node
    Add {
        /// Port for the worker to listen on
        #[arg(short, long)]
        port: u16,

        /// Worker executable (defaults to the dispatcher's configured path)
        #[arg(long)]
        path: Option<String>,
    },

    /// Drain and stop a worker node
    Remove {
        /// Node id
        id: String,
    },
}

#[derive(Subcommand)]
enum CustomerCommands {
    /// Create a customer
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
    },
    /// Show a customer
    Get { id: String },
    /// Change a customer's fields
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Delete a customer
    Delete { id: String },
    /// List all customers
    List,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Create an order
    Create {
        #[arg(long)]
        customer_id: String,
        #[arg(long)]
        total: f64,
    },
    /// Show an order
    Get { id: String },
    /// Change an order's fields
    Update {
        id: String,
        #[arg(long)]
        customer_id: Option<String>,
        #[arg(long)]
        total: Option<f64>,
    },
    /// Delete an order
    Delete { id: String },
    /// List all orders
    List,
}

#[derive(Subcommand)]
enum ProductCommands {
    /// Create a product
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "0")]
        stock: u32,
    },
    /// Show a product
    Get { id: String },
    /// Change a product's fields
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        stock: Option<u32>,
    },
    /// Delete a product
    Delete { id: String },
    /// List all products
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let addr = cli.dispatcher.as_str();

    match cli.command {
        Commands::Nodes { command } => match command {
            NodesCommands::List => commands::nodes::list(addr),
            NodesCommands::Add { port, path } => commands::nodes::add(addr, port, path),
            NodesCommands::Remove { id } => commands::nodes::remove(addr, &id),
        },
        Commands::Rebalance => commands::nodes::rebalance(addr),
        Commands::Shutdown { requester } => commands::nodes::shutdown(addr, &requester),

        Commands::Customer { command } => match command {
            CustomerCommands::Create { name, email, phone } => {
                commands::customer::create(addr, name, email, phone)
            }
            CustomerCommands::Get { id } => commands::customer::get(addr, &id),
            CustomerCommands::Update {
                id,
                name,
                email,
                phone,
            } => commands::customer::update(addr, &id, name, email, phone),
            CustomerCommands::Delete { id } => commands::customer::delete(addr, &id),
            CustomerCommands::List => commands::customer::list(addr),
        },

        Commands::Order { command } => match command {
            OrderCommands::Create { customer_id, total } => {
                commands::order::create(addr, customer_id, total)
            }
            OrderCommands::Get { id } => commands::order::get(addr, &id),
            OrderCommands::Update {
                id,
                customer_id,
                total,
            } => commands::order::update(addr, &id, customer_id, total),
            OrderCommands::Delete { id } => commands::order::delete(addr, &id),
            OrderCommands::List => commands::order::list(addr),
        },

        Commands::Product { command } => match command {
            ProductCommands::Create { name, price, stock } => {
                commands::product::create(addr, name, price, stock)
            }
            ProductCommands::Get { id } => commands::product::get(addr, &id),
            ProductCommands::Update {
                id,
                name,
                price,
                stock,
            } => commands::product::update(addr, &id, name, price, stock),
            ProductCommands::Delete { id } => commands::product::delete(addr, &id),
            ProductCommands::List => commands::product::list(addr),
        },
    }
}
