//! `ogm`: check connectivity and run ad-hoc statements against the
//! configured graph.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cypher_ogm::driver::{Connector, PropertyMap, Record, Value};
use cypher_ogm::embedded::{EmbeddedConnector, EMBEDDED_SCHEME};
use cypher_ogm::{ClientSettings, Config, OgmClient};
use std::sync::Arc;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "ogm", version, about = "Object-graph mapper command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and run a trivial statement.
    Ping,
    /// Run a statement and print every row as a JSON line.
    Query {
        /// Statement text; pass values with --param instead of inlining them.
        cypher: String,

        /// Bound parameter as key=value. The value is parsed as JSON and
        /// falls back to a plain string.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
    if key.trim().is_empty() {
        return Err(format!("parameter name missing in {:?}", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn record_json(record: &Record) -> Result<Value> {
    let mut row = PropertyMap::new();
    for (key, value) in record.keys.iter().zip(&record.values) {
        row.insert(key.clone(), serde_json::to_value(value)?);
    }
    Ok(Value::Object(row))
}

/// Picks the backend serving the configured URI scheme.
fn connector_for(settings: &ClientSettings) -> Result<Arc<dyn Connector>> {
    let uri = Url::parse(&settings.uri).with_context(|| format!("Invalid URI {}", settings.uri))?;

    if uri.scheme().eq_ignore_ascii_case(EMBEDDED_SCHEME) {
        let mut connector = EmbeddedConnector::new();
        if let Some(auth) = settings.auth.clone() {
            connector = connector.with_credentials(auth);
        }
        return Ok(Arc::new(connector));
    }

    #[cfg(feature = "bolt")]
    {
        let connector = cypher_ogm::bolt::BoltConnector::new();
        if connector.supports_scheme(uri.scheme()) {
            return Ok(Arc::new(connector));
        }
    }

    anyhow::bail!(
        "No backend for scheme {}; bolt and neo4j URIs need the `bolt` feature",
        uri.scheme()
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.log_level()),
    )
    .init();

    let settings = config.client_settings();
    let connector = connector_for(&settings)?;

    let mut client = OgmClient::new(settings, connector);
    client
        .connect()
        .with_context(|| format!("Failed to connect to {}", config.client.uri))?;

    match cli.command {
        Command::Ping => {
            let alive = client.ping()?;
            println!("{}", if alive { "ok" } else { "no response" });
            if !alive {
                anyhow::bail!("ping returned no rows");
            }
        }
        Command::Query { cypher, params } => {
            let params: PropertyMap = params.into_iter().collect();
            let records = client.run_custom_query(&cypher, params)?;
            for record in &records {
                println!("{}", record_json(record)?);
            }
            log::info!("{} row(s)", records.len());
        }
    }

    Ok(())
}
